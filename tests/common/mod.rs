#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use p1_proto::crc::{ascii_crc, binary_crc};
use p1_proto::{Clock, Config, Interface, P1Reader, Registry, State};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Simulated meter link and secondary port.
pub struct SimulatedLink {
    rx: VecDeque<u8>,
    /// Bytes the meter will only send while flow control is active.
    pending: VecDeque<u8>,
    pub secondary: Vec<u8>,
    pub secondary_writes: Vec<usize>,
    pub ready: bool,
    pub busy: bool,
    pub requested: bool,
    pub ready_changes: u32,
    /// Largest number of bytes handed out per read call.
    pub chunk: usize,
}

impl SimulatedLink {
    pub fn new() -> Rc<RefCell<SimulatedLink>> {
        Rc::new(RefCell::new(SimulatedLink {
            rx: VecDeque::new(),
            pending: VecDeque::new(),
            secondary: Vec::new(),
            secondary_writes: Vec::new(),
            ready: false,
            busy: false,
            requested: false,
            ready_changes: 0,
            chunk: usize::MAX,
        }))
    }

    /// Bytes already on the wire, readable regardless of flow control.
    pub fn receive(&mut self, data: &[u8]) {
        self.rx.extend(data);
    }

    /// Bytes the meter sends once it sees flow control active.
    pub fn send_when_ready(&mut self, data: &[u8]) {
        self.pending.extend(data);
    }

    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }
}

/// Handle owned by the reader, sharing the state with the test.
pub struct LinkPlane(Rc<RefCell<SimulatedLink>>);

impl LinkPlane {
    pub fn new(link: &Rc<RefCell<SimulatedLink>>) -> LinkPlane {
        LinkPlane(link.clone())
    }
}

impl Interface for LinkPlane {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut link = self.0.borrow_mut();
        if link.ready {
            let pending: Vec<u8> = link.pending.drain(..).collect();
            link.rx.extend(pending);
        }
        let len = buf.len().min(link.chunk).min(link.rx.len());
        for (dst, src) in buf.iter_mut().zip(link.rx.drain(..len)) {
            *dst = src;
        }
        len
    }

    fn write_secondary(&mut self, data: &[u8]) {
        let mut link = self.0.borrow_mut();
        link.secondary.extend_from_slice(data);
        link.secondary_writes.push(data.len());
    }

    fn set_ready_to_receive(&mut self, active: bool) {
        let mut link = self.0.borrow_mut();
        if link.ready != active {
            link.ready_changes += 1;
        }
        link.ready = active;
    }

    fn set_busy(&mut self, active: bool) {
        self.0.borrow_mut().busy = active;
    }

    fn secondary_requested(&self) -> bool {
        self.0.borrow().requested
    }
}

/// Clock that only moves when told to, optionally by a fixed step on every read.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
    step: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            now: Rc::new(Cell::new(Instant::now())),
            step: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set_step(&self, step: Duration) {
        self.step.set(step);
    }

    pub fn peek(&self) -> Instant {
        self.now.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let now = self.now.get();
        self.now.set(now + self.step.get());
        now
    }
}

pub type TestReader<const N: usize = 2048> = P1Reader<LinkPlane, ManualClock, N>;

pub fn reader<const N: usize>(
    link: &Rc<RefCell<SimulatedLink>>,
    clock: &ManualClock,
    registry: Registry,
    config: Config,
) -> TestReader<N> {
    P1Reader::with_clock(LinkPlane::new(link), clock.clone(), registry, config)
}

/// Tick until `state` is reached, checking flow control on every tick.
/// Returns the number of ticks taken.
pub fn run_until<const N: usize>(reader: &mut TestReader<N>, state: State, max_ticks: u32) -> u32 {
    for ticks in 0..max_ticks {
        if reader.state() == state {
            return ticks;
        }
        reader.tick();
        check_flow_control(reader);
    }
    panic!(
        "Stuck in {:?} after {} ticks, waiting for {:?}",
        reader.state(),
        max_ticks,
        state
    );
}

/// Flow control is active exactly while the reader is collecting a telegram.
pub fn check_flow_control<const N: usize>(reader: &TestReader<N>) {
    let ready = reader.io().0.borrow().ready;
    assert_eq!(ready, reader.state() == State::ReadingMessage);
}

/// `body` runs from the '/' up to and including the '!'.
pub fn ascii_telegram(body: &str) -> Vec<u8> {
    assert!(body.starts_with('/') && body.ends_with('!'));
    format!("{}{:04X}\r\n", body, ascii_crc(body.as_bytes())).into_bytes()
}

pub const ASCII_BODY: &str = "/ISK5\\2M550T-1003\r\n\
    \r\n\
    1-3:0.2.8(50)\r\n\
    0-0:1.0.0(220101120000W)\r\n\
    1-0:1.8.0(00123.456*kWh)\r\n\
    1-0:2.8.0(00000.000*kWh)\r\n\
    1-0:1.7.0(01.234*kW)\r\n\
    1-0:32.7.0(229.8*V)\r\n\
    !";

/// Wrap data units in an HDLC frame with a valid length and CRC.
pub fn binary_telegram(units: &[u8]) -> Vec<u8> {
    // format/length placeholder, addresses, control, HCS, LLC
    let mut body = vec![0xA0, 0x00, 0x41, 0x08, 0x83, 0x13, 0x04, 0x5A, 0xE6, 0xE7, 0x00];
    body.extend_from_slice(units);
    let frame_length = body.len() + 2;
    assert!(frame_length < 0x2000);
    body[0] = 0xA0 | (frame_length >> 8) as u8;
    body[1] = (frame_length & 0xFF) as u8;

    let mut telegram = vec![0x7E];
    telegram.extend_from_slice(&body);
    telegram.extend_from_slice(&binary_crc(&body).to_le_bytes());
    telegram.push(0x7E);
    telegram
}

#[rustfmt::skip]
pub const BINARY_UNITS: &[u8] = &[
    0x0F, 0x40, 0x00, 0x00, 0x00,
    0x00,
    0x02, 0x03,
    0x09, 0x06, 0x01, 0x00, 0x01, 0x08, 0x00, 0xFF,
    0x06, 0x00, 0x01, 0xE2, 0x40,
    0x02, 0x02,
    0x09, 0x06, 0x01, 0x00, 0x20, 0x07, 0x00, 0xFF,
    0x12, 0x08, 0xFA,
    0x02, 0x02,
    0x09, 0x06, 0x01, 0x00, 0x15, 0x07, 0x00, 0xFF,
    0x12, 0xFF, 0x9C,
];
