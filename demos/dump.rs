//! Decode P1 telegrams from a capture file, or stdin, and print the values.
//!
//! ```text
//! RUST_LOG=debug cargo run --example dump -- capture.bin
//! ```

use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;

use anyhow::Context;
use p1_proto::{obis, Config, FieldId, Interface, P1Reader, Registry, Sensor, State};

struct Capture {
    data: VecDeque<u8>,
}

impl Interface for Capture {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..len)) {
            *dst = src;
        }
        len
    }

    fn write_secondary(&mut self, _data: &[u8]) {}

    fn set_ready_to_receive(&mut self, active: bool) {
        log::trace!("Flow control {}", if active { "on" } else { "off" });
    }
}

const FIELDS: [(&str, FieldId); 8] = [
    ("Energy import, tariff 1 (kWh)", obis(1, 8, 1)),
    ("Energy import, tariff 2 (kWh)", obis(1, 8, 2)),
    ("Energy import (kWh)", obis(1, 8, 0)),
    ("Energy export (kWh)", obis(2, 8, 0)),
    ("Power import (kW)", obis(1, 7, 0)),
    ("Power export (kW)", obis(2, 7, 0)),
    ("Voltage L1 (V)", obis(32, 7, 0)),
    ("Current L1 (A)", obis(31, 7, 0)),
];

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut data = Vec::new();
    match std::env::args().nth(1) {
        Some(path) => {
            data = std::fs::read(&path).with_context(|| format!("Reading {}", path))?;
        }
        None => {
            io::stdin()
                .read_to_end(&mut data)
                .context("Reading stdin")?;
        }
    }

    let mut registry = Registry::new();
    let sensors: Vec<(&str, Sensor)> = FIELDS
        .iter()
        .map(|(name, id)| (*name, registry.register(*id)))
        .collect();

    let link = Capture { data: data.into() };
    let config = Config::default().with_settle_time(Duration::ZERO);
    let mut reader: P1Reader<Capture> = P1Reader::new(link, registry, config);

    let mut telegrams = 0;
    loop {
        reader.tick();
        if reader.stats().telegrams != telegrams {
            telegrams = reader.stats().telegrams;
            println!("Telegram {}", telegrams);
            for (name, sensor) in &sensors {
                if let Some(value) = sensor.state() {
                    println!("  {:<32}{}", name, value);
                }
            }
        }
        if reader.state() == State::ReadingMessage && reader.io().data.is_empty() {
            break;
        }
    }

    let stats = reader.stats();
    println!(
        "{} telegrams, {} values, {} errors ({} CRC)",
        stats.telegrams, stats.values, stats.errors, stats.crc_errors
    );
    Ok(())
}
