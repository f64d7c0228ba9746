//! Mapping from [`FieldId`] to the sinks receiving decoded values.
//!
//! Entries are registered before the reader starts and are never removed.
//! When several entries share an identifier, the one registered last wins.

use core::cell::Cell;
use core::fmt;
use std::rc::Rc;

use crate::types::FieldId;

/// Receiver of decoded values for one field.
pub trait Sink {
    /// Publish a newly decoded value.
    fn publish(&self, value: f64);
}

impl<F> Sink for F
where
    F: Fn(f64),
{
    fn publish(&self, value: f64) {
        self(value)
    }
}

#[derive(Debug, Default)]
struct SensorState {
    value: Cell<Option<f64>>,
    updates: Cell<u32>,
}

/// Handle to the latest value published for a field.
///
/// Cloning the handle gives another view of the same value.
#[derive(Clone, Default)]
pub struct Sensor(Rc<SensorState>);

impl Sensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published value, if any.
    pub fn state(&self) -> Option<f64> {
        self.0.value.get()
    }

    /// Number of values published so far.
    pub fn updates(&self) -> u32 {
        self.0.updates.get()
    }
}

impl Sink for Sensor {
    fn publish(&self, value: f64) {
        self.0.value.set(Some(value));
        self.0.updates.set(self.0.updates.get().saturating_add(1));
    }
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("state", &self.state())
            .field("updates", &self.updates())
            .finish()
    }
}

struct Entry {
    id: FieldId,
    sink: Box<dyn Sink>,
}

/// The set of fields whose values should be published.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field, returning a [`Sensor`] handle that receives its values.
    pub fn register(&mut self, id: FieldId) -> Sensor {
        let sensor = Sensor::new();
        self.register_sink(id, sensor.clone());
        sensor
    }

    /// Register a field with a custom sink.
    pub fn register_sink(&mut self, id: FieldId, sink: impl Sink + 'static) {
        self.entries.push(Entry {
            id,
            sink: Box::new(sink),
        });
    }

    /// Find the sink for a field, the most recently registered one if there are several.
    pub fn lookup(&self, id: FieldId) -> Option<&dyn Sink> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.id == id)
            .map(|entry| entry.sink.as_ref())
    }

    /// Publish `value` to the sink registered for `id`.
    ///
    /// Returns false if no sink is registered for the field.
    pub(crate) fn publish(&self, id: FieldId, value: f64) -> bool {
        match self.lookup(id) {
            Some(sink) => {
                log::trace!("Publishing {} = {}", id, value);
                sink.publish(value);
                true
            }
            None => {
                log::debug!("No sensor matching {} ({:#x})", id, id.packed());
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.id))
            .finish()
    }
}
