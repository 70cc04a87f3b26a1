//! Notification of property changes after a successful update.

use std::fmt;

use parking_lot::Mutex;

use crate::entity::EntityId;

/// What changed for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChangeEvent {
    pub subject_id: EntityId,
    /// Properties whose rows were inserted or deleted, sorted.
    pub property_ids: Vec<EntityId>,
}

/// Receives change events so dependent caches can invalidate.
pub trait PropertyChangeListener: Send + Sync {
    fn on_change(&self, event: &PropertyChangeEvent);
}

/// Listener backed by a closure.
pub struct CallbackListener<F>(F);

impl<F> CallbackListener<F>
where
    F: Fn(&PropertyChangeEvent) + Send + Sync,
{
    pub const fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> PropertyChangeListener for CallbackListener<F>
where
    F: Fn(&PropertyChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &PropertyChangeEvent) {
        (self.0)(event);
    }
}

impl<F> fmt::Debug for CallbackListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackListener")
    }
}

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<PropertyChangeEvent>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<PropertyChangeEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl PropertyChangeListener for RecordingListener {
    fn on_change(&self, event: &PropertyChangeEvent) {
        self.events.lock().push(event.clone());
    }
}
