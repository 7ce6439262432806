//! Per-operation status slots shared between the scheduling side and the
//! writer thread.

use std::sync::{Arc, Mutex};

use anyhow::Result;

/// A shared slot for the outcome of one scheduled append or remove.
///
/// The performing side writes the slot exactly once; the caller reads it
/// after `perform_*` returns. An unset slot means the operation never ran.
#[derive(Clone, Default)]
pub struct StatusCell {
    slot: Arc<Mutex<Option<Result<()>>>>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, result: Result<()>) {
        *self.slot.lock().unwrap() = Some(result);
    }

    /// Whether a result has been recorded.
    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// Whether the recorded result is an error.
    pub fn is_err(&self) -> bool {
        matches!(*self.slot.lock().unwrap(), Some(Err(_)))
    }

    /// Take the recorded result out of the slot.
    pub fn take(&self) -> Option<Result<()>> {
        self.slot.lock().unwrap().take()
    }

    /// Error message of a recorded failure, with its reason chain.
    pub fn error_message(&self) -> Option<String> {
        match &*self.slot.lock().unwrap() {
            Some(Err(error)) => Some(format!("{error:#}")),
            _ => None,
        }
    }
}
