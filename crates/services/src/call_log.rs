//! Shared record of calls made against the in-memory services.

use std::sync::{Arc, Mutex};

/// Ordered log of RPC patterns invoked on in-memory services.
///
/// Clone it into several services to observe the relative order of calls
/// across them.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pattern: &str) {
        self.calls.lock().unwrap().push(pattern.to_string());
    }

    /// All recorded patterns in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `pattern` was called.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == pattern)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}
