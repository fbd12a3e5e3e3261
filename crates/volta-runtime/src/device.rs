//! Device view contract

use std::sync::{Arc, Mutex};

/// Write access to named analogue signals on local hardware.
///
/// The dispatch module is the only writer, and only for the broker's own
/// devices; reads happen out of band through the device layer itself.
pub trait DeviceView: Send {
    fn set(&mut self, signal: &str, value: f64);
}

/// Recording device view for tests and demos
#[derive(Clone, Debug, Default)]
pub struct SignalLog {
    writes: Arc<Mutex<Vec<(String, f64)>>>,
}

impl SignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in order
    pub fn writes(&self) -> Vec<(String, f64)> {
        self.writes.lock().expect("signal log poisoned").clone()
    }
}

impl DeviceView for SignalLog {
    fn set(&mut self, signal: &str, value: f64) {
        self.writes
            .lock()
            .expect("signal log poisoned")
            .push((signal.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_log_records_in_order() {
        let log = SignalLog::new();
        let mut view = log.clone();
        view.set("onOffSwitch", 1.0);
        view.set("level", 4.3127);
        assert_eq!(
            log.writes(),
            vec![("onOffSwitch".to_string(), 1.0), ("level".to_string(), 4.3127)]
        );
    }
}
