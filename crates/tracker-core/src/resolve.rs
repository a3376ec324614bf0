use tracing::{info, warn};

/// Enumeration of connected device slots, as exposed by a tracking runtime.
pub trait DeviceDirectory: Send + Sync {
    fn device_count(&self) -> u32;
    /// Serial number reported for a slot, `None` for an empty slot.
    fn serial_number(&self, index: u32) -> Option<String>;
}

/// Linear scan for the first slot whose serial matches exactly. Every
/// non-empty serial seen is logged to aid debugging; no match leaves the
/// caller unbound.
pub fn resolve_device_index(directory: &dyn DeviceDirectory, serial: &str) -> Option<u32> {
    let mut found: Option<u32> = None;
    for index in 0..directory.device_count() {
        match directory.serial_number(index) {
            Some(s) if s == serial => {
                if found.is_none() {
                    info!(index, serial, "bound tracker to device");
                    found = Some(index);
                }
            }
            Some(s) if !s.is_empty() => {
                info!(index, serial = %s, "device serial seen during scan");
            }
            _ => {}
        }
    }
    if found.is_none() {
        warn!(serial, "no device matched serial, tracker left unbound");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDirectory(Vec<Option<&'static str>>);

    impl DeviceDirectory for FixedDirectory {
        fn device_count(&self) -> u32 {
            self.0.len() as u32
        }

        fn serial_number(&self, index: u32) -> Option<String> {
            self.0.get(index as usize).copied().flatten().map(String::from)
        }
    }

    #[test]
    fn finds_first_exact_match() {
        let dir = FixedDirectory(vec![
            Some("LHR-AAA"),
            None,
            Some("LHR-TARGET"),
            Some("LHR-TARGET"),
        ]);
        assert_eq!(resolve_device_index(&dir, "LHR-TARGET"), Some(2));
    }

    #[test]
    fn no_match_returns_none() {
        let dir = FixedDirectory(vec![Some("LHR-AAA"), Some("")]);
        assert_eq!(resolve_device_index(&dir, "LHR-MISSING"), None);
    }

    #[test]
    fn partial_serials_do_not_match() {
        let dir = FixedDirectory(vec![Some("LHR-TARGET-LONGER")]);
        assert_eq!(resolve_device_index(&dir, "LHR-TARGET"), None);
    }
}
