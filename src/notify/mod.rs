//! Failure notification.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// BEL control character.
pub const BELL: &[u8] = b"\x07";

/// Tells the user something needs attention.
pub trait Notifier: Send + Sync {
    /// Signals that validation failed.
    fn validation_failed(&self);
}

/// Rings the terminal bell on stderr.
#[derive(Clone)]
pub struct BellNotifier {
    enabled: bool,
    out: Arc<Mutex<dyn Write + Send>>,
}

impl std::fmt::Debug for BellNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BellNotifier")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl BellNotifier {
    /// Creates a notifier writing to stderr.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self::with_writer(enabled, std::io::stderr())
    }

    /// Creates a notifier writing to `out`.
    #[must_use]
    pub fn with_writer(enabled: bool, out: impl Write + Send + 'static) -> Self {
        Self {
            enabled,
            out: Arc::new(Mutex::new(out)),
        }
    }
}

impl Notifier for BellNotifier {
    fn validation_failed(&self) {
        if !self.enabled {
            return;
        }

        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = out.write_all(BELL).and_then(|()| out.flush()) {
            tracing::debug!(error = %e, "Could not ring terminal bell");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bell_written_on_failure() {
        let buffer = SharedBuffer::default();
        let notifier = BellNotifier::with_writer(true, buffer.clone());

        notifier.validation_failed();

        assert_eq!(*buffer.0.lock().expect("buffer lock"), BELL);
    }

    #[test]
    fn test_disabled_is_silent() {
        let buffer = SharedBuffer::default();
        let notifier = BellNotifier::with_writer(false, buffer.clone());

        notifier.validation_failed();

        assert!(buffer.0.lock().expect("buffer lock").is_empty());
    }
}
