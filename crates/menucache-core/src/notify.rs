//! Fire-and-forget notices about upstream problems.
//!
//! When the configured menu disappears upstream an administrator should hear
//! about it, but the request that noticed must not wait for, or fail because
//! of, the notice. Dispatch happens on a detached thread whose outcome is
//! only logged.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tracing::{debug, warn};

pub trait Notifier: Send + Sync + 'static {
    fn missing_menu(&self, menu: &str) -> Result<()>;
}

/// Notifier that only writes a warning to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn missing_menu(&self, menu: &str) -> Result<()> {
        warn!(menu = menu, "Configured menu is missing upstream");
        Ok(())
    }
}

/// Sends a missing-menu notice on a detached thread.
///
/// The handle is returned for tests; production callers drop it.
pub fn dispatch_missing_menu(notifier: Arc<dyn Notifier>, menu: String) -> Option<thread::JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("menu-notify".to_string())
        .spawn(move || {
            if let Err(e) = notifier.missing_menu(&menu) {
                debug!(menu = %menu, error = %e, "Missing-menu notification failed");
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            debug!(error = %e, "Could not spawn notification thread");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl Notifier for Recording {
        fn missing_menu(&self, menu: &str) -> Result<()> {
            self.seen.lock().unwrap().push(menu.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl Notifier for Failing {
        fn missing_menu(&self, _menu: &str) -> Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    #[test]
    fn test_dispatch_runs_notifier() {
        let recording = Arc::new(Recording::default());
        let handle = dispatch_missing_menu(recording.clone(), "lunch".to_string()).unwrap();
        handle.join().unwrap();
        assert_eq!(*recording.seen.lock().unwrap(), vec!["lunch".to_string()]);
    }

    #[test]
    fn test_dispatch_swallows_failure() {
        let handle = dispatch_missing_menu(Arc::new(Failing), "lunch".to_string()).unwrap();
        assert!(handle.join().is_ok());
    }
}
