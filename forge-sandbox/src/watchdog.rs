//! Wall-clock deadline shared by the instruction hook and native helpers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline for one VM. Clones share the expiry flag.
#[derive(Debug, Clone)]
pub(crate) struct Watchdog {
    deadline: Instant,
    expired: Arc<AtomicBool>,
}

impl Watchdog {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `true` once any check has seen the deadline pass.
    pub(crate) fn expired(&self) -> bool {
        self.expired.load(Ordering::Relaxed)
    }

    /// Fails with a runtime error once the deadline has passed. Stays failed.
    pub(crate) fn check(&self) -> mlua::Result<()> {
        if self.expired() || Instant::now() >= self.deadline {
            self.expired.store(true, Ordering::Relaxed);
            return Err(mlua::Error::RuntimeError(
                "execution deadline exceeded".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_sticky_and_shared() {
        let watchdog = Watchdog::new(Duration::ZERO);
        let observer = watchdog.clone();
        assert!(!observer.expired());

        assert!(watchdog.check().is_err());
        assert!(observer.expired());
        assert!(observer.check().is_err());
    }

    #[test]
    fn checks_pass_before_the_deadline() {
        let watchdog = Watchdog::new(Duration::from_secs(60));
        assert!(watchdog.check().is_ok());
        assert!(!watchdog.expired());
    }
}
