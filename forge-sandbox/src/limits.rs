use std::time::Duration;

/// Hard ceiling on any handler deadline.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Resource limits applied to every VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Deadline used when the caller does not supply one.
    pub default_timeout: Duration,
    /// Largest deadline a caller may request; never above [`MAX_TIMEOUT`].
    pub max_timeout: Duration,
    /// Extra time the host waits for the worker after the deadline.
    pub grace: Duration,
    /// Memory ceiling per VM in bytes.
    pub memory_limit: usize,
    /// Number of VM instructions between watchdog checks.
    pub watchdog_interval: u32,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_timeout: MAX_TIMEOUT,
            grace: Duration::from_millis(250),
            memory_limit: 32 * 1024 * 1024,
            watchdog_interval: 10_000,
        }
    }
}

impl SandboxLimits {
    /// Resolves the deadline for one run.
    ///
    /// `None` falls back to the default; anything larger than the ceiling is
    /// clamped to it.
    #[must_use]
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let ceiling = self.max_timeout.min(MAX_TIMEOUT);
        requested
            .unwrap_or(self.default_timeout)
            .min(ceiling)
            .max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_clamped() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.effective_timeout(None), Duration::from_secs(5));
        assert_eq!(
            limits.effective_timeout(Some(Duration::from_secs(120))),
            MAX_TIMEOUT
        );
        assert_eq!(
            limits.effective_timeout(Some(Duration::from_millis(200))),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn ceiling_never_exceeds_hard_limit() {
        let limits = SandboxLimits {
            max_timeout: Duration::from_secs(600),
            ..SandboxLimits::default()
        };
        assert_eq!(
            limits.effective_timeout(Some(Duration::from_secs(600))),
            MAX_TIMEOUT
        );
    }
}
