//! Traceback redaction policy
//!
//! Decides whether a rendered error may include the raw trace. Redaction only
//! ever applies to what is sent to the client; persisted snapshots always keep
//! the full trace.

use std::sync::Arc;

/// The two independently settable flags gating trace visibility.
pub trait TraceFlags: Send + Sync + 'static {
    /// `true` for an interactive/development deployment.
    fn is_development_mode(&self) -> bool;

    /// `true` when traces must be hidden even in development.
    fn traceback_override_suppressed(&self) -> bool;
}

/// Fixed flags, for tests and embedded setups without a config store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTraceFlags {
    pub development_mode: bool,
    pub suppressed: bool,
}

impl TraceFlags for StaticTraceFlags {
    fn is_development_mode(&self) -> bool {
        self.development_mode
    }

    fn traceback_override_suppressed(&self) -> bool {
        self.suppressed
    }
}

#[derive(Clone)]
pub struct Redactor {
    flags: Arc<dyn TraceFlags>,
}

impl Redactor {
    pub fn new(flags: Arc<dyn TraceFlags>) -> Self {
        Self { flags }
    }

    /// Fail-closed: reveal only in development mode with no suppression.
    /// Both flags are read on every call.
    pub fn should_reveal_trace(&self) -> bool {
        self.flags.is_development_mode() && !self.flags.traceback_override_suppressed()
    }

    /// The trace to render, or `None` when it must stay hidden.
    pub fn reveal(&self, trace: impl FnOnce() -> String) -> Option<String> {
        self.should_reveal_trace().then(trace)
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(Arc::new(StaticTraceFlags::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigService, DEVELOPER_MODE, SUPPRESS_TRACEBACK};

    #[test]
    fn test_truth_table_is_fail_closed() {
        let cases = [
            (false, false, false),
            (false, true, false),
            (true, true, false),
            (true, false, true),
        ];
        for (development_mode, suppressed, expected) in cases {
            let redactor = Redactor::new(Arc::new(StaticTraceFlags {
                development_mode,
                suppressed,
            }));
            assert_eq!(
                redactor.should_reveal_trace(),
                expected,
                "dev={development_mode} suppressed={suppressed}"
            );
        }
    }

    #[test]
    fn test_live_config_change_applies_immediately() {
        let config = ConfigService::default();
        let redactor = Redactor::new(Arc::new(config.clone()));
        assert!(!redactor.should_reveal_trace());

        config.set(DEVELOPER_MODE, "true");
        assert!(redactor.should_reveal_trace());

        config.set(SUPPRESS_TRACEBACK, "true");
        assert!(!redactor.should_reveal_trace());
    }

    #[test]
    fn test_reveal_skips_rendering_when_hidden() {
        let redactor = Redactor::default();
        assert_eq!(redactor.reveal(|| unreachable!()), None);
    }
}
