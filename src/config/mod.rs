use crate::error::{FaultlineError, Result};
use crate::redaction::TraceFlags;
use dashmap::DashMap;
use std::env;
use std::sync::Arc;

/// Interactive/development deployment. Traces may be shown to clients.
pub const DEVELOPER_MODE: &str = "FAULTLINE_DEVELOPER_MODE";

/// Forces trace suppression even in development (demo sites, screenshares).
pub const SUPPRESS_TRACEBACK: &str = "FAULTLINE_SUPPRESS_TRACEBACK";

/// Configuration service
///
/// Live key/value store. Clones share the same map, so a `set` from an admin
/// endpoint is visible to the next request without a restart.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Seeds the store from every `FAULTLINE_*` environment variable.
    pub fn new() -> Self {
        let service = Self::default();
        for (key, value) in env::vars().filter(|(key, _)| key.starts_with("FAULTLINE_")) {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.config.remove(key).map(|(_, v)| v)
    }

    /// Strict boolean lookup. Missing keys are `Ok(None)`.
    pub fn try_get_bool(&self, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(FaultlineError::InvalidConfig {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Lenient boolean lookup: anything unrecognised reads as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.try_get_bool(key).ok().flatten().unwrap_or(false)
    }
}

impl TraceFlags for ConfigService {
    fn is_development_mode(&self) -> bool {
        self.get_bool(DEVELOPER_MODE)
    }

    fn traceback_override_suppressed(&self) -> bool {
        // An unreadable value suppresses.
        match self.try_get_bool(SUPPRESS_TRACEBACK) {
            Ok(value) => value.unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Treating unreadable traceback override as suppressed");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_parsing() {
        let config = ConfigService::default();
        config.set("A", "TRUE");
        config.set("B", "off");
        config.set("C", "maybe");

        assert!(config.get_bool("A"));
        assert!(!config.get_bool("B"));
        assert!(!config.get_bool("C"));
        assert!(!config.get_bool("MISSING"));
        assert!(config.try_get_bool("C").is_err());
    }

    #[test]
    fn test_clones_share_live_values() {
        let config = ConfigService::default();
        let view = config.clone();
        assert!(!view.is_development_mode());

        config.set(DEVELOPER_MODE, "1");
        assert!(view.is_development_mode());
    }

    #[test]
    fn test_garbled_override_suppresses() {
        let config = ConfigService::default();
        config.set(SUPPRESS_TRACEBACK, "sometimes");
        assert!(config.traceback_override_suppressed());
    }
}
