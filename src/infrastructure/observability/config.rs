//! Observability configuration

use serde::Deserialize;

/// Prometheus metrics configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    #[serde(default)]
    pub enabled: bool,
    /// Print the exposition text after each CLI command
    #[serde(default)]
    pub print_on_exit: bool,
}

impl MetricsConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            print_on_exit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disabled() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(!config.print_on_exit);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: MetricsConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(config.enabled);
        assert!(!config.print_on_exit);
    }
}
