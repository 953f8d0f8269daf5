//! Run configuration.

use dagtest_core::Exclusivity;
use std::time::Duration;

/// Timeout applied to runnables that declare none of their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Configuration for an orchestrated run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Timeout for runnables without their own or a suite timeout.
    /// `None` or a zero duration disables it.
    pub default_timeout: Option<Duration>,
    /// Exclusivity stamped on tests no suite configures
    pub default_test_exclusivity: Option<Exclusivity>,
    /// Title of the root suite
    pub root_title: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_timeout: Some(DEFAULT_TIMEOUT),
            default_test_exclusivity: None,
            root_title: String::new(),
        }
    }
}

impl RunConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default timeout. A zero duration disables it.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Disable the default timeout.
    pub fn without_timeout(mut self) -> Self {
        self.default_timeout = None;
        self
    }

    /// Set the exclusivity used for tests when no suite sets one.
    pub fn with_test_exclusivity(mut self, exclusivity: Exclusivity) -> Self {
        self.default_test_exclusivity = Some(exclusivity);
        self
    }

    /// Set the root suite title.
    pub fn with_root_title(mut self, title: impl Into<String>) -> Self {
        self.root_title = title.into();
        self
    }

    /// The effective default timeout, with zero treated as disabled.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.default_timeout.filter(|timeout| !timeout.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new();
        assert_eq!(config.effective_timeout(), Some(Duration::from_millis(2000)));
        assert_eq!(config.default_test_exclusivity, None);
        assert!(config.root_title.is_empty());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = RunConfig::new().with_default_timeout(Duration::ZERO);
        assert_eq!(config.effective_timeout(), None);
        assert_eq!(RunConfig::new().without_timeout().effective_timeout(), None);
    }

    #[test]
    fn test_builders() {
        let config = RunConfig::new()
            .with_test_exclusivity(Exclusivity::Local)
            .with_root_title("all");
        assert_eq!(config.default_test_exclusivity, Some(Exclusivity::Local));
        assert_eq!(config.root_title, "all");
    }
}
