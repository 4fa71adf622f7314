//! Per-view engine configuration.
//!
//! Settings are plain data, loadable from JSON so hosts can keep them next to
//! the rest of their configuration:
//!
//! ```ignore
//! let config = LiveConfig::from_json(r#"{ "max_components": 500 }"#)?;
//! let view = LiveView::with_config(root, config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine configuration for one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveConfig {
    /// HTML-escape scalar expression output.
    pub escape_html: bool,
    /// Skip re-evaluating expressions whose dependencies did not change.
    ///
    /// Turning this off re-evaluates everything on every pass; patches stay
    /// identical, only slower to compute.
    pub change_tracking: bool,
    /// Maximum number of live component records in one view.
    pub max_components: Option<usize>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            escape_html: true,
            change_tracking: true,
            max_components: None,
        }
    }
}

impl LiveConfig {
    /// Parse a configuration from JSON, filling absent fields with defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveError;

    #[test]
    fn test_defaults() {
        let config = LiveConfig::default();
        assert!(config.escape_html);
        assert!(config.change_tracking);
        assert_eq!(config.max_components, None);
    }

    #[test]
    fn test_partial_json() {
        let config = LiveConfig::from_json(r#"{ "max_components": 3 }"#).unwrap();
        assert_eq!(config.max_components, Some(3));
        assert!(config.escape_html);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = LiveConfig::from_json(r#"{ "escape": false }"#).unwrap_err();
        assert!(matches!(err, LiveError::Config(_)));
    }
}
