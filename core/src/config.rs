//! Renderer configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Namespace given to `svg` elements created without an explicit `xmlns`.
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

/// Settings shared by the DOM runtime and the server renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host tag used for stateful components that do not name one.
    pub default_tag: String,
    /// Attribute carrying placeholder ids in streamed markup.
    pub placeholder_attribute: String,
    /// Global object whose `push` receives streamed patches.
    pub stream_global: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_tag: "div".to_owned(),
            placeholder_attribute: "data-ssr".to_owned(),
            stream_global: "$stream".to_owned(),
        }
    }
}

impl Config {
    /// Parses a configuration from JSON, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid configuration object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
