//! TOML file configuration structures.
//!
//! These structs directly map to the `extender.toml` file format.

use extender_core::config::{IngestConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub node: NodeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Node API section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root URL of the node JSON API (e.g. "http://127.0.0.1:8841").
    pub url: Url,
}
