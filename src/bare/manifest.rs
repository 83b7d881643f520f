//! Server manifest served at the prefix root.

use serde::Serialize;

use crate::bare::policy::ProtocolVersion;
use crate::config::schema::{MaintainerInfo, ManifestConfig, ProjectInfo};

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub versions: Vec<&'static str>,
    pub language: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<MaintainerInfo>,
    pub project: ProjectInfo,
}

impl Manifest {
    pub fn from_config(config: &ManifestConfig) -> Self {
        Self {
            versions: ProtocolVersion::ALL.iter().map(|v| v.as_str()).collect(),
            language: "Rust",
            maintainer: config.maintainer.clone(),
            project: config.project.clone(),
        }
    }
}
