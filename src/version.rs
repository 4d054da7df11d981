use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{AgentError, Result};

/// Build information for the running agent, normally read from a
/// `version.json` written by the release pipeline
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Monotonic build counter
    #[serde(default)]
    pub build_number: i64,
    /// Full commit hash of the build
    #[serde(default)]
    pub hash: String,
    /// Short commit hash; carries a "-dev" suffix for uncommitted builds
    #[serde(default)]
    pub short_hash: String,
}

impl Version {
    /// Load version information from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading version information from {}", path.display());

        let contents = fs::read_to_string(path).map_err(|e| {
            AgentError::Version(format!("could not read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            AgentError::Version(format!("could not parse {}: {}", path.display(), e))
        })
    }

    /// Combined display form, e.g. "1042-3f5e2a1"
    pub fn build_hash(&self) -> String {
        format!("{}-{}", self.build_number, self.short_hash)
    }

    /// Whether this build was produced from uncommitted code
    pub fn is_dev(&self) -> bool {
        self.short_hash.ends_with("-dev")
    }

    /// The build number as a metric value. Dev builds are offset by half a
    /// step so unofficial builds stay distinguishable on the same series.
    pub fn sample_value(&self) -> f64 {
        let mut value = self.build_number as f64;
        if self.is_dev() {
            value += 0.5;
        }
        value
    }
}
