//! Data model shared by the services, agents and workflows.

pub mod errors;
pub mod report;
pub mod zuul;

use serde::{Deserialize, Serialize};

/// The description of a Zuul job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub description: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Check that a URL points to a Zuul build.
pub fn is_build_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };

    matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() && parsed.path().contains("/build/")
}
