//! 購読者一覧（YAML）の読み込み。
//!
//! ```yaml
//! subscribers:
//!   - recipient: reader@example.com
//!     topics: [ai, robotics]
//!     timezone: America/New_York
//!     schedule_time: "08:30"
//! ```
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::state::Preferences;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscriber {
    pub recipient: String,
    #[serde(flatten)]
    pub preferences: Preferences,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    subscribers: Vec<Subscriber>,
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read subscriber roster {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse subscriber roster: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("subscriber #{0} has an empty recipient")]
    EmptyRecipient(usize),
}

/// # Errors
/// YAMLとして不正、または宛先が空の購読者がいる場合はエラーを返す。
pub fn parse_roster(yaml: &str) -> Result<Vec<Subscriber>, RosterError> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: RosterFile = serde_yaml::from_str(yaml)?;
    if let Some(index) = file
        .subscribers
        .iter()
        .position(|subscriber| subscriber.recipient.trim().is_empty())
    {
        return Err(RosterError::EmptyRecipient(index + 1));
    }
    Ok(file.subscribers)
}

/// # Errors
/// ファイルが読めない、または内容が不正な場合はエラーを返す。
pub async fn load_roster(path: &Path) -> Result<Vec<Subscriber>, RosterError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RosterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_roster(&raw)
}
