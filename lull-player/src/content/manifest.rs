//! Sound catalog manifest
//!
//! One JSON document describes every sound:
//!
//! ```json
//! {
//!   "basePath": "lull",
//!   "sounds": {
//!     "rain": {
//!       "maxSilence": 0,
//!       "segments": [
//!         { "name": "a", "premium": false },
//!         { "name": "b", "premium": true }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Segment folders live at `{basePath}/{soundId}/{bitrate}/{segment}/`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::content::ContentStore;
use crate::error::{Error, Result};

/// Parsed catalog manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Root under which per-sound segment folders live
    #[serde(default)]
    pub base_path: String,

    pub sounds: HashMap<String, SoundEntry>,
}

/// Catalog entry for one sound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundEntry {
    /// Longest silence gap between segments in seconds; 0 means contiguous
    #[serde(default)]
    pub max_silence: f64,

    pub segments: Vec<SegmentEntry>,
}

/// Catalog entry for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub name: String,

    #[serde(default)]
    pub premium: bool,
}

impl SoundEntry {
    /// Contiguous sounds loop without gaps through bridge segments
    pub fn is_contiguous(&self) -> bool {
        self.max_silence <= 0.0
    }
}

impl Catalog {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Manifest(e.to_string()))
    }

    /// Fetch and parse the manifest at `path`
    pub async fn load(store: &dyn ContentStore, path: &str) -> Result<Self> {
        let bytes = store.fetch_bytes(path).await?;
        let catalog = Self::from_slice(&bytes)?;
        debug!(path, sounds = catalog.sounds.len(), "Loaded sound catalog");
        Ok(catalog)
    }

    pub fn sound(&self, sound_id: &str) -> Result<&SoundEntry> {
        self.sounds
            .get(sound_id)
            .ok_or_else(|| Error::UnknownSound(sound_id.to_string()))
    }

    /// Folder holding the segment folders of `sound_id` at `bitrate_kbps`
    pub fn sound_base_path(&self, sound_id: &str, bitrate_kbps: u32) -> String {
        let base = self.base_path.trim_end_matches('/');
        if base.is_empty() {
            format!("{}/{}", sound_id, bitrate_kbps)
        } else {
            format!("{}/{}/{}", base, sound_id, bitrate_kbps)
        }
    }
}
