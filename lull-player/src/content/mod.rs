//! Content store access
//!
//! The core consumes a remote content store through [`ContentStore`]: raw bytes
//! for chunks and the catalog manifest, UTF-8 text for index files. Any
//! non-success response is an error.

pub mod http;
pub mod index;
pub mod manifest;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpContentStore;
pub use index::{index_base_path, parse_index};
pub use manifest::{Catalog, SegmentEntry, SoundEntry};

/// Remote content store
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch raw bytes (chunks, manifest JSON)
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// Fetch UTF-8 text (index files)
    async fn fetch_text(&self, path: &str) -> Result<String>;
}
