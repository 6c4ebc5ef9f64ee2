//! Cache key derivation.
//!
//! Only parameters that change the output pixels go into the key, so
//! requests that differ in irrelevant fields share one cached file.

use std::fmt;
use std::path::Path;

use crate::request::{Mode, TransformRequest};

/// Join character between key parts
const KEY_DELIMITER: &str = "|";

/// Compute XXH128 of `data` as 32 lowercase hex characters.
pub fn hash_bytes(data: &[u8]) -> String {
    let hash: u128 = xxhash_rust::xxh3::xxh3_128(data);
    format!("{:032x}", hash)
}

/// Hash of the pixel-affecting request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives keys and derivative file names.
///
/// `key_version` is mixed into every key; bump it when planning changes so
/// old derivatives stop matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    key_version: u32,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CacheKeyBuilder {
    pub fn new(key_version: u32) -> Self {
        Self { key_version }
    }

    pub fn key_version(&self) -> u32 {
        self.key_version
    }

    /// Ordered `name=value` parts that go into the hash.
    pub fn key_parts(&self, request: &TransformRequest) -> Vec<String> {
        let mode = request.effective_mode();
        let mut parts = vec![format!("v{}", self.key_version), format!("mode={mode}")];
        if let Some(color) = request.background() {
            parts.push(format!("bg={color}"));
        }
        if request.format().is_lossy() {
            parts.push(format!("q={}", request.quality_percent()));
        }
        if let (Mode::Crop, Some(gravity)) = (mode, request.gravity()) {
            parts.push(format!("gravity={gravity}"));
        }
        parts
    }

    pub fn key(&self, request: &TransformRequest) -> CacheKey {
        CacheKey(hash_bytes(self.key_parts(request).join(KEY_DELIMITER).as_bytes()))
    }

    /// `{id}_{width}x{height}-{key}-{basename}.{ext}`
    ///
    /// A missing bound renders as an empty string, e.g. `42_300x-…`.
    pub fn file_name(&self, request: &TransformRequest, source: &Path) -> String {
        let dim = |v: Option<u32>| v.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{}_{}x{}-{}-{}.{}",
            request.attachment_id(),
            dim(request.width()),
            dim(request.height()),
            self.key(request),
            sanitized_basename(source),
            request.format().extension()
        )
    }
}

/// Source file stem reduced to `[A-Za-z0-9._-]`.
pub fn sanitized_basename(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
