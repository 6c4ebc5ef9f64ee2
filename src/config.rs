use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::{CacheKeyBuilder, CacheLayout, CacheStore, DEFAULT_MAX_DIMENSION};
use crate::engine::{ImageEngine, MagickEngine, NativeEngine};
use crate::error::Result;

/// Prefix of environment overrides, e.g. `ON_DEMAND__CACHE_VERSION=7`
pub const ENV_PREFIX: &str = "ON_DEMAND";

/// Which engine renders derivatives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// ImageMagick `convert` / `identify`
    Magick,
    /// Built-in `image` crate pipeline
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Web root the public paths are relative to
    pub document_root: PathBuf,
    /// Uploads directory, relative to the document root
    pub uploads_dir: String,
    /// Derivative directory inside the uploads directory
    pub cache_subdir: String,
    /// Appended to every public path as `?ver=`
    pub cache_version: Option<String>,
    /// Mixed into every cache key
    pub key_version: u32,
    /// Largest width or height a request may ask for
    pub max_dimension: u32,
    pub engine: EngineKind,
    pub convert_bin: String,
    pub identify_bin: String,
    /// SQLite attachment catalog
    pub library_path: PathBuf,
}

impl Settings {
    /// Defaults overlaid with `ON_DEMAND__*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_from(env: Environment) -> Result<Self> {
        let s = Config::builder()
            .set_default("document_root", ".")?
            .set_default("uploads_dir", "wp-content/uploads")?
            .set_default("cache_subdir", "resized")?
            .set_default("key_version", 1)?
            .set_default("max_dimension", i64::from(DEFAULT_MAX_DIMENSION))?
            .set_default("engine", "magick")?
            .set_default("convert_bin", "convert")?
            .set_default("identify_bin", "identify")?
            .set_default("library_path", default_library_path().to_string_lossy().into_owned())?
            .add_source(env)
            .build()?;

        Ok(s.try_deserialize()?)
    }

    pub fn layout(&self) -> CacheLayout {
        CacheLayout::new(&self.document_root, &self.uploads_dir, &self.cache_subdir)
            .with_cache_version(self.cache_version.clone())
    }

    pub fn key_builder(&self) -> CacheKeyBuilder {
        CacheKeyBuilder::new(self.key_version)
    }

    /// Store wired with this layout, key builder, engine and size cap.
    pub fn store(&self) -> CacheStore {
        CacheStore::new(self.layout(), self.key_builder(), self.engine())
            .with_max_dimension(self.max_dimension)
    }

    pub fn engine(&self) -> Box<dyn ImageEngine> {
        match self.engine {
            EngineKind::Magick => Box::new(MagickEngine::new(&self.convert_bin, &self.identify_bin)),
            EngineKind::Native => Box::new(NativeEngine::new()),
        }
    }
}

/// `<data dir>/on-demand-image/library.db`
///
/// - Linux: ~/.local/share/on-demand-image/library.db
/// - macOS: ~/Library/Application Support/on-demand-image/library.db
/// - Windows: %APPDATA%\on-demand-image\library.db
fn default_library_path() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push("on-demand-image");
    path.push("library.db");
    path
}
