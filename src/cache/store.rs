//! Derivative cache store.
//!
//! Maps a request to a file under the cache directory, renders it on the
//! first miss and serves the existing file on every later call. A hit never
//! probes or touches the engine.
//!
//! Files are rendered into a temp file next to the target and renamed into
//! place, so a reader never sees a half-written derivative under its final
//! name. Two callers missing on the same key at once will both render; the
//! later rename wins with identical content.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::invalidate::Invalidator;
use super::key::CacheKeyBuilder;
use crate::engine::ImageEngine;
use crate::error::{ResizeError, Result};
use crate::library::SourceStore;
use crate::plan::TransformPlan;
use crate::probe::probe_dimensions;
use crate::request::{AttachmentId, TransformRequest};

/// Where derivatives live on disk and how they are addressed on the web.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    document_root: PathBuf,
    uploads_dir: String,
    cache_subdir: String,
    cache_version: Option<String>,
}

impl CacheLayout {
    pub fn new(document_root: impl Into<PathBuf>, uploads_dir: &str, cache_subdir: &str) -> Self {
        Self {
            document_root: document_root.into(),
            uploads_dir: uploads_dir.trim_matches('/').to_string(),
            cache_subdir: cache_subdir.trim_matches('/').to_string(),
            cache_version: None,
        }
    }

    /// Cache-busting value appended as `?ver=` to every public path.
    pub fn with_cache_version(mut self, version: Option<String>) -> Self {
        self.cache_version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.document_root.join(&self.uploads_dir).join(&self.cache_subdir)
    }

    fn version_suffix(&self) -> String {
        self.cache_version
            .as_ref()
            .map(|v| format!("?ver={v}"))
            .unwrap_or_default()
    }

    /// `/{uploads}/{cache}/{file}[?ver=…]`
    pub fn derivative_url(&self, file_name: &str) -> String {
        let mut url = String::from("/");
        if !self.uploads_dir.is_empty() {
            url.push_str(&self.uploads_dir);
            url.push('/');
        }
        url.push_str(&self.cache_subdir);
        url.push('/');
        url.push_str(file_name);
        url.push_str(&self.version_suffix());
        url
    }

    /// Public path of an original, relative to the document root.
    pub fn original_url(&self, source: &Path) -> Result<String> {
        let relative = source
            .strip_prefix(&self.document_root)
            .map(Path::to_path_buf)
            .or_else(|_| {
                let root = self.document_root.canonicalize()?;
                let source = source.canonicalize()?;
                source
                    .strip_prefix(root)
                    .map(Path::to_path_buf)
                    .map_err(|_| std::io::Error::from(std::io::ErrorKind::NotFound))
            })
            .map_err(|_| ResizeError::SourceOutsideRoot(source.to_path_buf()))?;

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(format!("/{}{}", parts.join("/"), self.version_suffix()))
    }
}

/// Largest width or height a request may ask for
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Resolves transform requests to public paths, rendering on a miss.
pub struct CacheStore {
    layout: CacheLayout,
    keys: CacheKeyBuilder,
    engine: Box<dyn ImageEngine>,
    max_dimension: u32,
}

impl CacheStore {
    pub fn new(layout: CacheLayout, keys: CacheKeyBuilder, engine: Box<dyn ImageEngine>) -> Self {
        Self {
            layout,
            keys,
            engine,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    /// Requests wider or taller than this fail before the engine runs.
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn check_size(&self, request: &TransformRequest) -> Result<()> {
        for (field, value) in [("width", request.width()), ("height", request.height())] {
            if let Some(value) = value.filter(|v| *v > self.max_dimension) {
                return Err(ResizeError::InvalidOption {
                    field,
                    value: format!("{value} (max {})", self.max_dimension),
                });
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    /// Listener that purges this store's cache directory.
    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.layout.cache_dir())
    }

    /// Public path for `request`, or an empty string if anything failed.
    ///
    /// Failures are logged at warn level and never returned; a missing
    /// image is better than a broken page.
    pub fn resolve(&self, sources: &dyn SourceStore, request: &TransformRequest) -> String {
        match self.try_resolve(sources, request) {
            Ok(path) => path,
            Err(e) => {
                warn!(attachment = %request.attachment_id(), "{e}");
                String::new()
            }
        }
    }

    /// String-typed entry point for templates.
    #[allow(clippy::too_many_arguments)]
    pub fn image_url(
        &self,
        sources: &dyn SourceStore,
        attachment_id: &str,
        width: Option<u32>,
        height: Option<u32>,
        mode: &str,
        background: Option<&str>,
        quality: f32,
        format: &str,
        gravity: Option<&str>,
    ) -> String {
        match TransformRequest::parse(attachment_id, width, height, mode, background, quality, format, gravity) {
            Ok(request) => self.resolve(sources, &request),
            Err(e) => {
                warn!(attachment = attachment_id, "{e}");
                String::new()
            }
        }
    }

    pub fn try_resolve(&self, sources: &dyn SourceStore, request: &TransformRequest) -> Result<String> {
        self.check_size(request)?;
        let source = source_file(sources, request.attachment_id())?;

        if !request.wants_resize() {
            return self.layout.original_url(&source);
        }

        let file_name = self.keys.file_name(request, &source);
        let target = self.layout.cache_dir().join(&file_name);

        if target.is_file() {
            debug!(file = %file_name, "cache hit");
            return Ok(self.layout.derivative_url(&file_name));
        }

        self.render(request, &source, &target)?;
        Ok(self.layout.derivative_url(&file_name))
    }

    /// Plan for `request` without running it.
    pub fn plan(&self, sources: &dyn SourceStore, request: &TransformRequest) -> Result<TransformPlan> {
        self.check_size(request)?;
        let source = source_file(sources, request.attachment_id())?;
        let target = self.layout.cache_dir().join(self.keys.file_name(request, &source));
        let native = probe_dimensions(self.engine.as_ref(), &source);
        Ok(TransformPlan::new(request, native, source, target))
    }

    fn render(&self, request: &TransformRequest, source: &Path, target: &Path) -> Result<()> {
        let dir = self.layout.cache_dir();
        fs::create_dir_all(&dir).map_err(|e| ResizeError::cache_write(&dir, e))?;

        let native = probe_dimensions(self.engine.as_ref(), source);
        let plan = TransformPlan::new(request, native, source, target);

        // Keep the extension: engines pick the encoder from it.
        let temp = tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(&format!(".{}", request.format().extension()))
            .tempfile_in(&dir)
            .map_err(|e| ResizeError::cache_write(&dir, e))?;

        plan.execute_into(self.engine.as_ref(), temp.path())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Temp files are created 0600; the web server has to read these
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o644))
                .map_err(|e| ResizeError::cache_write(temp.path(), e))?;
        }

        temp.persist(target)
            .map_err(|e| ResizeError::cache_write(target, e.error))?;

        info!(
            attachment = %request.attachment_id(),
            mode = %plan.mode,
            file = %target.display(),
            "generated derivative"
        );
        Ok(())
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("layout", &self.layout)
            .field("keys", &self.keys)
            .field("max_dimension", &self.max_dimension)
            .finish_non_exhaustive()
    }
}

fn source_file(sources: &dyn SourceStore, id: &AttachmentId) -> Result<PathBuf> {
    match sources.source_path(id)? {
        Some(path) if path.is_file() => Ok(path),
        path => Err(ResizeError::SourceMissing {
            id: id.to_string(),
            path,
        }),
    }
}
