//! On-demand image derivatives with a disk-backed cache.
//!
//! A [`TransformRequest`] names an attachment and how it should be resized.
//! [`CacheStore::resolve`] turns it into a public path: the first call
//! renders the derivative through an [`ImageEngine`] and stores it under a
//! deterministic name, later calls find the file and return straight away.
//! When an attachment is edited or deleted the [`Invalidator`] removes every
//! derivative whose name starts with its id.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod library;
pub mod logging;
pub mod plan;
pub mod probe;
pub mod request;

pub use cache::{CacheKey, CacheKeyBuilder, CacheLayout, CacheStore, Invalidator, PurgeReport};
pub use config::{EngineKind, Settings};
pub use engine::{EngineOutput, ImageEngine, MagickEngine, NativeEngine, Operation};
pub use error::{ResizeError, Result};
pub use library::{Attachment, AttachmentListener, Library, SourceStore};
pub use plan::TransformPlan;
pub use probe::{probe_dimensions, Dimensions};
pub use request::{AttachmentId, Gravity, Mode, OutputFormat, TransformRequest};
