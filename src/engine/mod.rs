//! Image engines.
//!
//! The cache never touches pixels itself. It hands an ordered list of
//! [`Operation`]s to an [`ImageEngine`] and looks at the exit status:
//!
//! - [`MagickEngine`] runs ImageMagick's `identify` and `convert` as argument
//!   vectors (no shell).
//! - [`NativeEngine`] interprets the same list in-process with the `image`
//!   crate, for hosts without ImageMagick.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::request::Gravity;

pub mod magick;
pub mod native;

pub use magick::MagickEngine;
pub use native::NativeEngine;

/// Resize bounds in ImageMagick geometry terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Cover the box instead of fitting inside it (`^` flag).
    pub fill: bool,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(w) = self.width {
            write!(f, "{w}")?;
        }
        f.write_str("x")?;
        if let Some(h) = self.height {
            write!(f, "{h}")?;
        }
        if self.fill {
            f.write_str("^")?;
        }
        Ok(())
    }
}

/// One step of a transform, in engine-neutral form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Operation {
    /// Merge layers into one
    Flatten,
    /// Drop profiles and comments
    Strip,
    /// Composite transparent pixels over the background
    AlphaRemove,
    /// Background color used by alpha removal and padding
    Background(String),
    /// Anchor for subsequent extents
    Gravity(Gravity),
    Resize(Geometry),
    /// Pad or crop to exactly this box
    Extent { width: u32, height: u32 },
    /// Encoder quality, 0-100
    Quality(u8),
}

impl Operation {
    /// ImageMagick command line arguments for this step
    pub fn magick_args(&self) -> Vec<String> {
        match self {
            Operation::Flatten => vec!["-flatten".into()],
            Operation::Strip => vec!["-strip".into()],
            Operation::AlphaRemove => vec!["-alpha".into(), "remove".into()],
            Operation::Background(color) => vec!["-background".into(), color.clone()],
            Operation::Gravity(gravity) => vec!["-gravity".into(), gravity.as_str().into()],
            Operation::Resize(geometry) => vec!["-resize".into(), geometry.to_string()],
            Operation::Extent { width, height } => {
                vec!["-extent".into(), format!("{width}x{height}")]
            }
            Operation::Quality(quality) => vec!["-quality".into(), quality.to_string()],
        }
    }
}

/// What an engine run reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Exit status; `None` when the process died from a signal.
    pub status: Option<i32>,
    /// Everything written to stdout and stderr.
    pub output: String,
}

impl EngineOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            status: Some(1),
            output: output.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Black-box pixel processor.
///
/// `Err` means the engine could not be started; a run that fails is an
/// `Ok` with a non-zero status so the caller keeps the diagnostics.
pub trait ImageEngine {
    /// Raw `WIDTHxHEIGHT` text for `source`.
    fn identify(&self, source: &Path) -> Result<EngineOutput>;

    /// Apply `operations` to `source` and write the result to `output`.
    fn convert(&self, source: &Path, operations: &[Operation], output: &Path) -> Result<EngineOutput>;

    /// Printable form of a convert call, for diagnostics.
    fn describe(&self, source: &Path, operations: &[Operation], output: &Path) -> String {
        let mut parts = vec![quote(&source.to_string_lossy())];
        parts.extend(operations.iter().flat_map(Operation::magick_args).map(|a| quote(&a)));
        parts.push(quote(&output.to_string_lossy()));
        parts.join(" ")
    }
}

impl<E: ImageEngine + ?Sized> ImageEngine for Box<E> {
    fn identify(&self, source: &Path) -> Result<EngineOutput> {
        (**self).identify(source)
    }

    fn convert(&self, source: &Path, operations: &[Operation], output: &Path) -> Result<EngineOutput> {
        (**self).convert(source, operations, output)
    }

    fn describe(&self, source: &Path, operations: &[Operation], output: &Path) -> String {
        (**self).describe(source, operations, output)
    }
}

/// Quote an argument for display only; nothing here is ever run by a shell.
pub(crate) fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=^#%+,@".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_strings() {
        let both = Geometry { width: Some(300), height: Some(200), fill: false };
        let width_only = Geometry { width: Some(300), height: None, fill: false };
        let height_only = Geometry { width: None, height: Some(200), fill: false };
        let cover = Geometry { width: Some(300), height: Some(200), fill: true };
        assert_eq!(both.to_string(), "300x200");
        assert_eq!(width_only.to_string(), "300x");
        assert_eq!(height_only.to_string(), "x200");
        assert_eq!(cover.to_string(), "300x200^");
    }

    #[test]
    fn test_magick_args() {
        assert_eq!(Operation::AlphaRemove.magick_args(), ["-alpha", "remove"]);
        assert_eq!(
            Operation::Extent { width: 10, height: 20 }.magick_args(),
            ["-extent", "10x20"]
        );
        assert_eq!(Operation::Gravity(Gravity::North).magick_args(), ["-gravity", "north"]);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("/tmp/a.jpg"), "/tmp/a.jpg");
        assert_eq!(quote("my photo.jpg"), "'my photo.jpg'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }
}
