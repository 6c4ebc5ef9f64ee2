/// Native dimension probe
///
/// Asks the engine for `WIDTHxHEIGHT` and reads it strictly. Any failure just
/// means "unknown"; the only thing that depends on the answer is the default
/// crop gravity.

use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::engine::ImageEngine;
use crate::error::ResizeError;

/// Native pixel size of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

/// Probe the native size of `path`, or `None` if it cannot be known.
pub fn probe_dimensions(engine: &dyn ImageEngine, path: &Path) -> Option<Dimensions> {
    if !path.is_file() {
        return None;
    }
    match try_probe(engine, path) {
        Ok(dimensions) => Some(dimensions),
        Err(e) => {
            debug!("{e}; continuing with unknown dimensions");
            None
        }
    }
}

fn try_probe(engine: &dyn ImageEngine, path: &Path) -> Result<Dimensions, ResizeError> {
    let failure = |reason: String| ResizeError::ProbeFailure {
        path: path.to_path_buf(),
        reason,
    };
    let output = engine.identify(path)?;
    if !output.is_success() {
        return Err(failure(format!("identify exited with {:?}: {}", output.status, output.output.trim())));
    }
    parse_dimensions(output.output.trim())
        .ok_or_else(|| failure(format!("unexpected identify output {:?}", output.output)))
}

/// Read a leading `WIDTHxHEIGHT`; whatever follows is ignored.
pub fn parse_dimensions(text: &str) -> Option<Dimensions> {
    let (width, rest) = leading_integer(text)?;
    let rest = rest.strip_prefix('x')?;
    let (height, _) = leading_integer(rest)?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(Dimensions { width, height })
}

fn leading_integer(text: &str) -> Option<(u32, &str)> {
    let end = text.bytes().take_while(u8::is_ascii_digit).count();
    if end == 0 {
        return None;
    }
    let value = text[..end].parse().ok()?;
    Some((value, &text[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NativeEngine;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1200x800"), Some(Dimensions { width: 1200, height: 800 }));
        assert_eq!(parse_dimensions("640x480 extra"), Some(Dimensions { width: 640, height: 480 }));
    }

    #[test]
    fn test_parse_dimensions_rejects_garbage() {
        for text in ["", "x800", "1200x", " 1200x800", "1,200x800", "1200X800", "0x10", "99999999999x1"] {
            assert_eq!(parse_dimensions(text), None, "{text:?}");
        }
    }

    #[test]
    fn test_probe_missing_file_is_unknown() {
        assert_eq!(probe_dimensions(&NativeEngine, Path::new("/nonexistent/a.jpg")), None);
    }

    #[test]
    fn test_probe_directory_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(probe_dimensions(&NativeEngine, dir.path()), None);
    }

    #[test]
    fn test_probe_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portrait.png");
        RgbaImage::from_pixel(400, 800, Rgba([1, 2, 3, 255])).save(&path).unwrap();
        let dims = probe_dimensions(&NativeEngine, &path).unwrap();
        assert_eq!(dims, Dimensions { width: 400, height: 800 });
        assert!(dims.is_portrait());
    }

    #[test]
    fn test_probe_undecodable_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert_eq!(probe_dimensions(&NativeEngine, &path), None);
    }
}
