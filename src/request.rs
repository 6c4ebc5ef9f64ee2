/// Transform requests and their parameter types
///
/// A request is built once per call, never persisted, and carries everything
/// the cache key, the planner and the store need to know about a derivative.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ResizeError, Result};

/// Quality used when the caller does not pick one
pub const DEFAULT_QUALITY: f32 = 0.8;

/// Opaque attachment identifier
///
/// Only ASCII alphanumerics are accepted. The id ends up in file names and in
/// the prefix filter used for invalidation, so separators like `-` and `_`
/// would let one id match another's derivatives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttachmentId(String);

impl AttachmentId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ResizeError::InvalidAttachmentId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<i64> for AttachmentId {
    type Error = ResizeError;

    fn try_from(id: i64) -> Result<Self> {
        if id < 0 {
            return Err(ResizeError::InvalidAttachmentId(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }
}

impl TryFrom<String> for AttachmentId {
    type Error = ResizeError;

    fn try_from(raw: String) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<AttachmentId> for String {
    fn from(id: AttachmentId) -> Self {
        id.0
    }
}

impl FromStr for AttachmentId {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the source is fitted into the requested box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Scale inside the bounds, keep aspect ratio, no padding
    #[default]
    Fit,
    /// Scale inside the box, then pad to exactly the box
    Exact,
    /// Scale to cover the box, then crop to it at a gravity
    Crop,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Fit => "fit",
            Mode::Exact => "exact",
            Mode::Crop => "crop",
        }
    }
}

impl FromStr for Mode {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fit" => Ok(Mode::Fit),
            "exact" => Ok(Mode::Exact),
            "crop" => Ok(Mode::Crop),
            other => Err(ResizeError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpg,
    Png,
}

impl OutputFormat {
    /// File extension of derivatives in this format
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    /// Whether the encoder takes a quality setting
    pub fn is_lossy(self) -> bool {
        matches!(self, OutputFormat::Jpg)
    }
}

impl FromStr for OutputFormat {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(ResizeError::InvalidFormat(s.to_string())),
        }
    }
}

/// Anchor point for crop and extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    #[default]
    Center,
    East,
    SouthWest,
    South,
    SouthEast,
}

impl Gravity {
    pub fn as_str(self) -> &'static str {
        match self {
            Gravity::NorthWest => "northwest",
            Gravity::North => "north",
            Gravity::NorthEast => "northeast",
            Gravity::West => "west",
            Gravity::Center => "center",
            Gravity::East => "east",
            Gravity::SouthWest => "southwest",
            Gravity::South => "south",
            Gravity::SouthEast => "southeast",
        }
    }

    /// Offset of an `inner` span inside an `outer` span along x and y.
    ///
    /// Negative values mean the inner span overflows and gets cropped.
    pub fn offset(self, outer: (u32, u32), inner: (u32, u32)) -> (i64, i64) {
        let free_x = outer.0 as i64 - inner.0 as i64;
        let free_y = outer.1 as i64 - inner.1 as i64;
        let x = match self {
            Gravity::NorthWest | Gravity::West | Gravity::SouthWest => 0,
            Gravity::North | Gravity::Center | Gravity::South => free_x / 2,
            Gravity::NorthEast | Gravity::East | Gravity::SouthEast => free_x,
        };
        let y = match self {
            Gravity::NorthWest | Gravity::North | Gravity::NorthEast => 0,
            Gravity::West | Gravity::Center | Gravity::East => free_y / 2,
            Gravity::SouthWest | Gravity::South | Gravity::SouthEast => free_y,
        };
        (x, y)
    }
}

impl FromStr for Gravity {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "northwest" => Ok(Gravity::NorthWest),
            "north" => Ok(Gravity::North),
            "northeast" => Ok(Gravity::NorthEast),
            "west" => Ok(Gravity::West),
            "center" | "centre" => Ok(Gravity::Center),
            "east" => Ok(Gravity::East),
            "southwest" => Ok(Gravity::SouthWest),
            "south" => Ok(Gravity::South),
            "southeast" => Ok(Gravity::SouthEast),
            _ => Err(ResizeError::InvalidGravity(s.to_string())),
        }
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One derivative request
///
/// Built with [`TransformRequest::new`] and the `with_*` methods. A zero
/// width or height counts as "not given".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransformRequest {
    attachment_id: AttachmentId,
    width: Option<u32>,
    height: Option<u32>,
    mode: Mode,
    background: Option<String>,
    quality: f32,
    format: OutputFormat,
    gravity: Option<Gravity>,
}

impl TransformRequest {
    /// Request for the untouched original
    pub fn new(attachment_id: AttachmentId) -> Self {
        Self {
            attachment_id,
            width: None,
            height: None,
            mode: Mode::default(),
            background: None,
            quality: DEFAULT_QUALITY,
            format: OutputFormat::default(),
            gravity: None,
        }
    }

    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width.filter(|w| *w > 0);
        self.height = height.filter(|h| *h > 0);
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Solid background composited under transparent areas and padding.
    ///
    /// The value is handed to the engine as a single argument, so it only
    /// has to be safe for the cache key and for argument parsing.
    pub fn with_background(mut self, background: Option<&str>) -> Result<Self> {
        self.background = match background.map(str::trim) {
            None | Some("") => None,
            Some(color) => {
                if color.starts_with('-') || color.contains('|') || color.chars().any(char::is_control) {
                    return Err(ResizeError::InvalidOption {
                        field: "background",
                        value: color.to_string(),
                    });
                }
                Some(color.to_string())
            }
        };
        Ok(self)
    }

    /// Quality in 0..=1, clamped. Non-finite values fall back to the default.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = if quality.is_finite() {
            quality.clamp(0.0, 1.0)
        } else {
            DEFAULT_QUALITY
        };
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_gravity(mut self, gravity: Option<Gravity>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Build a request from the loosely typed values page templates pass in
    #[allow(clippy::too_many_arguments)]
    pub fn parse(
        attachment_id: &str,
        width: Option<u32>,
        height: Option<u32>,
        mode: &str,
        background: Option<&str>,
        quality: f32,
        format: &str,
        gravity: Option<&str>,
    ) -> Result<Self> {
        let mode: Mode = mode.parse()?;
        let id = AttachmentId::new(attachment_id)?;
        let format: OutputFormat = format.parse()?;
        let gravity = gravity.map(str::parse::<Gravity>).transpose()?;

        Ok(Self::new(id)
            .with_size(width, height)
            .with_mode(mode)
            .with_background(background)?
            .with_quality(quality)
            .with_format(format)
            .with_gravity(gravity))
    }

    pub fn attachment_id(&self) -> &AttachmentId {
        &self.attachment_id
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Mode as requested by the caller
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Mode actually applied: a single bound always means `fit`.
    pub fn effective_mode(&self) -> Mode {
        match (self.width, self.height) {
            (Some(_), Some(_)) => self.mode,
            _ => Mode::Fit,
        }
    }

    pub fn background(&self) -> Option<&str> {
        self.background.as_deref()
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Quality as the 0-100 integer the encoder receives
    pub fn quality_percent(&self) -> u8 {
        (self.quality * 100.0).round() as u8
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Explicit gravity override, if any
    pub fn gravity(&self) -> Option<Gravity> {
        self.gravity
    }

    /// Whether any resizing was asked for at all
    pub fn wants_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> AttachmentId {
        AttachmentId::new(raw).unwrap()
    }

    #[test]
    fn test_attachment_id_rejects_separators() {
        assert!(AttachmentId::new("42").is_ok());
        assert!(AttachmentId::new("abc123").is_ok());
        for bad in ["", "4-2", "4_2", "../4", "4 2", "4*", "42/"] {
            assert!(
                matches!(AttachmentId::new(bad), Err(ResizeError::InvalidAttachmentId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_attachment_id_from_integer() {
        assert_eq!(AttachmentId::try_from(42_i64).unwrap().as_str(), "42");
        assert_eq!(AttachmentId::try_from(0_i64).unwrap().as_str(), "0");
        // -5 must not alias attachment 5
        assert!(matches!(
            AttachmentId::try_from(-5_i64),
            Err(ResizeError::InvalidAttachmentId(ref raw)) if raw == "-5"
        ));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("crop".parse::<Mode>().unwrap(), Mode::Crop);
        let err = "stretch".parse::<Mode>().unwrap_err();
        assert!(matches!(err, ResizeError::InvalidMode(ref m) if m == "stretch"));
    }

    #[test]
    fn test_single_bound_forces_fit() {
        let request = TransformRequest::new(id("1"))
            .with_size(Some(300), None)
            .with_mode(Mode::Crop);
        assert_eq!(request.mode(), Mode::Crop);
        assert_eq!(request.effective_mode(), Mode::Fit);

        let request = TransformRequest::new(id("1"))
            .with_size(Some(300), Some(200))
            .with_mode(Mode::Crop);
        assert_eq!(request.effective_mode(), Mode::Crop);
    }

    #[test]
    fn test_zero_dimension_is_absent() {
        let request = TransformRequest::new(id("1")).with_size(Some(0), Some(0));
        assert!(!request.wants_resize());
    }

    #[test]
    fn test_quality_clamped() {
        let request = TransformRequest::new(id("1")).with_quality(1.7);
        assert_eq!(request.quality_percent(), 100);
        let request = TransformRequest::new(id("1")).with_quality(f32::NAN);
        assert_eq!(request.quality_percent(), 80);
    }

    #[test]
    fn test_background_validation() {
        let request = TransformRequest::new(id("1"))
            .with_background(Some("  "))
            .unwrap();
        assert_eq!(request.background(), None);

        assert!(TransformRequest::new(id("1")).with_background(Some("-fx evil")).is_err());
        assert!(TransformRequest::new(id("1")).with_background(Some("#fff|q=1")).is_err());
    }

    #[test]
    fn test_gravity_offsets() {
        assert_eq!(Gravity::Center.offset((300, 200), (300, 450)), (0, -125));
        assert_eq!(Gravity::North.offset((300, 200), (300, 450)), (0, 0));
        assert_eq!(Gravity::SouthEast.offset((300, 200), (100, 100)), (200, 100));
    }

    #[test]
    fn test_parse_and_json() {
        let request = TransformRequest::parse(
            "42",
            Some(300),
            Some(200),
            "crop",
            Some("#ffffff"),
            0.9,
            "jpeg",
            Some("south"),
        )
        .unwrap();
        assert_eq!(request.format(), OutputFormat::Jpg);
        assert_eq!(request.gravity(), Some(Gravity::South));

        let json = request.to_json().unwrap();
        let restored = TransformRequest::from_json(&json).unwrap();
        assert_eq!(request, restored);
    }

    #[test]
    fn test_json_rejects_bad_id() {
        let json = r#"{"attachment_id":"4-2","width":null,"height":null,"mode":"fit",
            "background":null,"quality":0.8,"format":"jpg","gravity":null}"#;
        assert!(TransformRequest::from_json(json).is_err());
    }
}
