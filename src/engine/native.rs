//! In-process engine built on the `image` crate.
//!
//! Understands the same operation list the ImageMagick engine receives, with
//! the same geometry rules, so derivatives look alike whichever engine made
//! them. Failures come back as a status-1 [`EngineOutput`] the way a command
//! line tool would report them.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use super::{EngineOutput, Geometry, ImageEngine, Operation};
use crate::error::Result;
use crate::request::Gravity;

/// JPEG quality when the operation list does not set one
const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Largest buffer any step may allocate, in pixels
const MAX_PIXELS: u64 = 1 << 28;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Pure Rust engine, no external binaries needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ImageEngine for NativeEngine {
    fn identify(&self, source: &Path) -> Result<EngineOutput> {
        Ok(match image::image_dimensions(source) {
            Ok((width, height)) => EngineOutput::success(format!("{width}x{height}")),
            Err(e) => EngineOutput::failure(format!("identify: {}: {e}", source.display())),
        })
    }

    fn convert(&self, source: &Path, operations: &[Operation], output: &Path) -> Result<EngineOutput> {
        Ok(match transform(source, operations, output) {
            Ok(()) => EngineOutput::success(""),
            Err(message) => EngineOutput::failure(format!("convert: {message}")),
        })
    }
}

/// Settings in effect while walking the operation list
struct Settings {
    background: Rgba<u8>,
    gravity: Gravity,
    quality: u8,
}

fn transform(source: &Path, operations: &[Operation], output: &Path) -> std::result::Result<(), String> {
    let format = ImageFormat::from_path(output).map_err(|e| format!("{}: {e}", output.display()))?;

    // Alpha removal uses whichever background the list asks for, wherever
    // it appears.
    let background = operations
        .iter()
        .find_map(|op| match op {
            Operation::Background(color) => Some(color.as_str()),
            _ => None,
        })
        .map(|color| parse_color(color).ok_or_else(|| format!("unrecognized color `{color}'")))
        .transpose()?
        .unwrap_or(WHITE);

    let mut settings = Settings {
        background,
        gravity: Gravity::Center,
        quality: DEFAULT_JPEG_QUALITY,
    };

    let mut img = image::open(source)
        .map_err(|e| format!("unable to open image `{}': {e}", source.display()))?
        .to_rgba8();

    for op in operations {
        match op {
            // Decoding already yields a single frame without metadata
            Operation::Flatten | Operation::Strip => {}
            Operation::AlphaRemove => remove_alpha(&mut img, settings.background),
            Operation::Background(_) => {}
            Operation::Gravity(gravity) => settings.gravity = *gravity,
            Operation::Resize(geometry) => img = resize(&img, geometry)?,
            Operation::Extent { width, height } => {
                img = extent(&img, *width, *height, settings.gravity, settings.background)?
            }
            Operation::Quality(quality) => settings.quality = (*quality).clamp(1, 100),
        }
    }

    save(img, format, settings.quality, output)
}

/// Composite every pixel over `background`.
fn remove_alpha(img: &mut RgbaImage, background: Rgba<u8>) {
    let bg_alpha = background[3] as f32 / 255.0;
    for pixel in img.pixels_mut() {
        let alpha = pixel[3] as f32 / 255.0;
        let out_alpha = alpha + bg_alpha * (1.0 - alpha);
        if out_alpha <= 0.0 {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }
        for c in 0..3 {
            let value = (pixel[c] as f32 * alpha + background[c] as f32 * bg_alpha * (1.0 - alpha)) / out_alpha;
            pixel[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        pixel[3] = (out_alpha * 255.0).round() as u8;
    }
}

/// Target size for a resize, following ImageMagick geometry rules.
pub(crate) fn resized_dimensions(source: (u32, u32), geometry: &Geometry) -> Option<(u32, u32)> {
    let (sw, sh) = (source.0 as f64, source.1 as f64);
    if sw == 0.0 || sh == 0.0 {
        return None;
    }
    let scale = match (geometry.width, geometry.height) {
        (Some(w), Some(h)) => {
            let (sx, sy) = (w as f64 / sw, h as f64 / sh);
            if geometry.fill {
                sx.max(sy)
            } else {
                sx.min(sy)
            }
        }
        (Some(w), None) => w as f64 / sw,
        (None, Some(h)) => h as f64 / sh,
        (None, None) => return Some(source),
    };
    let width = ((sw * scale).round() as u32).max(1);
    let height = ((sh * scale).round() as u32).max(1);
    Some((width, height))
}

fn resize(img: &RgbaImage, geometry: &Geometry) -> std::result::Result<RgbaImage, String> {
    let (width, height) = resized_dimensions(img.dimensions(), geometry)
        .ok_or_else(|| "image has no pixels".to_string())?;
    check_area(width, height)?;
    if (width, height) == img.dimensions() {
        return Ok(img.clone());
    }
    Ok(imageops::resize(img, width, height, FilterType::Lanczos3))
}

fn extent(
    img: &RgbaImage,
    width: u32,
    height: u32,
    gravity: Gravity,
    background: Rgba<u8>,
) -> std::result::Result<RgbaImage, String> {
    if width == 0 || height == 0 {
        return Err(format!("invalid extent {width}x{height}"));
    }
    check_area(width, height)?;
    let mut canvas = RgbaImage::from_pixel(width, height, background);
    let (x, y) = gravity.offset((width, height), img.dimensions());
    imageops::overlay(&mut canvas, img, x, y);
    Ok(canvas)
}

fn check_area(width: u32, height: u32) -> std::result::Result<(), String> {
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(format!("width or height exceeds limit ({width}x{height})"));
    }
    Ok(())
}

fn save(img: RgbaImage, format: ImageFormat, quality: u8, output: &Path) -> std::result::Result<(), String> {
    let write_err = |e: &dyn std::fmt::Display| format!("unable to write `{}': {e}", output.display());
    let file = File::create(output).map_err(|e| write_err(&e))?;
    let mut writer = BufWriter::new(file);
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
            JpegEncoder::new_with_quality(&mut writer, quality)
                .encode_image(&rgb)
                .map_err(|e| write_err(&e))?;
        }
        ImageFormat::Png => DynamicImage::ImageRgba8(img)
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| write_err(&e))?,
        other => return Err(format!("no encoder for {other:?}")),
    }
    // Dropping the writer would swallow a failed final flush
    writer.into_inner().map_err(|e| write_err(e.error()))?;
    Ok(())
}

/// Parse the color names and hex forms accepted as backgrounds.
pub(crate) fn parse_color(color: &str) -> Option<Rgba<u8>> {
    let color = color.trim().to_ascii_lowercase();
    if let Some(hex) = color.strip_prefix('#') {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok().map(|v| v * 17);
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return match hex.len() {
            3 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
            4 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?])),
            6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
            8 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
            _ => None,
        };
    }
    let rgb = match color.as_str() {
        "transparent" | "none" => return Some(Rgba([0, 0, 0, 0])),
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        "red" => [255, 0, 0],
        "lime" => [0, 255, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "gray" | "grey" => [190, 190, 190],
        _ => return None,
    };
    Some(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}
