// src/imaging/transform.rs
// =============================================================================
// Named image-to-image operations.
//
// Every transform implements the Transform trait:
// - name(): a stable identifier, also used as the cache directory name
// - apply(): decodes the source, produces a new image, encodes it as PNG
//
// A transform never panics on bad input. If the source cannot be decoded
// (unsupported or corrupt format) it returns a TransformError and the
// pipeline simply produces one image fewer.
//
// Rust concepts:
// - Trait objects (Arc<dyn Transform>): the pipeline holds a list of
//   transforms without knowing their concrete types
// - Send + Sync: transforms are shared by tasks running on many threads
// =============================================================================

use std::io::Cursor;
use std::sync::Arc;

use clap::ValueEnum;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use super::Image;
use crate::error::TransformError;

pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, image: &Image) -> Result<Image, TransformError>;
}

// The transforms that ship with the crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Convert to shades of grey
    Grayscale,
    /// Old-photo brown tones
    Sepia,
    /// Warm colour cast
    Tint,
    /// Photographic negative
    Invert,
    /// Gaussian blur
    Blur,
    /// Shrink to fit 128x128, keeping the aspect ratio
    Thumbnail,
}

impl TransformKind {
    pub fn name(self) -> &'static str {
        match self {
            TransformKind::Grayscale => "grayscale",
            TransformKind::Sepia => "sepia",
            TransformKind::Tint => "tint",
            TransformKind::Invert => "invert",
            TransformKind::Blur => "blur",
            TransformKind::Thumbnail => "thumbnail",
        }
    }

    pub fn build(self) -> Arc<dyn Transform> {
        Arc::new(BuiltinTransform { kind: self })
    }
}

const BLUR_SIGMA: f32 = 2.0;
const THUMBNAIL_SIZE: u32 = 128;

#[derive(Debug, Clone, Copy)]
pub struct BuiltinTransform {
    kind: TransformKind,
}

impl Transform for BuiltinTransform {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn apply(&self, image: &Image) -> Result<Image, TransformError> {
        let decoded = image::load_from_memory_with_format(image.bytes(), image.format())
            .map_err(|source| TransformError::Decode {
                url: image.source().to_string(),
                source,
            })?;

        let output = match self.kind {
            TransformKind::Grayscale => decoded.grayscale(),
            TransformKind::Sepia => map_rgb(&decoded, |[r, g, b]| {
                [
                    0.393 * r + 0.769 * g + 0.189 * b,
                    0.349 * r + 0.686 * g + 0.168 * b,
                    0.272 * r + 0.534 * g + 0.131 * b,
                ]
            }),
            TransformKind::Tint => map_rgb(&decoded, |[r, g, b]| [r, g * 0.85, b * 0.7]),
            TransformKind::Invert => {
                let mut inverted = decoded;
                inverted.invert();
                inverted
            }
            TransformKind::Blur => decoded.blur(BLUR_SIGMA),
            TransformKind::Thumbnail => decoded.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE),
        };

        let mut encoded = Cursor::new(Vec::new());
        output
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|source| TransformError::Encode {
                transform: self.name().to_string(),
                source,
            })?;

        Ok(image.derive(self.name(), ImageFormat::Png, encoded.into_inner()))
    }
}

// Applies a per-pixel colour mapping, leaving alpha untouched
fn map_rgb(source: &DynamicImage, f: impl Fn([f32; 3]) -> [f32; 3]) -> DynamicImage {
    let mut rgba = source.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let [r, g, b] = f([r as f32, g as f32, b as f32]);
        pixel.0 = [clamp(r), clamp(g), clamp(b), a];
    }
    DynamicImage::ImageRgba8(rgba)
}

fn clamp(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
