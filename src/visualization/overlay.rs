use crate::data::{ProjectionImage, TransformedPair};
use image::{Rgb, RgbImage};

/// Per-image linear rescale of samples onto `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelScale {
    min: f64,
    scale: f64,
}

impl ChannelScale {
    pub fn of(image: &ProjectionImage) -> Self {
        let (min, max) = image.min_max();
        let range = max - min;
        let scale = if range > 0.0 && range.is_finite() {
            255.0 / range
        } else {
            0.0
        };
        Self { min, scale }
    }

    /// Truncates toward zero; a constant image maps to 0.
    pub fn apply(&self, value: f64) -> u8 {
        ((value - self.min) * self.scale).clamp(0.0, 255.0) as u8
    }
}

/// Compose the preview: first image in red, last image in green and blue.
///
/// Where the pair lines up the overlay is grey; misaligned features show
/// as red/cyan fringes.
pub fn compose_overlay(pair: &TransformedPair) -> RgbImage {
    let (width, height) = pair.dimensions();
    let first_scale = ChannelScale::of(&pair.first);
    let last_scale = ChannelScale::of(&pair.last);

    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let red = first_scale.apply(pair.first.get(x, y));
        let cyan = last_scale.apply(pair.last.get(x, y));
        Rgb([red, cyan, cyan])
    })
}

/// Overlay packed as `0x00RRGGBB` words, row-major.
pub fn packed_overlay(pair: &TransformedPair) -> Vec<u32> {
    compose_overlay(pair)
        .pixels()
        .map(|p| ((p[0] as u32) << 16) + ((p[1] as u32) << 8) + p[2] as u32)
        .collect()
}
