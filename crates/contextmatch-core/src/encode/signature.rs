//! Signature Image Encoder
//!
//! Deterministic visual-signature encoder: downsamples a decoded image into
//! a fixed grid of color means, local luma gradients, and a global color
//! histogram. It is the general-purpose execution path for the image
//! channel; a model-backed encoder can be injected through the
//! [`ImageEncoder`](super::ImageEncoder) capability without touching the
//! pipeline.

use image::DynamicImage;

use super::{ImageEncoder, Result};
use crate::embedding::{IMAGE_DIMENSIONS, l2_normalize};

/// Grid resolution for cell statistics
const GRID: usize = 8;
/// Histogram bins (4 levels per RGB channel = 64, x4 luma bands = 256)
const HIST_BINS: usize = 256;

// 8x8 grid x RGB means (192) + 8x8 luma gradients (64) + 256-bin histogram
// = 512 features, matching IMAGE_DIMENSIONS.
const FEATURES: usize = GRID * GRID * 3 + GRID * GRID + HIST_BINS;

/// Deterministic visual-signature image encoder
#[derive(Debug, Clone, Default)]
pub struct SignatureImageEncoder;

impl ImageEncoder for SignatureImageEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        debug_assert_eq!(FEATURES, IMAGE_DIMENSIONS);

        // Fixed-size working copy keeps the signature resolution-invariant.
        let small = image.thumbnail_exact(64, 64).to_rgb8();
        let (width, height) = (small.width() as usize, small.height() as usize);
        let cell_w = width / GRID;
        let cell_h = height / GRID;

        let mut vector = vec![0.0f32; FEATURES];
        let (cell_means, gradients, histogram) = vector.split_at_mut_three();

        // Per-cell RGB means and luma
        let mut cell_luma = [[0.0f32; GRID]; GRID];
        for gy in 0..GRID {
            for gx in 0..GRID {
                let mut sums = [0.0f32; 3];
                let mut luma = 0.0f32;
                let mut count = 0.0f32;
                for y in gy * cell_h..(gy + 1) * cell_h {
                    for x in gx * cell_w..(gx + 1) * cell_w {
                        let p = small.get_pixel(x as u32, y as u32);
                        for c in 0..3 {
                            sums[c] += p[c] as f32 / 255.0;
                        }
                        luma += (0.299 * p[0] as f32 + 0.587 * p[1] as f32
                            + 0.114 * p[2] as f32)
                            / 255.0;
                        count += 1.0;
                    }
                }
                let base = (gy * GRID + gx) * 3;
                for c in 0..3 {
                    cell_means[base + c] = sums[c] / count;
                }
                cell_luma[gy][gx] = luma / count;
            }
        }

        // Horizontal+vertical luma gradient magnitude per cell
        for gy in 0..GRID {
            for gx in 0..GRID {
                let right = if gx + 1 < GRID { cell_luma[gy][gx + 1] } else { cell_luma[gy][gx] };
                let down = if gy + 1 < GRID { cell_luma[gy + 1][gx] } else { cell_luma[gy][gx] };
                let dx = right - cell_luma[gy][gx];
                let dy = down - cell_luma[gy][gx];
                gradients[gy * GRID + gx] = (dx * dx + dy * dy).sqrt();
            }
        }

        // Global histogram: 4 levels per channel, crossed with 4 luma bands
        let total_pixels = (width * height) as f32;
        for p in small.pixels() {
            let r = (p[0] >> 6) as usize;
            let g = (p[1] >> 6) as usize;
            let b = (p[2] >> 6) as usize;
            let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
            let band = ((luma / 64.0) as usize).min(3);
            let bin = band * 64 + r * 16 + g * 4 + b;
            histogram[bin] += 1.0 / total_pixels;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        IMAGE_DIMENSIONS
    }

    fn name(&self) -> &'static str {
        "signature-image"
    }
}

/// Split a feature vector into its three named regions
trait SplitThree {
    fn split_at_mut_three(&mut self) -> (&mut [f32], &mut [f32], &mut [f32]);
}

impl SplitThree for [f32] {
    fn split_at_mut_three(&mut self) -> (&mut [f32], &mut [f32], &mut [f32]) {
        let (cells, rest) = self.split_at_mut(GRID * GRID * 3);
        let (gradients, histogram) = rest.split_at_mut(GRID * GRID);
        (cells, gradients, histogram)
    }
}
