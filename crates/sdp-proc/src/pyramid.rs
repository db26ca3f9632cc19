//! Multi-resolution JPEG tile pyramid over a volume montage.
//!
//! The volume's slices are laid out into a single grayscale montage, zero
//! borders cropped, then tiled at halving resolutions from the full-size
//! level 0 up to a single-tile top level. Tiles land in one flat directory
//! next to a static viewer page.

use crate::error::{ProcError, Result};
use crate::volume::{Volume, VoxelData};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_TILE_SIZE: u32 = 256;
const JPEG_QUALITY: u8 = 85;

// Intensity clip percentiles for non-8-bit data
const CLIP_LO: f64 = 0.20;
const CLIP_HI: f64 = 0.99;

pub struct ImagePyramid {
    montage: GrayImage,
    tile_size: u32,
}

impl ImagePyramid {
    /// Build the montage for a volume. Fails with
    /// [`ProcError::DegenerateMontage`] when the montage has no nonzero
    /// content; callers downgrade that to a fallback page.
    pub fn from_volume(volume: &Volume, tile_size: u32) -> Result<ImagePyramid> {
        let montage = montage(volume)?;
        Ok(ImagePyramid { montage, tile_size })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.montage.dimensions()
    }

    /// Number of halvings above full resolution; the level at `divs` fits
    /// in a single tile.
    fn divs(&self) -> u32 {
        let (w, h) = self.montage.dimensions();
        let ratio = w.max(h) as f64 / self.tile_size as f64;
        if ratio <= 1.0 {
            0
        } else {
            ratio.log2().ceil() as u32
        }
    }

    pub fn levels(&self) -> u32 {
        self.divs() + 1
    }

    /// Write all tiles and the viewer page into `dir`.
    pub fn generate(&self, dir: &Path, script_url: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let divs = self.divs();
        for level in (0..=divs).rev() {
            self.write_level(dir, level)?;
        }
        self.write_viewer(dir, script_url)?;
        debug!(
            dir = %dir.display(),
            levels = self.levels(),
            "generated image pyramid"
        );
        Ok(())
    }

    fn write_level(&self, dir: &Path, level: u32) -> Result<()> {
        let (w, h) = self.montage.dimensions();
        let scale = 1u32 << level;
        let lw = w.div_ceil(scale).max(1);
        let lh = h.div_ceil(scale).max(1);
        let scaled = if level == 0 {
            self.montage.clone()
        } else {
            imageops::resize(&self.montage, lw, lh, FilterType::Triangle)
        };

        let cols = lw.div_ceil(self.tile_size);
        let rows = lh.div_ceil(self.tile_size);
        for row in 0..rows {
            for col in 0..cols {
                let x = col * self.tile_size;
                let y = row * self.tile_size;
                let tw = self.tile_size.min(lw - x);
                let th = self.tile_size.min(lh - y);
                let tile = imageops::crop_imm(&scaled, x, y, tw, th).to_image();

                let name = format!("{level:03}_{col:03}_{row:03}.jpg");
                let file = File::create(dir.join(name))?;
                let mut encoder =
                    JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
                encoder.encode_image(&tile)?;
            }
        }
        Ok(())
    }

    fn write_viewer(&self, dir: &Path, script_url: &str) -> Result<()> {
        let (w, h) = self.montage.dimensions();
        let html = format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <head>\n\
             <meta charset=\"utf-8\">\n\
             <title>Image Pyramid</title>\n\
             <script src=\"{script_url}\"></script>\n\
             </head>\n\
             <body>\n\
             <div id=\"pyramid\" data-width=\"{w}\" data-height=\"{h}\" \
             data-tile-size=\"{tile}\" data-levels=\"{levels}\"></div>\n\
             <script>pyramidViewer.init(document.getElementById('pyramid'));</script>\n\
             </body>\n\
             </html>\n",
            tile = self.tile_size,
            levels = self.levels(),
        );
        std::fs::write(dir.join("index.html"), html)?;
        Ok(())
    }
}

/// Placeholder page written when the montage could not be generated.
pub fn write_fallback_page(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let html = "<!DOCTYPE html>\n\
                <html>\n\
                <head><meta charset=\"utf-8\"><title>Image Pyramid</title></head>\n\
                <body><p>The image pyramid could not be generated.</p></body>\n\
                </html>\n";
    std::fs::write(dir.join("index.html"), html)?;
    Ok(())
}

/// Lay the volume's slices out into one grayscale montage and crop its
/// all-zero borders.
fn montage(volume: &Volume) -> Result<GrayImage> {
    if volume.shape.len() < 2 {
        return Err(ProcError::Volume(format!(
            "need at least 2 dims, got {:?}",
            volume.shape
        )));
    }
    let w = volume.shape[0];
    let h = volume.shape[1];
    let slices = volume.num_slices();

    let cols = match volume.shape.len() {
        2 => 1,
        // Square-ish layout in pixels, not in slice count
        3 => ((slices as f64 * h as f64 / w as f64).sqrt().ceil()) as usize,
        _ => volume.shape[2],
    }
    .max(1);
    let rows = slices.div_ceil(cols);

    let pixels = to_u8(&volume.data);
    let mut img = GrayImage::new((cols * w) as u32, (rows * h) as u32);
    for s in 0..slices {
        let ox = (s % cols) * w;
        let oy = (s / cols) * h;
        let base = s * w * h;
        for y in 0..h {
            for x in 0..w {
                img.put_pixel(
                    (ox + x) as u32,
                    (oy + y) as u32,
                    image::Luma([pixels[base + y * w + x]]),
                );
            }
        }
    }
    crop_nonzero(&img).ok_or(ProcError::DegenerateMontage)
}

/// 8-bit data passes through; anything else is clipped to the
/// [20th, 99th] percentile range and rescaled onto [0, 255].
fn to_u8(data: &VoxelData) -> Vec<u8> {
    match data {
        VoxelData::U8(values) => values.clone(),
        VoxelData::F32(values) => {
            let mut sorted: Vec<f32> =
                values.iter().copied().filter(|v| v.is_finite()).collect();
            sorted.sort_by(f32::total_cmp);
            if sorted.is_empty() {
                return vec![0; values.len()];
            }
            let lo = sorted[percentile_index(sorted.len(), CLIP_LO)];
            let hi = sorted[percentile_index(sorted.len(), CLIP_HI)];
            let span = hi - lo;
            values
                .iter()
                .map(|&v| {
                    if !v.is_finite() || span <= 0.0 {
                        0
                    } else {
                        ((v - lo) / span * 255.0).round().clamp(0.0, 255.0) as u8
                    }
                })
                .collect()
        }
    }
}

fn percentile_index(len: usize, q: f64) -> usize {
    (((len - 1) as f64) * q).round() as usize
}

/// Smallest subimage containing every nonzero pixel, or `None` when all
/// pixels are zero.
fn crop_nonzero(img: &GrayImage) -> Option<GrayImage> {
    let (w, h) = img.dimensions();
    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut any = false;
    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel.0[0] != 0 {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if !any {
        return None;
    }
    Some(imageops::crop_imm(img, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image())
}
