//! Stateless heuristics over decoded pixels.
//!
//! Every function here is read-only over the buffer and deterministic: the
//! same image always produces bit-identical grids. Sampling positions are
//! derived from integer arithmetic only.

use image::RgbImage;
use thumbforge_contracts::layout::{FocalPoint, NegativeSpace};

use crate::config::AnalysisThresholds;
use crate::error::AnalysisError;

const LUMA_R: f64 = 0.299;
const LUMA_G: f64 = 0.587;
const LUMA_B: f64 = 0.114;
const MAX_STATS_SAMPLES_AXIS: u32 = 256;
const SHARPNESS_TARGET_WIDTH: u32 = 640;

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl Grid {
    fn new(rows: usize, cols: usize, values: Vec<f64>) -> Self {
        Self { rows, cols, values }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values
            .get(row * self.cols + col)
            .copied()
            .unwrap_or_default()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// (row, col) of the largest cell; first one wins on ties.
    pub fn argmax(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, value) in self.values.iter().enumerate() {
            if best.map(|(_, current)| *value > current).unwrap_or(true) {
                best = Some((idx, *value));
            }
        }
        best.map(|(idx, _)| (idx / self.cols.max(1), idx % self.cols.max(1)))
    }

    /// Mean of the up/down/left/right neighbors that exist.
    pub fn neighbor_mean(&self, row: usize, col: usize) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        if row > 0 {
            sum += self.get(row - 1, col);
            count += 1;
        }
        if row + 1 < self.rows {
            sum += self.get(row + 1, col);
            count += 1;
        }
        if col > 0 {
            sum += self.get(row, col - 1);
            count += 1;
        }
        if col + 1 < self.cols {
            sum += self.get(row, col + 1);
            count += 1;
        }
        (count > 0).then(|| sum / count as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// Pixel bounds of grid cell (`row`, `col`). Never empty for a non-empty image.
pub fn cell_rect(width: u32, height: u32, rows: usize, cols: usize, row: usize, col: usize) -> CellRect {
    let span = |extent: u32, parts: usize, idx: usize| -> (u32, u32) {
        let parts = parts.max(1) as u64;
        let extent64 = extent as u64;
        let start = (idx as u64 * extent64 / parts).min(extent64.saturating_sub(1));
        let end = ((idx as u64 + 1) * extent64 / parts).clamp(start + 1, extent64.max(1));
        (start as u32, end as u32)
    };
    let (x0, x1) = span(width, cols, col);
    let (y0, y1) = span(height, rows, row);
    CellRect { x0, y0, x1, y1 }
}

fn sample_positions(start: u32, end: u32, samples: u32) -> impl Iterator<Item = u32> {
    let extent = end.saturating_sub(start).max(1);
    let count = samples.min(extent).max(1);
    (0..count).map(move |idx| start + ((2 * idx + 1) as u64 * extent as u64 / (2 * count) as u64) as u32)
}

fn cell_pixels<'a>(
    image: &'a RgbImage,
    rect: CellRect,
    samples: u32,
) -> impl Iterator<Item = [f64; 3]> + 'a {
    sample_positions(rect.y0, rect.y1, samples).flat_map(move |y| {
        sample_positions(rect.x0, rect.x1, samples).map(move |x| {
            let px = image.get_pixel(x, y).0;
            [px[0] as f64, px[1] as f64, px[2] as f64]
        })
    })
}

pub fn luma(rgb: [f64; 3]) -> f64 {
    LUMA_R * rgb[0] + LUMA_G * rgb[1] + LUMA_B * rgb[2]
}

fn ensure_non_empty(image: &RgbImage) -> Result<(), AnalysisError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(AnalysisError::Degenerate {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

pub fn decode(bytes: &[u8]) -> Result<RgbImage, AnalysisError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|err| AnalysisError::Decode(err.to_string()))?;
    let rgb = decoded.to_rgb8();
    ensure_non_empty(&rgb)?;
    Ok(rgb)
}

/// Mean perceptual brightness per cell.
pub fn brightness_grid(image: &RgbImage, rows: usize, cols: usize, samples: u32) -> Grid {
    let mut values = Vec::with_capacity(rows * cols);
    if image.width() == 0 || image.height() == 0 {
        return Grid::new(rows, cols, vec![0.0; rows * cols]);
    }
    for row in 0..rows {
        for col in 0..cols {
            let rect = cell_rect(image.width(), image.height(), rows, cols, row, col);
            let mut sum = 0.0;
            let mut count = 0usize;
            for px in cell_pixels(image, rect, samples) {
                sum += luma(px);
                count += 1;
            }
            values.push(if count == 0 { 0.0 } else { sum / count as f64 });
        }
    }
    Grid::new(rows, cols, values)
}

/// Mean of the per-channel standard deviations per cell.
pub fn variance_grid(image: &RgbImage, rows: usize, cols: usize, samples: u32) -> Grid {
    let mut values = Vec::with_capacity(rows * cols);
    if image.width() == 0 || image.height() == 0 {
        return Grid::new(rows, cols, vec![0.0; rows * cols]);
    }
    for row in 0..rows {
        for col in 0..cols {
            let rect = cell_rect(image.width(), image.height(), rows, cols, row, col);
            let mut sum = [0.0f64; 3];
            let mut sum_sq = [0.0f64; 3];
            let mut count = 0usize;
            for px in cell_pixels(image, rect, samples) {
                for channel in 0..3 {
                    sum[channel] += px[channel];
                    sum_sq[channel] += px[channel] * px[channel];
                }
                count += 1;
            }
            if count == 0 {
                values.push(0.0);
                continue;
            }
            let n = count as f64;
            let mut std_sum = 0.0;
            for channel in 0..3 {
                let mean = sum[channel] / n;
                let var = (sum_sq[channel] / n - mean * mean).max(0.0);
                std_sum += var.sqrt();
            }
            values.push(std_sum / 3.0);
        }
    }
    Grid::new(rows, cols, values)
}

fn cell_center(width: u32, height: u32, grid: &Grid, row: usize, col: usize) -> (f64, f64) {
    let rect = cell_rect(width, height, grid.rows(), grid.cols(), row, col);
    (
        (rect.x0 as f64 + rect.x1 as f64) / 2.0,
        (rect.y0 as f64 + rect.y1 as f64) / 2.0,
    )
}

/// Cells that stand out from their 4-neighbors or carry high detail.
pub fn focal_points(
    width: u32,
    height: u32,
    brightness: &Grid,
    variance: &Grid,
    thresholds: &AnalysisThresholds,
) -> Vec<FocalPoint> {
    let mut points = Vec::new();
    for row in 0..brightness.rows() {
        for col in 0..brightness.cols() {
            let delta = brightness
                .neighbor_mean(row, col)
                .map(|mean| (brightness.get(row, col) - mean).abs())
                .unwrap_or(0.0);
            let detail = variance.get(row, col);
            if delta > thresholds.focal_brightness_delta || detail > thresholds.focal_variance {
                let (x, y) = cell_center(width, height, brightness, row, col);
                points.push(FocalPoint {
                    x,
                    y,
                    strength: delta + detail,
                });
            }
        }
    }
    points.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    points.truncate(thresholds.max_focal_points);
    points
}

/// Uniform cells, ranked by horizontal run length then uniformity.
pub fn negative_spaces(
    width: u32,
    height: u32,
    variance: &Grid,
    thresholds: &AnalysisThresholds,
) -> Vec<NegativeSpace> {
    let uniform = |row: usize, col: usize| variance.get(row, col) < thresholds.negative_space_variance;
    let mut spaces = Vec::new();
    for row in 0..variance.rows() {
        for col in 0..variance.cols() {
            if !uniform(row, col) {
                continue;
            }
            let mut region_size = 1u32;
            let mut left = col;
            while left > 0 && uniform(row, left - 1) {
                region_size += 1;
                left -= 1;
            }
            let mut right = col + 1;
            while right < variance.cols() && uniform(row, right) {
                region_size += 1;
                right += 1;
            }
            let rect = cell_rect(width, height, variance.rows(), variance.cols(), row, col);
            spaces.push(NegativeSpace {
                x: rect.x0 as f64,
                y: rect.y0 as f64,
                w: (rect.x1 - rect.x0) as f64,
                h: (rect.y1 - rect.y0) as f64,
                uniformity: (100.0 - variance.get(row, col)).clamp(0.0, 100.0),
                region_size,
            });
        }
    }
    spaces.sort_by(|a, b| {
        b.region_size
            .cmp(&a.region_size)
            .then(b.uniformity.total_cmp(&a.uniformity))
    });
    spaces
}

/// Standard deviation of a Laplacian response over a greyscale copy,
/// divided by `divisor`. Large images are strided to ~640 px wide.
pub fn sharpness(image: &RgbImage, divisor: f64) -> Result<f64, AnalysisError> {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return Err(AnalysisError::Degenerate { width, height });
    }
    let stride = (width / SHARPNESS_TARGET_WIDTH).max(1);
    let grey = |x: u32, y: u32| {
        let px = image.get_pixel(x, y).0;
        luma([px[0] as f64, px[1] as f64, px[2] as f64])
    };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    let mut y = stride;
    while y + stride < height {
        let mut x = stride;
        while x + stride < width {
            let response = grey(x - stride, y)
                + grey(x + stride, y)
                + grey(x, y - stride)
                + grey(x, y + stride)
                - 4.0 * grey(x, y);
            sum += response;
            sum_sq += response * response;
            count += 1;
            x += stride;
        }
        y += stride;
    }
    if count == 0 {
        return Err(AnalysisError::Degenerate { width, height });
    }
    let n = count as f64;
    let mean = sum / n;
    let std = (sum_sq / n - mean * mean).max(0.0).sqrt();
    let value = std / divisor;
    if !value.is_finite() {
        return Err(AnalysisError::NonFinite("sharpness"));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStats {
    pub mean: [f64; 3],
    pub std: [f64; 3],
    /// Mean perceptual brightness, 0-255.
    pub brightness: f64,
    /// Standard deviation of perceptual brightness.
    pub contrast: f64,
    /// Mean pairwise difference of the channel means.
    pub colorfulness: f64,
    /// Mean HSV saturation, 0-1.
    pub saturation: f64,
}

impl Default for ImageStats {
    /// Neutral mid-gray statistics.
    fn default() -> Self {
        Self {
            mean: [128.0; 3],
            std: [0.0; 3],
            brightness: 128.0,
            contrast: 0.0,
            colorfulness: 0.0,
            saturation: 0.0,
        }
    }
}

pub fn global_stats(image: &RgbImage) -> ImageStats {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return ImageStats::default();
    }
    let mut sum = [0.0f64; 3];
    let mut sum_sq = [0.0f64; 3];
    let mut luma_sum = 0.0;
    let mut luma_sq = 0.0;
    let mut sat_sum = 0.0;
    let mut count = 0usize;
    for y in sample_positions(0, height, MAX_STATS_SAMPLES_AXIS) {
        for x in sample_positions(0, width, MAX_STATS_SAMPLES_AXIS) {
            let px = image.get_pixel(x, y).0;
            let rgb = [px[0] as f64, px[1] as f64, px[2] as f64];
            for channel in 0..3 {
                sum[channel] += rgb[channel];
                sum_sq[channel] += rgb[channel] * rgb[channel];
            }
            let l = luma(rgb);
            luma_sum += l;
            luma_sq += l * l;
            let max = rgb[0].max(rgb[1]).max(rgb[2]);
            let min = rgb[0].min(rgb[1]).min(rgb[2]);
            if max > 0.0 {
                sat_sum += (max - min) / max;
            }
            count += 1;
        }
    }
    let n = count.max(1) as f64;
    let mut mean = [0.0; 3];
    let mut std = [0.0; 3];
    for channel in 0..3 {
        mean[channel] = sum[channel] / n;
        std[channel] = (sum_sq[channel] / n - mean[channel] * mean[channel])
            .max(0.0)
            .sqrt();
    }
    let brightness = luma_sum / n;
    let contrast = (luma_sq / n - brightness * brightness).max(0.0).sqrt();
    let colorfulness = ((mean[0] - mean[1]).abs()
        + (mean[1] - mean[2]).abs()
        + (mean[0] - mean[2]).abs())
        / 3.0;
    ImageStats {
        mean,
        std,
        brightness,
        contrast,
        colorfulness,
        saturation: sat_sum / n,
    }
}

/// Mean luminance (0-1) of a square window centered on (`cx`, `cy`).
pub fn window_luminance(image: &RgbImage, cx: f64, cy: f64, radius: u32) -> Option<f64> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let cx = cx.round().clamp(0.0, (width - 1) as f64) as u32;
    let cy = cy.round().clamp(0.0, (height - 1) as f64) as u32;
    let x0 = cx.saturating_sub(radius);
    let y0 = cy.saturating_sub(radius);
    let x1 = (cx + radius + 1).min(width);
    let y1 = (cy + radius + 1).min(height);
    let mut sum = 0.0;
    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            let px = image.get_pixel(x, y).0;
            sum += luma([px[0] as f64, px[1] as f64, px[2] as f64]);
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64 / 255.0)
}

#[derive(Debug, Clone)]
pub struct RasterReport {
    pub width: u32,
    pub height: u32,
    pub brightness: Grid,
    pub variance: Grid,
    /// Coarse variance grid used to estimate where the subject sits.
    pub subject: Grid,
    pub focal_points: Vec<FocalPoint>,
    pub negative_spaces: Vec<NegativeSpace>,
    pub sharpness: Result<f64, AnalysisError>,
    pub stats: ImageStats,
}

impl RasterReport {
    /// Pixel center of the coarse subject cell.
    pub fn subject_center(&self) -> Option<(f64, f64)> {
        let (row, col) = self.subject.argmax()?;
        Some(cell_center(self.width, self.height, &self.subject, row, col))
    }
}

/// Run every heuristic. Independent sub-computations run concurrently.
pub fn analyze(image: &RgbImage, thresholds: &AnalysisThresholds) -> Result<RasterReport, AnalysisError> {
    ensure_non_empty(image)?;
    let rows = thresholds.grid_rows as usize;
    let cols = thresholds.grid_cols as usize;
    let subject_n = thresholds.subject_grid as usize;
    let samples = thresholds.samples_per_cell_axis;

    let ((brightness, variance), ((subject, sharp), stats)) = rayon::join(
        || {
            rayon::join(
                || brightness_grid(image, rows, cols, samples),
                || variance_grid(image, rows, cols, samples),
            )
        },
        || {
            rayon::join(
                || {
                    rayon::join(
                        || variance_grid(image, subject_n, subject_n, samples),
                        || sharpness(image, thresholds.sharpness_divisor),
                    )
                },
                || global_stats(image),
            )
        },
    );

    let (width, height) = image.dimensions();
    let focal = focal_points(width, height, &brightness, &variance, thresholds);
    let spaces = negative_spaces(width, height, &variance, thresholds);

    Ok(RasterReport {
        width,
        height,
        brightness,
        variance,
        subject,
        focal_points: focal,
        negative_spaces: spaces,
        sharpness: sharp,
        stats,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    pub(crate) fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(rgb))
    }

    /// Dark background with a bright textured block in the given cell range.
    pub(crate) fn subject_image(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> RgbImage {
        let mut image = solid(width, height, [20, 24, 32]);
        for y in y0..y1.min(height) {
            for x in x0..x1.min(width) {
                let px = if (x / 3 + y / 3) % 2 == 0 {
                    [255, 220, 60]
                } else {
                    [30, 10, 90]
                };
                image.put_pixel(x, y, Rgb(px));
            }
        }
        image
    }

    #[test]
    fn brightness_uses_perceptual_weights() {
        let image = solid(64, 48, [255, 0, 0]);
        let grid = brightness_grid(&image, 8, 12, 4);
        assert!((grid.get(3, 3) - 0.299 * 255.0).abs() < 1e-9);
        assert_eq!(grid.rows(), 8);
        assert_eq!(grid.cols(), 12);
    }

    #[test]
    fn solid_image_has_no_focal_points_and_is_all_negative_space() -> anyhow::Result<()> {
        let image = solid(1920, 1080, [128, 128, 128]);
        let report = analyze(&image, &AnalysisThresholds::default())?;
        assert!(report.focal_points.is_empty());
        assert_eq!(report.negative_spaces.len(), 96);
        assert_eq!(report.negative_spaces[0].region_size, 12);
        assert_eq!(report.negative_spaces[0].uniformity, 100.0);
        assert_eq!(report.sharpness.clone()?, 0.0);
        assert!((report.stats.brightness - 128.0).abs() < 1e-9);
        assert_eq!(report.stats.saturation, 0.0);
        Ok(())
    }

    #[test]
    fn one_pixel_image_degrades_without_panicking() -> anyhow::Result<()> {
        let image = solid(1, 1, [10, 200, 30]);
        let report = analyze(&image, &AnalysisThresholds::default())?;
        assert!(report.focal_points.is_empty());
        assert!(matches!(
            report.sharpness,
            Err(AnalysisError::Degenerate { width: 1, height: 1 })
        ));
        assert_eq!(report.brightness.get(7, 11), report.brightness.get(0, 0));
        Ok(())
    }

    #[test]
    fn empty_image_is_rejected() {
        let image = RgbImage::new(0, 0);
        assert!(analyze(&image, &AnalysisThresholds::default()).is_err());
        assert_eq!(global_stats(&image), ImageStats::default());
    }

    #[test]
    fn textured_block_becomes_the_strongest_focal_point() -> anyhow::Result<()> {
        let image = subject_image(1200, 800, 100, 100, 300, 300);
        let report = analyze(&image, &AnalysisThresholds::default())?;
        assert!(!report.focal_points.is_empty());
        assert!(report.focal_points.len() <= 5);
        let top = report.focal_points[0];
        assert!(top.x < 400.0 && top.y < 400.0, "{top:?}");
        let (sx, sy) = report.subject_center().unwrap_or_default();
        assert!(sx < 400.0 && sy < 267.0);
        Ok(())
    }

    #[test]
    fn analysis_is_idempotent() -> anyhow::Result<()> {
        let image = subject_image(640, 360, 300, 50, 500, 300);
        let thresholds = AnalysisThresholds::default();
        let first = analyze(&image, &thresholds)?;
        let second = analyze(&image, &thresholds)?;
        assert_eq!(first.brightness, second.brightness);
        assert_eq!(first.variance, second.variance);
        assert_eq!(first.focal_points, second.focal_points);
        assert_eq!(first.sharpness, second.sharpness);
        Ok(())
    }

    #[test]
    fn checkerboard_is_sharper_than_flat() -> anyhow::Result<()> {
        let flat = solid(200, 200, [90, 90, 90]);
        let busy = subject_image(200, 200, 0, 0, 200, 200);
        assert!(sharpness(&busy, 0.4)? > sharpness(&flat, 0.4)?);
        Ok(())
    }

    #[test]
    fn cell_rects_cover_tiny_images() {
        let rect = cell_rect(5, 3, 8, 12, 7, 11);
        assert!(rect.x1 > rect.x0 && rect.y1 > rect.y0);
        assert!(rect.x1 <= 5 && rect.y1 <= 3);
    }

    #[test]
    fn window_luminance_reads_local_pixels() {
        let mut image = solid(100, 100, [0, 0, 0]);
        for y in 0..50 {
            for x in 0..100 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let top = window_luminance(&image, 50.0, 10.0, 5).unwrap_or_default();
        let bottom = window_luminance(&image, 50.0, 90.0, 5).unwrap_or(1.0);
        assert!(top > 0.99);
        assert!(bottom < 0.01);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode(b"not an image"), Err(AnalysisError::Decode(_))));
    }
}
