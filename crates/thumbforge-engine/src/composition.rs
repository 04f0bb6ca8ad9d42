//! Text placement ranking over a fixed set of named zones.

use image::RgbImage;
use thumbforge_contracts::layout::{Anchor, CompositionAnalysis, TextColor, TextPosition};
use thumbforge_contracts::tables::Side;
use thumbforge_contracts::zones::{Canvas, Platform, Rect};

use crate::config::AnalysisThresholds;
use crate::raster::{self, RasterReport};

const SIDE_BONUS: f64 = 15.0;
const UNIFORM_BONUS: f64 = 20.0;
const EXTREME_BRIGHTNESS_BONUS: f64 = 10.0;
const FOCAL_PENALTY: f64 = 30.0;
const DANGER_PENALTY: f64 = 100.0;
const UNSAFE_PENALTY: f64 = 20.0;
const DURATION_OVERLAY: &str = "duration-overlay";
const CHAR_WIDTH_FACTOR: f64 = 0.55;
const LINE_HEIGHT: f64 = 1.15;
const MAX_TEXT_WIDTH_FRACTION: f64 = 0.8;
const FALLBACK_CONFIDENCE: f64 = 0.5;
const FALLBACK_TOP_FRACTION: f64 = 0.1;

pub const LIGHT_TEXT: &str = "#FFFFFF";
pub const DARK_TEXT: &str = "#111111";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub name: &'static str,
    pub fx: f64,
    pub fy: f64,
    pub anchor: Anchor,
    pub priority: f64,
}

pub const ZONES: [Zone; 9] = [
    zone("top-center", 0.50, 0.10, Anchor::TopCenter, 60.0),
    zone("top-left", 0.08, 0.10, Anchor::TopLeft, 55.0),
    zone("top-right", 0.92, 0.10, Anchor::TopRight, 55.0),
    zone("middle-left", 0.08, 0.50, Anchor::MiddleLeft, 50.0),
    zone("middle-right", 0.92, 0.50, Anchor::MiddleRight, 50.0),
    zone("lower-center", 0.50, 0.88, Anchor::BottomCenter, 45.0),
    zone("bottom-left", 0.08, 0.90, Anchor::BottomLeft, 35.0),
    zone("bottom-right", 0.92, 0.90, Anchor::BottomRight, 30.0),
    zone("center", 0.50, 0.50, Anchor::Center, 25.0),
];

const fn zone(name: &'static str, fx: f64, fy: f64, anchor: Anchor, priority: f64) -> Zone {
    Zone {
        name,
        fx,
        fy,
        anchor,
        priority,
    }
}

impl Zone {
    pub fn find(name: &str) -> Option<&'static Zone> {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");
        ZONES.iter().find(|zone| zone.name == name)
    }

    fn matches_side(&self, side: Side) -> bool {
        match side {
            Side::Top => self.fy < 0.33,
            Side::Bottom => self.fy > 0.66,
            Side::Left => self.fx < 0.33,
            Side::Right => self.fx > 0.66,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompositionRequest {
    pub text_len: usize,
    pub font_size: f64,
    pub preferred_zone: Option<String>,
    pub preferred_sides: Vec<Side>,
    pub platform: Platform,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneScore {
    pub zone: &'static Zone,
    pub point: (f64, f64),
    pub text_box: Rect,
    pub score: f64,
    pub hits_duration_overlay: bool,
}

#[derive(Debug, Clone)]
pub struct CompositionPlanner {
    thresholds: AnalysisThresholds,
}

impl CompositionPlanner {
    pub fn new(thresholds: AnalysisThresholds) -> Self {
        Self { thresholds }
    }

    pub fn plan_bytes(&self, bytes: &[u8], request: &CompositionRequest) -> CompositionAnalysis {
        match raster::decode(bytes) {
            Ok(image) => self.plan(&image, request),
            Err(err) => {
                tracing::warn!(error = %err, "composition analysis degraded to fallback");
                fallback_analysis(None)
            }
        }
    }

    pub fn plan(&self, image: &RgbImage, request: &CompositionRequest) -> CompositionAnalysis {
        match raster::analyze(image, &self.thresholds) {
            Ok(report) => self.plan_with_report(image, &report, request),
            Err(err) => {
                tracing::warn!(error = %err, "composition analysis degraded to fallback");
                fallback_analysis(Some(image))
            }
        }
    }

    /// Plan from an existing raster report so callers that already analyzed
    /// the image do not pay for it twice.
    pub fn plan_with_report(
        &self,
        image: &RgbImage,
        report: &RasterReport,
        request: &CompositionRequest,
    ) -> CompositionAnalysis {
        let ranked = self.rank_zones(report, request);
        let Some(best) = self.pick(&ranked, request) else {
            return fallback_analysis(Some(image));
        };

        let (cx, cy) = (
            best.text_box.x + best.text_box.w / 2.0,
            best.text_box.y + best.text_box.h / 2.0,
        );
        let radius = (best.text_box.w.min(best.text_box.h) / 4.0).clamp(2.0, 48.0) as u32;
        let luminance = raster::window_luminance(image, cx, cy, radius).unwrap_or(0.5);

        CompositionAnalysis {
            focal_points: report.focal_points.clone(),
            negative_spaces: report.negative_spaces.clone(),
            best_position: TextPosition {
                x: best.point.0,
                y: best.point.1,
                anchor: best.zone.anchor,
                score: best.score,
                zone: best.zone.name.to_string(),
                confidence: (best.score / 100.0).clamp(0.0, 1.0),
            },
            text_color: text_color_for(luminance),
            fallback: false,
        }
    }

    /// All zones, best first. Zones whose box touches the duration overlay
    /// are kept in the list but flagged; [`Self::pick`] never returns them.
    /// Overlays and the safe rect come from the request's platform profile.
    pub fn rank_zones(&self, report: &RasterReport, request: &CompositionRequest) -> Vec<ZoneScore> {
        let canvas = Canvas::new(report.width as f64, report.height as f64);
        let profile = request.platform.profile();
        let dangers = profile.danger_zones_on(&canvas);
        let duration = dangers
            .iter()
            .find(|danger| danger.name == DURATION_OVERLAY)
            .map(|danger| danger.rect);
        let safe = profile.safe_rect_on(&canvas);
        let (box_w, box_h) = estimate_text_box(&canvas, request);
        let proximity = self.thresholds.focal_proximity_fraction * canvas.width;

        let mut scored: Vec<ZoneScore> = ZONES
            .iter()
            .map(|zone| {
                let point = (zone.fx * canvas.width, zone.fy * canvas.height);
                let text_box = zone.anchor.box_at(point.0, point.1, box_w, box_h);
                let mut score = zone.priority;

                if request
                    .preferred_sides
                    .iter()
                    .any(|side| zone.matches_side(*side))
                {
                    score += SIDE_BONUS;
                }

                let rows = report.variance.rows();
                let cols = report.variance.cols();
                let col = ((zone.fx * cols as f64) as usize).min(cols.saturating_sub(1));
                let row = ((zone.fy * rows as f64) as usize).min(rows.saturating_sub(1));
                if report.variance.get(row, col) < self.thresholds.negative_space_variance {
                    score += UNIFORM_BONUS;
                }
                let brightness = report.brightness.get(row, col);
                if !(50.0..=200.0).contains(&brightness) {
                    score += EXTREME_BRIGHTNESS_BONUS;
                }

                let center = (text_box.x + text_box.w / 2.0, text_box.y + text_box.h / 2.0);
                for focal in &report.focal_points {
                    let dist = (center.0 - focal.x).hypot(center.1 - focal.y);
                    if proximity > 0.0 && dist < proximity {
                        score -= FOCAL_PENALTY * (1.0 - dist / proximity);
                    }
                }

                if dangers.iter().any(|danger| text_box.intersects(&danger.rect)) {
                    score -= DANGER_PENALTY;
                }
                if !safe.contains(&text_box) {
                    score -= UNSAFE_PENALTY;
                }

                ZoneScore {
                    zone,
                    point,
                    text_box,
                    score: score.clamp(0.0, 100.0),
                    hits_duration_overlay: duration.is_some_and(|rect| text_box.intersects(&rect)),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    fn pick<'a>(&self, ranked: &'a [ZoneScore], request: &CompositionRequest) -> Option<&'a ZoneScore> {
        let allowed = |zone: &&ZoneScore| !zone.hits_duration_overlay;
        if let Some(preferred) = request.preferred_zone.as_deref().and_then(Zone::find) {
            let user = ranked
                .iter()
                .filter(allowed)
                .find(|scored| scored.zone.name == preferred.name);
            if let Some(user) = user {
                if user.score > self.thresholds.user_zone_min_score {
                    return Some(user);
                }
                tracing::debug!(
                    zone = preferred.name,
                    score = user.score,
                    "preferred zone scored too low"
                );
            }
        }
        ranked.iter().find(allowed)
    }
}

fn estimate_text_box(canvas: &Canvas, request: &CompositionRequest) -> (f64, f64) {
    let font = if request.font_size > 0.0 {
        request.font_size
    } else {
        96.0
    };
    let chars = request.text_len.max(1) as f64;
    let max_w = canvas.width * MAX_TEXT_WIDTH_FRACTION;
    let raw_w = chars * font * CHAR_WIDTH_FACTOR;
    let lines = (raw_w / max_w).ceil().max(1.0);
    (raw_w.min(max_w), lines * font * LINE_HEIGHT)
}

pub fn text_color_for(luminance: f64) -> TextColor {
    if luminance < 0.5 {
        TextColor {
            fill: LIGHT_TEXT.to_string(),
            stroke: "#000000".to_string(),
            background_luminance: luminance,
            reason: format!("dark background (luminance {luminance:.2}); light text with dark stroke"),
        }
    } else {
        TextColor {
            fill: DARK_TEXT.to_string(),
            stroke: "#FFFFFF".to_string(),
            background_luminance: luminance,
            reason: format!("bright background (luminance {luminance:.2}); dark text with light stroke"),
        }
    }
}

/// Centered-top placement at fixed confidence, used whenever analysis fails.
pub fn fallback_analysis(image: Option<&RgbImage>) -> CompositionAnalysis {
    let (width, height) = image
        .map(|image| (image.width() as f64, image.height() as f64))
        .unwrap_or_else(|| {
            let canvas = Canvas::reference();
            (canvas.width, canvas.height)
        });
    let x = width / 2.0;
    let y = height * FALLBACK_TOP_FRACTION;
    let luminance = image
        .and_then(|image| raster::window_luminance(image, x, y, 8))
        .unwrap_or(0.0);
    let mut text_color = text_color_for(luminance);
    text_color.reason = format!("fallback; {}", text_color.reason);
    CompositionAnalysis {
        focal_points: Vec::new(),
        negative_spaces: Vec::new(),
        best_position: TextPosition {
            x,
            y,
            anchor: Anchor::TopCenter,
            score: FALLBACK_CONFIDENCE * 100.0,
            zone: "top-center".to_string(),
            confidence: FALLBACK_CONFIDENCE,
        },
        text_color,
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::tests::{solid, subject_image};

    fn planner() -> CompositionPlanner {
        CompositionPlanner::new(AnalysisThresholds::default())
    }

    fn request(len: usize) -> CompositionRequest {
        CompositionRequest {
            text_len: len,
            font_size: 120.0,
            ..CompositionRequest::default()
        }
    }

    #[test]
    fn solid_gray_picks_safe_zone_with_reasonable_confidence() {
        let image = solid(1920, 1080, [128, 128, 128]);
        let analysis = planner().plan(&image, &request(12));
        assert!(!analysis.fallback);
        assert!(analysis.focal_points.is_empty());
        assert!(analysis.best_position.confidence >= 0.4);
        assert_eq!(analysis.best_position.zone, "top-center");

        let canvas = Canvas::reference();
        let text_box = analysis.best_position.anchor.box_at(
            analysis.best_position.x,
            analysis.best_position.y,
            12.0 * 120.0 * CHAR_WIDTH_FACTOR,
            120.0 * LINE_HEIGHT,
        );
        for danger in canvas.danger_zones() {
            assert!(!text_box.intersects(&danger.rect), "{}", danger.name);
        }
        assert_eq!(analysis.text_color.fill, DARK_TEXT);
    }

    #[test]
    fn dark_background_gets_light_text() {
        let image = solid(1280, 720, [10, 10, 10]);
        let analysis = planner().plan(&image, &request(6));
        assert_eq!(analysis.text_color.fill, LIGHT_TEXT);
        assert!(analysis.text_color.background_luminance < 0.5);
    }

    #[test]
    fn duration_overlay_is_never_chosen() -> anyhow::Result<()> {
        let images = [
            solid(1920, 1080, [128, 128, 128]),
            solid(1280, 720, [250, 250, 250]),
            subject_image(1920, 1080, 0, 0, 1920, 700),
            subject_image(1920, 1080, 600, 200, 1400, 1080),
        ];
        let planner = planner();
        for image in &images {
            let report = raster::analyze(image, &AnalysisThresholds::default())?;
            let mut req = request(30);
            req.preferred_zone = Some("bottom-right".to_string());
            req.preferred_sides = vec![Side::Bottom, Side::Right];
            let ranked = planner.rank_zones(&report, &req);
            let analysis = planner.plan_with_report(image, &report, &req);
            let chosen = ranked
                .iter()
                .find(|zone| zone.zone.name == analysis.best_position.zone)
                .map(|zone| zone.text_box);
            let overlay = Canvas::new(image.width() as f64, image.height() as f64)
                .duration_overlay()
                .rect;
            assert!(chosen.is_some_and(|text_box| !text_box.intersects(&overlay)));
        }
        Ok(())
    }

    #[test]
    fn focal_points_push_text_away_from_subject() {
        // Subject sits right under the top-center zone.
        let image = subject_image(1920, 1080, 760, 40, 1160, 360);
        let analysis = planner().plan(&image, &request(8));
        assert!(!analysis.focal_points.is_empty());
        assert_ne!(analysis.best_position.zone, "top-center");
    }

    #[test]
    fn user_preference_wins_when_above_threshold() {
        let image = solid(1920, 1080, [128, 128, 128]);
        let mut req = request(8);
        req.preferred_zone = Some("middle_left".to_string());
        let analysis = planner().plan(&image, &req);
        assert_eq!(analysis.best_position.zone, "middle-left");
        assert_eq!(analysis.best_position.anchor, Anchor::MiddleLeft);
    }

    #[test]
    fn side_preference_adds_bonus() -> anyhow::Result<()> {
        let image = solid(1920, 1080, [128, 128, 128]);
        let report = raster::analyze(&image, &AnalysisThresholds::default())?;
        let mut req = request(8);
        req.preferred_sides = vec![Side::Right];
        let ranked = planner().rank_zones(&report, &req);
        let right = ranked
            .iter()
            .find(|zone| zone.zone.name == "middle-right")
            .map(|zone| zone.score);
        let left = ranked
            .iter()
            .find(|zone| zone.zone.name == "middle-left")
            .map(|zone| zone.score);
        assert_eq!(right.zip(left).map(|(r, l)| r - l), Some(SIDE_BONUS));
        Ok(())
    }

    #[test]
    fn player_overlays_only_penalize_video_platforms() -> anyhow::Result<()> {
        let image = solid(1920, 1080, [128, 128, 128]);
        let report = raster::analyze(&image, &AnalysisThresholds::default())?;
        let bottom_left = |platform: Platform| {
            let mut req = request(8);
            req.platform = platform;
            planner()
                .rank_zones(&report, &req)
                .into_iter()
                .find(|zone| zone.zone.name == "bottom-left")
                .map(|zone| zone.score)
        };
        let youtube = bottom_left(Platform::Youtube).unwrap_or(f64::NAN);
        let square = bottom_left(Platform::InstagramSquare).unwrap_or(f64::NAN);
        // The channel icon sits under this zone on youtube only.
        assert!(square > youtube, "{square} vs {youtube}");
        Ok(())
    }

    #[test]
    fn corrupt_bytes_fall_back_to_top_center() {
        let analysis = planner().plan_bytes(b"\x89PNG garbage", &request(4));
        assert!(analysis.fallback);
        assert_eq!(analysis.best_position.anchor, Anchor::TopCenter);
        assert_eq!(analysis.best_position.confidence, 0.5);
    }
}
