//! Heuristic quality scoring.
//!
//! Every sub-score is computed independently and may fail; a failed sub-score
//! is logged, recorded in [`QualityScore::degraded`] and replaced by
//! [`NEUTRAL_SUB_SCORE`]. Scoring itself never fails.

use image::RgbImage;
use thumbforge_contracts::layout::CompositionAnalysis;
use thumbforge_contracts::scoring::{QualityScore, ScoreBreakdown, SubScore, NEUTRAL_SUB_SCORE};
use thumbforge_contracts::tables::{NicheProfile, Palette, ScoreAdjustment, StyleProfile};

use crate::composition::{CompositionPlanner, CompositionRequest};
use crate::config::AnalysisThresholds;
use crate::error::AnalysisError;
use crate::raster::{self, ImageStats, RasterReport};

/// Face score when the request carries no reference face.
pub const NO_FACE_EXPECTED_SCORE: f64 = 75.0;

const THIRDS: [(f64, f64); 4] = [
    (1.0 / 3.0, 1.0 / 3.0),
    (2.0 / 3.0, 1.0 / 3.0),
    (1.0 / 3.0, 2.0 / 3.0),
    (2.0 / 3.0, 2.0 / 3.0),
];

#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub style: &'a StyleProfile,
    pub niche: Option<&'a NicheProfile>,
    pub expects_face: bool,
    /// `None` disables composition analysis; readability then degrades.
    pub composition: Option<&'a CompositionRequest>,
}

#[derive(Debug, Clone)]
pub struct ScoredAnalysis {
    pub score: QualityScore,
    pub composition: Option<CompositionAnalysis>,
}

#[derive(Debug, Clone)]
pub struct QualityScorer {
    thresholds: AnalysisThresholds,
    planner: CompositionPlanner,
}

impl QualityScorer {
    pub fn new(thresholds: AnalysisThresholds) -> Self {
        Self {
            planner: CompositionPlanner::new(thresholds.clone()),
            thresholds,
        }
    }

    pub fn score(&self, bytes: &[u8], ctx: &ScoringContext<'_>) -> ScoredAnalysis {
        match raster::decode(bytes) {
            Ok(image) => self.score_image(&image, ctx),
            Err(err) => {
                tracing::warn!(error = %err, "candidate could not be decoded; scoring neutral");
                let degraded = SubScore::ALL
                    .iter()
                    .map(|sub| sub.as_str().to_string())
                    .collect();
                let composition = ctx
                    .composition
                    .map(|_| crate::composition::fallback_analysis(None));
                ScoredAnalysis {
                    score: combine(ScoreBreakdown::default(), &ctx.style.adjustments, degraded),
                    composition,
                }
            }
        }
    }

    pub fn score_image(&self, image: &RgbImage, ctx: &ScoringContext<'_>) -> ScoredAnalysis {
        let report = raster::analyze(image, &self.thresholds);
        let composition = ctx.composition.map(|request| match &report {
            Ok(report) => self.planner.plan_with_report(image, report, request),
            Err(_) => crate::composition::fallback_analysis(Some(image)),
        });

        let readability = match &composition {
            Some(analysis) => text_readability(analysis),
            None => Err(AnalysisError::Disabled),
        };
        let results = match &report {
            Ok(report) => [
                (SubScore::Face, face_score(report, ctx.expects_face)),
                (SubScore::Composition, composition_score(report)),
                (SubScore::TextReadability, readability),
                (SubScore::ColorHarmony, color_harmony(&report.stats, ctx.style, ctx.niche)),
                (SubScore::Technical, technical_score(report)),
                (SubScore::StyleAdherence, style_adherence(report, ctx.style, ctx.niche)),
            ],
            Err(err) => [
                (SubScore::Face, Err(err.clone())),
                (SubScore::Composition, Err(err.clone())),
                (SubScore::TextReadability, readability),
                (SubScore::ColorHarmony, Err(err.clone())),
                (SubScore::Technical, Err(err.clone())),
                (SubScore::StyleAdherence, Err(err.clone())),
            ],
        };

        let mut breakdown = ScoreBreakdown::default();
        let mut degraded = Vec::new();
        for (sub_score, result) in results {
            match result {
                Ok(value) => breakdown.set(sub_score, value),
                Err(err) => {
                    tracing::debug!(sub_score = sub_score.as_str(), error = %err, "sub-score degraded");
                    breakdown.set(sub_score, NEUTRAL_SUB_SCORE);
                    degraded.push(sub_score.as_str().to_string());
                }
            }
        }

        ScoredAnalysis {
            score: combine(breakdown, &ctx.style.adjustments, degraded),
            composition,
        }
    }
}

/// Apply style adjustments to individual sub-scores, then take the weighted
/// sum. The final score is always within [0, 100].
pub fn combine(
    mut breakdown: ScoreBreakdown,
    adjustments: &[ScoreAdjustment],
    degraded: Vec<String>,
) -> QualityScore {
    for adjustment in adjustments {
        let current = breakdown.get(adjustment.sub_score);
        breakdown.set(
            adjustment.sub_score,
            current * adjustment.multiplier + adjustment.bonus,
        );
    }
    QualityScore::from_breakdown(breakdown, degraded)
}

fn finite(value: f64, metric: &'static str) -> Result<f64, AnalysisError> {
    if value.is_finite() {
        Ok(value.clamp(0.0, 100.0))
    } else {
        Err(AnalysisError::NonFinite(metric))
    }
}

/// Exposure, contrast and sharpness at 0.3 / 0.35 / 0.35.
pub fn technical_score(report: &RasterReport) -> Result<f64, AnalysisError> {
    let stats = &report.stats;
    let exposure = (100.0 - (stats.brightness - 128.0).abs() / 1.28).clamp(0.0, 100.0);
    let contrast = (stats.contrast / 60.0 * 100.0).min(100.0);
    let sharpness = report.sharpness.clone()?.min(100.0);
    finite(
        0.3 * exposure + 0.35 * contrast + 0.35 * sharpness,
        "technical",
    )
}

/// Negative space, focal clarity and rule-of-thirds balance at 0.3 / 0.3 / 0.4.
pub fn composition_score(report: &RasterReport) -> Result<f64, AnalysisError> {
    let cells = report.variance.values().len();
    if cells == 0 || report.width == 0 || report.height == 0 {
        return Err(AnalysisError::Degenerate {
            width: report.width,
            height: report.height,
        });
    }
    let uniform_fraction = report.negative_spaces.len() as f64 / cells as f64;
    let negative_space = (uniform_fraction / 0.3 * 100.0).min(100.0);

    let focal_clarity = match report.focal_points.first() {
        None => 40.0,
        Some(top) => {
            let crowding = report.focal_points.len().saturating_sub(2) as f64 * 5.0;
            ((50.0 + top.strength / 2.0).min(100.0) - crowding).max(0.0)
        }
    };

    let subject = report
        .focal_points
        .first()
        .map(|point| (point.x, point.y))
        .or_else(|| report.subject_center());
    let balance = match subject {
        None => 50.0,
        Some((x, y)) => {
            let (fx, fy) = (x / report.width as f64, y / report.height as f64);
            let distance = THIRDS
                .iter()
                .map(|(tx, ty)| (fx - tx).hypot(fy - ty))
                .fold(f64::INFINITY, f64::min);
            (100.0 - distance * 250.0).clamp(0.0, 100.0)
        }
    };

    finite(
        0.3 * negative_space + 0.3 * focal_clarity + 0.4 * balance,
        "composition",
    )
}

/// Saturation, vibrancy and channel spread, with a saturation bonus for
/// styles that ask for it. Vivid niches also penalize washed-out frames.
pub fn color_harmony(
    stats: &ImageStats,
    style: &StyleProfile,
    niche: Option<&NicheProfile>,
) -> Result<f64, AnalysisError> {
    let saturation = (stats.saturation / 0.5 * 100.0).min(100.0);
    let vibrancy = (stats.colorfulness / 40.0 * 100.0).min(100.0);
    let spread = ((stats.std[0] + stats.std[1] + stats.std[2]) / 3.0 / 64.0 * 100.0).min(100.0);
    let mut value = 0.4 * saturation + 0.3 * vibrancy + 0.3 * spread;
    if style.prefers_high_saturation && stats.saturation > 0.45 {
        value += 10.0;
    }
    if niche.map(|niche| niche.palette) == Some(Palette::Vivid) {
        if stats.saturation > 0.45 {
            value += 10.0;
        } else if stats.saturation < 0.2 {
            value -= 10.0;
        }
    }
    finite(value, "color_harmony")
}

/// Planner's best-position score, boosted for confident placement and a
/// background far from mid-gray.
pub fn text_readability(analysis: &CompositionAnalysis) -> Result<f64, AnalysisError> {
    let position = &analysis.best_position;
    let mut value = position.score;
    if position.confidence >= 0.7 {
        value += 10.0;
    }
    let contrast = (analysis.text_color.background_luminance - 0.5).abs() * 2.0;
    value += contrast * 15.0;
    finite(value, "text_readability")
}

/// A focal point in the upper half stands in for a detected face.
pub fn face_score(report: &RasterReport, expects_face: bool) -> Result<f64, AnalysisError> {
    if !expects_face {
        return Ok(NO_FACE_EXPECTED_SCORE);
    }
    let half = report.height as f64 / 2.0;
    let upper = report
        .focal_points
        .iter()
        .filter(|point| point.y < half)
        .map(|point| point.strength)
        .fold(None, |best: Option<f64>, strength| {
            Some(best.map_or(strength, |current| current.max(strength)))
        });
    match upper {
        Some(strength) => finite(60.0 + (strength / 2.0).min(40.0), "face"),
        None => Ok(45.0),
    }
}

fn palette_fit(stats: &ImageStats, palette: Palette) -> f64 {
    let (met, bonus, penalty) = match palette {
        Palette::Any => return 0.0,
        Palette::Vivid => (stats.saturation > 0.45, 10.0, -10.0),
        Palette::HighContrast => (stats.contrast > 55.0, 10.0, -5.0),
        Palette::Bright => (stats.brightness > 140.0, 10.0, -10.0),
        Palette::Dark => (stats.brightness < 110.0, 10.0, -10.0),
    };
    if met {
        bonus
    } else {
        penalty
    }
}

/// Style preferences first, then the niche palette on top.
pub fn style_adherence(
    report: &RasterReport,
    style: &StyleProfile,
    niche: Option<&NicheProfile>,
) -> Result<f64, AnalysisError> {
    let stats = &report.stats;
    let mut value = 70.0;
    if let Some(niche) = niche {
        value += palette_fit(stats, niche.palette);
    }
    if style.prefers_high_saturation {
        value += if stats.saturation > 0.45 { 10.0 } else { -10.0 };
    }
    if style.prefers_high_contrast {
        value += if stats.contrast > 55.0 { 10.0 } else { -5.0 };
    }
    if style.prefers_dark {
        value += if stats.brightness < 110.0 { 10.0 } else { -10.0 };
    }
    if style.prefers_bright {
        value += if stats.brightness > 140.0 { 10.0 } else { -10.0 };
    }
    if style.prefers_faces {
        let half = report.height as f64 / 2.0;
        if report.focal_points.iter().any(|point| point.y < half) {
            value += 5.0;
        }
    }
    finite(value, "style_adherence")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use thumbforge_contracts::scoring::Recommendation;
    use thumbforge_contracts::tables::EngineTables;

    use super::*;
    use crate::raster::tests::{solid, subject_image};

    fn png(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    #[test]
    fn combine_clamps_adversarial_inputs() {
        let adjustments = [
            ScoreAdjustment {
                sub_score: SubScore::Face,
                multiplier: 10.0,
                bonus: 500.0,
            },
            ScoreAdjustment {
                sub_score: SubScore::Technical,
                multiplier: 1.0,
                bonus: f64::INFINITY,
            },
        ];
        let score = combine(ScoreBreakdown::uniform(100.0), &adjustments, Vec::new());
        assert_eq!(score.final_score, 100.0);
        assert_eq!(score.recommendation, Recommendation::Excellent);

        let low = combine(
            ScoreBreakdown::uniform(-1e9),
            &[ScoreAdjustment {
                sub_score: SubScore::Composition,
                multiplier: f64::NAN,
                bonus: 0.0,
            }],
            Vec::new(),
        );
        assert_eq!(low.final_score, 0.0);
        assert_eq!(low.recommendation, Recommendation::Poor);

        let neg_inf = combine(
            ScoreBreakdown::uniform(f64::NEG_INFINITY),
            &[],
            Vec::new(),
        );
        assert!((0.0..=100.0).contains(&neg_inf.final_score));
    }

    fn adjustment() -> impl Strategy<Value = ScoreAdjustment> {
        (prop::sample::select(SubScore::ALL.to_vec()), any::<f64>(), any::<f64>()).prop_map(
            |(sub_score, multiplier, bonus)| ScoreAdjustment {
                sub_score,
                multiplier,
                bonus,
            },
        )
    }

    proptest! {
        #[test]
        fn combined_score_stays_in_range(
            values in prop::collection::vec(any::<f64>(), SubScore::ALL.len()),
            adjustments in prop::collection::vec(adjustment(), 0..6),
        ) {
            let mut breakdown = ScoreBreakdown::default();
            for (sub_score, value) in SubScore::ALL.into_iter().zip(values) {
                breakdown.set(sub_score, value);
            }
            let score = combine(breakdown, &adjustments, Vec::new());
            prop_assert!((0.0..=100.0).contains(&score.final_score), "{}", score.final_score);
            prop_assert_eq!(score.recommendation, Recommendation::from_score(score.final_score));
        }
    }

    #[test]
    fn neutral_breakdown_lands_in_good_bucket() {
        let score = combine(ScoreBreakdown::default(), &[], Vec::new());
        assert_eq!(score.final_score, 70.0);
        assert_eq!(score.recommendation, Recommendation::Good);
    }

    #[test]
    fn undecodable_candidate_scores_neutral() {
        let tables = EngineTables::default();
        let scorer = QualityScorer::new(AnalysisThresholds::default());
        let ctx = ScoringContext {
            style: tables.style(None),
            niche: None,
            expects_face: false,
            composition: None,
        };
        let scored = scorer.score(b"nope", &ctx);
        assert_eq!(scored.score.final_score, 70.0);
        assert_eq!(scored.score.degraded.len(), 6);
        assert!(scored.composition.is_none());
    }

    #[test]
    fn disabled_composition_degrades_readability_only() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let scorer = QualityScorer::new(AnalysisThresholds::default());
        let bytes = png(&subject_image(640, 360, 100, 40, 300, 200))?;
        let ctx = ScoringContext {
            style: tables.style(None),
            niche: tables.niche(Some("tech")),
            expects_face: false,
            composition: None,
        };
        let scored = scorer.score(&bytes, &ctx);
        assert_eq!(scored.score.degraded, vec!["text_readability".to_string()]);
        assert_eq!(scored.score.breakdown.text_readability, 70.0);
        assert_eq!(scored.score.breakdown.face, NO_FACE_EXPECTED_SCORE);
        assert!((0.0..=100.0).contains(&scored.score.final_score));
        Ok(())
    }

    #[test]
    fn composition_is_returned_when_requested() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let scorer = QualityScorer::new(AnalysisThresholds::default());
        let image = subject_image(1280, 720, 700, 200, 1000, 600);
        let request = CompositionRequest {
            text_len: 10,
            font_size: 96.0,
            ..CompositionRequest::default()
        };
        let ctx = ScoringContext {
            style: tables.style(Some("mrbeast")),
            niche: None,
            expects_face: true,
            composition: Some(&request),
        };
        let scored = scorer.score_image(&image, &ctx);
        let composition = scored.composition.ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert!(!composition.fallback);
        assert!(scored.score.degraded.is_empty());
        assert!(scored.score.breakdown.face > 45.0);
        Ok(())
    }

    #[test]
    fn tiny_image_degrades_technical_but_still_scores() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let scorer = QualityScorer::new(AnalysisThresholds::default());
        let ctx = ScoringContext {
            style: tables.style(None),
            niche: None,
            expects_face: false,
            composition: None,
        };
        let scored = scorer.score(&png(&solid(1, 1, [200, 10, 10]))?, &ctx);
        assert!(scored.score.degraded.contains(&"technical".to_string()));
        assert!((0.0..=100.0).contains(&scored.score.final_score));
        Ok(())
    }

    #[test]
    fn face_score_uses_upper_half_focal_points() -> anyhow::Result<()> {
        let thresholds = AnalysisThresholds::default();
        let top = raster::analyze(&subject_image(600, 400, 200, 20, 400, 150), &thresholds)?;
        let bottom = raster::analyze(&subject_image(600, 400, 200, 260, 400, 390), &thresholds)?;
        assert!(face_score(&top, true)? > 60.0);
        assert_eq!(face_score(&bottom, true)?, 45.0);
        assert_eq!(face_score(&bottom, false)?, NO_FACE_EXPECTED_SCORE);
        Ok(())
    }

    #[test]
    fn dark_styles_reward_dark_frames() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let thresholds = AnalysisThresholds::default();
        let dark = raster::analyze(&solid(320, 180, [15, 15, 20]), &thresholds)?;
        let bright = raster::analyze(&solid(320, 180, [240, 240, 235]), &thresholds)?;
        let mkbhd = tables.style(Some("mkbhd"));
        assert!(style_adherence(&dark, mkbhd, None)? > style_adherence(&bright, mkbhd, None)?);
        Ok(())
    }

    #[test]
    fn niche_palette_changes_the_score_of_the_same_frame() -> anyhow::Result<()> {
        let tables = EngineTables::default();
        let scorer = QualityScorer::new(AnalysisThresholds::default());
        let frame = png(&solid(320, 180, [235, 235, 230]))?;
        let score_for = |niche: &str| {
            scorer.score(
                &frame,
                &ScoringContext {
                    style: tables.style(None),
                    niche: tables.niche(Some(niche)),
                    expects_face: false,
                    composition: None,
                },
            )
        };
        let education = score_for("education");
        let finance = score_for("finance");
        assert!(education.score.breakdown.style_adherence > finance.score.breakdown.style_adherence);
        assert!(education.score.final_score > finance.score.final_score);

        let gaming = score_for("gaming");
        let vlog = score_for("vlog");
        assert!(gaming.score.breakdown.color_harmony < vlog.score.breakdown.color_harmony);
        Ok(())
    }
}
