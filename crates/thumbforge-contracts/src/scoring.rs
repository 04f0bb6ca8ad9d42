use serde::{Deserialize, Serialize};

/// Neutral value substituted for a sub-score whose analysis failed.
pub const NEUTRAL_SUB_SCORE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub face: f64,
    pub composition: f64,
    pub text_readability: f64,
    pub color_harmony: f64,
    pub technical: f64,
    pub style_adherence: f64,
}

pub const SCORE_WEIGHTS: ScoreWeights = ScoreWeights {
    face: 0.25,
    composition: 0.20,
    text_readability: 0.20,
    color_harmony: 0.15,
    technical: 0.10,
    style_adherence: 0.10,
};

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.face
            + self.composition
            + self.text_readability
            + self.color_harmony
            + self.technical
            + self.style_adherence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubScore {
    Face,
    Composition,
    TextReadability,
    ColorHarmony,
    Technical,
    StyleAdherence,
}

impl SubScore {
    pub const ALL: [SubScore; 6] = [
        SubScore::Face,
        SubScore::Composition,
        SubScore::TextReadability,
        SubScore::ColorHarmony,
        SubScore::Technical,
        SubScore::StyleAdherence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Composition => "composition",
            Self::TextReadability => "text_readability",
            Self::ColorHarmony => "color_harmony",
            Self::Technical => "technical",
            Self::StyleAdherence => "style_adherence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub face: f64,
    pub composition: f64,
    pub text_readability: f64,
    pub color_harmony: f64,
    pub technical: f64,
    pub style_adherence: f64,
}

impl Default for ScoreBreakdown {
    fn default() -> Self {
        Self::uniform(NEUTRAL_SUB_SCORE)
    }
}

impl ScoreBreakdown {
    pub fn uniform(value: f64) -> Self {
        Self {
            face: value,
            composition: value,
            text_readability: value,
            color_harmony: value,
            technical: value,
            style_adherence: value,
        }
    }

    pub fn get(&self, sub_score: SubScore) -> f64 {
        match sub_score {
            SubScore::Face => self.face,
            SubScore::Composition => self.composition,
            SubScore::TextReadability => self.text_readability,
            SubScore::ColorHarmony => self.color_harmony,
            SubScore::Technical => self.technical,
            SubScore::StyleAdherence => self.style_adherence,
        }
    }

    pub fn set(&mut self, sub_score: SubScore, value: f64) {
        let slot = match sub_score {
            SubScore::Face => &mut self.face,
            SubScore::Composition => &mut self.composition,
            SubScore::TextReadability => &mut self.text_readability,
            SubScore::ColorHarmony => &mut self.color_harmony,
            SubScore::Technical => &mut self.technical,
            SubScore::StyleAdherence => &mut self.style_adherence,
        };
        *slot = value;
    }

    /// Weighted sum with [`SCORE_WEIGHTS`], clamped to [0, 100].
    ///
    /// Non-finite sub-scores count as the neutral value.
    pub fn weighted_total(&self) -> f64 {
        let w = SCORE_WEIGHTS;
        let total = finite_or_neutral(self.face) * w.face
            + finite_or_neutral(self.composition) * w.composition
            + finite_or_neutral(self.text_readability) * w.text_readability
            + finite_or_neutral(self.color_harmony) * w.color_harmony
            + finite_or_neutral(self.technical) * w.technical
            + finite_or_neutral(self.style_adherence) * w.style_adherence;
        if total.is_finite() {
            total.clamp(0.0, 100.0)
        } else if total > 0.0 {
            100.0
        } else {
            0.0
        }
    }
}

fn finite_or_neutral(value: f64) -> f64 {
    if value.is_nan() {
        return NEUTRAL_SUB_SCORE;
    }
    value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    Excellent,
    Good,
    Acceptable,
    NeedsImprovement,
    Poor,
}

impl Recommendation {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 55.0 {
            Self::Acceptable
        } else if score >= 40.0 {
            Self::NeedsImprovement
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Acceptable => "acceptable",
            Self::NeedsImprovement => "needs-improvement",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub final_score: f64,
    pub breakdown: ScoreBreakdown,
    pub recommendation: Recommendation,
    /// Sub-scores that fell back to the neutral value.
    #[serde(default)]
    pub degraded: Vec<String>,
}

impl QualityScore {
    pub fn from_breakdown(breakdown: ScoreBreakdown, degraded: Vec<String>) -> Self {
        let final_score = breakdown.weighted_total();
        Self {
            final_score,
            breakdown,
            recommendation: Recommendation::from_score(final_score),
            degraded,
        }
    }
}
