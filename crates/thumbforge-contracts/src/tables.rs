//! Static style and niche tables.
//!
//! Built once at start-up and handed to components by reference; nothing here
//! is mutated while jobs run.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::backends::BackendRegistry;
use crate::scoring::SubScore;

pub const DEFAULT_STYLE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

/// Look a niche's audience expects from a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    #[default]
    Any,
    Vivid,
    HighContrast,
    Bright,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub sub_score: SubScore,
    #[serde(default = "unit_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    pub id: String,
    pub preferred_backend: String,
    pub color_grade: String,
    pub lighting: String,
    #[serde(default)]
    pub prompt_keywords: Vec<String>,
    #[serde(default)]
    pub prefers_high_saturation: bool,
    #[serde(default)]
    pub prefers_high_contrast: bool,
    #[serde(default)]
    pub prefers_dark: bool,
    #[serde(default)]
    pub prefers_bright: bool,
    #[serde(default)]
    pub prefers_faces: bool,
    #[serde(default)]
    pub text_sides: Vec<Side>,
    #[serde(default)]
    pub adjustments: Vec<ScoreAdjustment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicheProfile {
    pub id: String,
    pub backend_hint: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub text_sides: Vec<Side>,
    #[serde(default)]
    pub palette: Palette,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TableOverrides {
    #[serde(default)]
    styles: Vec<StyleProfile>,
    #[serde(default)]
    niches: Vec<NicheProfile>,
}

#[derive(Debug, Clone)]
pub struct EngineTables {
    pub backends: BackendRegistry,
    styles: IndexMap<String, StyleProfile>,
    niches: IndexMap<String, NicheProfile>,
}

impl Default for EngineTables {
    fn default() -> Self {
        Self {
            backends: BackendRegistry::default(),
            styles: default_styles(),
            niches: default_niches(),
        }
    }
}

impl EngineTables {
    /// Style by name, falling back to the `default` style for unknown names.
    pub fn style(&self, name: Option<&str>) -> &StyleProfile {
        let key = name
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty());
        key.and_then(|key| self.styles.get(&key))
            .or_else(|| self.styles.get(DEFAULT_STYLE))
            .or_else(|| self.styles.values().next())
            .unwrap_or(&FALLBACK_STYLE)
    }

    pub fn niche(&self, name: Option<&str>) -> Option<&NicheProfile> {
        let key = name?.trim().to_ascii_lowercase();
        self.niches.get(&key)
    }

    pub fn style_ids(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }

    pub fn niche_ids(&self) -> Vec<String> {
        self.niches.keys().cloned().collect()
    }

    /// Merge `{"styles": [...], "niches": [...]}` rows over the built-ins.
    pub fn merge_json(&mut self, raw: &str) -> anyhow::Result<()> {
        let overrides: TableOverrides = serde_json::from_str(raw)?;
        for style in overrides.styles {
            self.styles.insert(style.id.to_ascii_lowercase(), style);
        }
        for niche in overrides.niches {
            self.niches.insert(niche.id.to_ascii_lowercase(), niche);
        }
        Ok(())
    }
}

static FALLBACK_STYLE: StyleProfile = StyleProfile {
    id: String::new(),
    preferred_backend: String::new(),
    color_grade: String::new(),
    lighting: String::new(),
    prompt_keywords: Vec::new(),
    prefers_high_saturation: false,
    prefers_high_contrast: false,
    prefers_dark: false,
    prefers_bright: false,
    prefers_faces: false,
    text_sides: Vec::new(),
    adjustments: Vec::new(),
};

fn unit_multiplier() -> f64 {
    1.0
}

fn adjust(sub_score: SubScore, multiplier: f64, bonus: f64) -> ScoreAdjustment {
    ScoreAdjustment {
        sub_score,
        multiplier,
        bonus,
    }
}

fn default_styles() -> IndexMap<String, StyleProfile> {
    let mut map = IndexMap::new();
    let base = |id: &str, backend: &str, grade: &str, lighting: &str| StyleProfile {
        id: id.to_string(),
        preferred_backend: backend.to_string(),
        color_grade: grade.to_string(),
        lighting: lighting.to_string(),
        prompt_keywords: Vec::new(),
        prefers_high_saturation: false,
        prefers_high_contrast: false,
        prefers_dark: false,
        prefers_bright: false,
        prefers_faces: false,
        text_sides: Vec::new(),
        adjustments: Vec::new(),
    };

    let mut style = base(
        DEFAULT_STYLE,
        "creative",
        "balanced vivid grade",
        "soft key light",
    );
    style.text_sides = vec![Side::Top];
    map.insert(style.id.clone(), style);

    let mut style = base(
        "mrbeast",
        "creative",
        "hyper-saturated punchy grade",
        "bright even studio lighting",
    );
    style.prompt_keywords = vec!["exaggerated reaction".to_string(), "bold colors".to_string()];
    style.prefers_high_saturation = true;
    style.prefers_high_contrast = true;
    style.prefers_bright = true;
    style.prefers_faces = true;
    style.text_sides = vec![Side::Top, Side::Right];
    style.adjustments = vec![
        adjust(SubScore::ColorHarmony, 1.10, 0.0),
        adjust(SubScore::Face, 1.0, 5.0),
    ];
    map.insert(style.id.clone(), style);

    let mut style = base(
        "mkbhd",
        "photoreal",
        "clean matte grade with deep blacks",
        "dramatic low-key product lighting",
    );
    style.prompt_keywords = vec!["minimal background".to_string(), "crisp detail".to_string()];
    style.prefers_high_contrast = true;
    style.prefers_dark = true;
    style.text_sides = vec![Side::Right];
    style.adjustments = vec![adjust(SubScore::Technical, 1.10, 0.0)];
    map.insert(style.id.clone(), style);

    let mut style = base(
        "veritasium",
        "photoreal",
        "natural documentary grade",
        "natural daylight",
    );
    style.prompt_keywords = vec!["curious expression".to_string(), "science prop".to_string()];
    style.prefers_faces = true;
    style.text_sides = vec![Side::Top];
    style.adjustments = vec![adjust(SubScore::Composition, 1.0, 5.0)];
    map.insert(style.id.clone(), style);

    let mut style = base(
        "cinematic",
        "photoreal",
        "teal and orange film grade",
        "moody rim lighting",
    );
    style.prompt_keywords = vec!["anamorphic".to_string(), "shallow depth of field".to_string()];
    style.prefers_high_contrast = true;
    style.prefers_dark = true;
    style.text_sides = vec![Side::Left, Side::Bottom];
    style.adjustments = vec![adjust(SubScore::Composition, 1.05, 0.0)];
    map.insert(style.id.clone(), style);

    let mut style = base(
        "minimal",
        "creative",
        "muted pastel grade",
        "flat diffuse lighting",
    );
    style.prompt_keywords = vec!["generous negative space".to_string()];
    style.prefers_bright = true;
    style.text_sides = vec![Side::Left];
    style.adjustments = vec![adjust(SubScore::TextReadability, 1.0, 5.0)];
    map.insert(style.id.clone(), style);

    map
}

fn default_niches() -> IndexMap<String, NicheProfile> {
    let mut map = IndexMap::new();
    let mut insert = |id: &str, hint: Option<&str>, keywords: &[&str], sides: &[Side], palette: Palette| {
        map.insert(
            id.to_string(),
            NicheProfile {
                id: id.to_string(),
                backend_hint: hint.map(str::to_string),
                keywords: keywords.iter().map(|item| (*item).to_string()).collect(),
                text_sides: sides.to_vec(),
                palette,
            },
        );
    };

    insert("tech", Some("creative"), &["sleek gadget", "glowing accents"], &[Side::Right], Palette::HighContrast);
    insert("gaming", Some("creative"), &["neon game world", "action pose"], &[Side::Top], Palette::Vivid);
    insert("finance", Some("photoreal"), &["charts", "stacks of cash"], &[Side::Left], Palette::Dark);
    insert("education", Some("photoreal"), &["whiteboard", "diagram"], &[Side::Top], Palette::Bright);
    insert("vlog", Some("face-lock"), &["candid moment", "travel backdrop"], &[], Palette::Any);
    insert("fitness", Some("face-lock"), &["gym", "athletic build"], &[Side::Left], Palette::HighContrast);
    insert("food", Some("photoreal"), &["close-up dish", "steam"], &[Side::Top], Palette::Vivid);

    map
}
