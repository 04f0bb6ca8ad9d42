use serde::{Deserialize, Serialize};

pub const MIN_VARIANTS: u32 = 1;
pub const MAX_VARIANTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Basic,
    #[default]
    Pro,
    Premium,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Premium => "premium",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "pro" => Some(Self::Pro),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Quality,
    Speed,
    Cost,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Speed => "speed",
            Self::Cost => "cost",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "quality" | "maximize_quality" => Some(Self::Quality),
            "speed" | "time" | "fast" => Some(Self::Speed),
            "cost" | "cheap" | "cheaper" => Some(Self::Cost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImage {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    #[serde(default = "default_mime")]
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlacementHints {
    /// Named text zone, e.g. `top-right`.
    pub text_zone: Option<String>,
    /// Free-form subject placement, e.g. `left`, `right`, `center`.
    pub subject_position: Option<String>,
}

/// One job's input. Built once from the accepted job, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub brief: String,
    #[serde(default)]
    pub niche: Option<String>,
    #[serde(default)]
    pub creator_style: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub reference_faces: Vec<ReferenceImage>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_variant_count")]
    pub variant_count: u32,
    #[serde(default)]
    pub quality_tier: QualityTier,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub placement: PlacementHints,
}

impl GenerationRequest {
    pub fn new(brief: impl Into<String>) -> Self {
        Self {
            brief: brief.into(),
            niche: None,
            creator_style: None,
            expression: None,
            reference_faces: Vec::new(),
            text: None,
            variant_count: default_variant_count(),
            quality_tier: QualityTier::default(),
            priority: Priority::default(),
            placement: PlacementHints::default(),
        }
    }

    pub fn has_face(&self) -> bool {
        self.reference_faces
            .iter()
            .any(|face| !face.bytes.is_empty())
    }

    pub fn overlay_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn normalized_variant_count(&self) -> u32 {
        self.variant_count.clamp(MIN_VARIANTS, MAX_VARIANTS)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.brief.trim().is_empty() {
            return Err("brief must not be empty".to_string());
        }
        if !(MIN_VARIANTS..=MAX_VARIANTS).contains(&self.variant_count) {
            return Err(format!(
                "variant_count must be between {MIN_VARIANTS} and {MAX_VARIANTS} (got {})",
                self.variant_count
            ));
        }
        Ok(())
    }
}

fn default_variant_count() -> u32 {
    2
}

fn default_mime() -> String {
    "image/png".to_string()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BASE64
            .decode(raw.trim().as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
