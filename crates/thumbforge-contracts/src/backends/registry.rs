use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    /// Keeps the identity of a supplied reference face. Useless without one.
    FacePreserving,
    Creative,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub id: String,
    pub name: String,
    pub latency_s: f64,
    pub cost_usd: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub baseline_quality: f64,
    pub role: BackendRole,
    pub fallback: Option<String>,
}

impl BackendSpec {
    pub fn requires_face(&self) -> bool {
        self.role == BackendRole::FacePreserving
    }
}

#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: IndexMap<String, BackendSpec>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BackendRegistry {
    pub fn new(backends: Option<IndexMap<String, BackendSpec>>) -> Self {
        Self {
            backends: backends.unwrap_or_else(default_backends),
        }
    }

    pub fn get(&self, id: &str) -> Option<&BackendSpec> {
        self.backends.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &BackendSpec> {
        self.backends.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn by_role(&self, role: BackendRole) -> Option<&BackendSpec> {
        self.backends.values().find(|spec| spec.role == role)
    }

    pub fn face_preserving(&self) -> Option<&BackendSpec> {
        self.by_role(BackendRole::FacePreserving)
    }

    pub fn creative(&self) -> Option<&BackendSpec> {
        self.by_role(BackendRole::Creative)
    }

    /// Backends that can run without a reference face, or all of them when
    /// a face is available.
    pub fn usable(&self, has_face: bool) -> impl Iterator<Item = &BackendSpec> {
        self.backends
            .values()
            .filter(move |spec| has_face || !spec.requires_face())
    }

    pub fn fastest(&self, has_face: bool) -> Option<&BackendSpec> {
        self.usable(has_face)
            .min_by(|a, b| a.latency_s.total_cmp(&b.latency_s))
    }

    pub fn cheapest(&self, has_face: bool) -> Option<&BackendSpec> {
        self.usable(has_face)
            .min_by(|a, b| a.cost_usd.total_cmp(&b.cost_usd))
    }
}

fn default_backends() -> IndexMap<String, BackendSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str,
                      name: &str,
                      latency_s: f64,
                      cost_usd: f64,
                      strengths: &[&str],
                      weaknesses: &[&str],
                      baseline_quality: f64,
                      role: BackendRole,
                      fallback: Option<&str>| {
        map.insert(
            id.to_string(),
            BackendSpec {
                id: id.to_string(),
                name: name.to_string(),
                latency_s,
                cost_usd,
                strengths: strengths.iter().map(|item| (*item).to_string()).collect(),
                weaknesses: weaknesses.iter().map(|item| (*item).to_string()).collect(),
                baseline_quality,
                role,
                fallback: fallback.map(str::to_string),
            },
        );
    };

    insert(
        "face-lock",
        "Face Lock identity diffusion",
        28.0,
        0.055,
        &["identity", "faces", "expressions"],
        &["slow", "needs-reference"],
        86.0,
        BackendRole::FacePreserving,
        Some("creative"),
    );
    insert(
        "creative",
        "Creative diffusion",
        14.0,
        0.030,
        &["stylized", "composition", "color"],
        &["identity"],
        84.0,
        BackendRole::Creative,
        Some("photoreal"),
    );
    insert(
        "photoreal",
        "Photoreal XL",
        20.0,
        0.040,
        &["photorealism", "lighting", "products"],
        &["stylized"],
        85.0,
        BackendRole::General,
        Some("creative"),
    );
    insert(
        "turbo",
        "Turbo lightning",
        3.0,
        0.006,
        &["speed"],
        &["detail", "text-space"],
        70.0,
        BackendRole::General,
        Some("creative"),
    );
    insert(
        "budget",
        "Budget diffusion",
        9.0,
        0.002,
        &["cost"],
        &["detail", "faces"],
        66.0,
        BackendRole::General,
        Some("turbo"),
    );

    map
}
