//! Engine configuration.
//!
//! Built-in defaults, merged in order with `~/.thumbforge/config.json`, the
//! file named by `THUMBFORGE_CONFIG`, and finally an explicit path. Later
//! layers override individual keys of earlier ones.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thumbforge_contracts::jobs::PipelineVersion;
use thumbforge_contracts::request::QualityTier;
use thumbforge_contracts::tables::EngineTables;
use thumbforge_contracts::zones::Platform;

pub const CONFIG_ENV: &str = "THUMBFORGE_CONFIG";

/// Empirically tuned heuristics; kept configurable with these defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisThresholds {
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub subject_grid: u32,
    pub focal_brightness_delta: f64,
    pub focal_variance: f64,
    pub negative_space_variance: f64,
    pub focal_proximity_fraction: f64,
    pub max_focal_points: usize,
    pub sharpness_divisor: f64,
    pub samples_per_cell_axis: u32,
    pub user_zone_min_score: f64,
}

impl Default for AnalysisThresholds {
    fn default() -> Self {
        Self {
            grid_cols: 12,
            grid_rows: 8,
            subject_grid: 3,
            focal_brightness_delta: 30.0,
            focal_variance: 50.0,
            negative_space_variance: 30.0,
            focal_proximity_fraction: 0.15,
            max_focal_points: 5,
            sharpness_divisor: 0.4,
            samples_per_cell_axis: 12,
            user_zone_min_score: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutDefaults {
    pub max_font_size: f64,
    pub min_font_size: f64,
    pub font_step: f64,
    pub max_lines: usize,
    pub line_height: f64,
    pub stroke_width: f64,
    pub platform: Platform,
    pub enforce_safe_zone: bool,
}

impl Default for LayoutDefaults {
    fn default() -> Self {
        Self {
            max_font_size: 160.0,
            min_font_size: 48.0,
            font_step: 8.0,
            max_lines: 3,
            line_height: 1.15,
            stroke_width: 6.0,
            platform: Platform::Youtube,
            enforce_safe_zone: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionDefaults {
    pub min_score: f64,
    pub extra_candidates_basic: u32,
    pub extra_candidates_pro: u32,
    pub extra_candidates_premium: u32,
    pub max_candidates: u32,
}

impl Default for SelectionDefaults {
    fn default() -> Self {
        Self {
            min_score: 50.0,
            extra_candidates_basic: 0,
            extra_candidates_pro: 1,
            extra_candidates_premium: 2,
            max_candidates: 5,
        }
    }
}

impl SelectionDefaults {
    pub fn extra_for(&self, tier: QualityTier) -> u32 {
        match tier {
            QualityTier::Basic => self.extra_candidates_basic,
            QualityTier::Pro => self.extra_candidates_pro,
            QualityTier::Premium => self.extra_candidates_premium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis: AnalysisThresholds,
    pub layout: LayoutDefaults,
    pub selection: SelectionDefaults,
    pub pipeline_versions: Vec<PipelineVersion>,
    pub output_width: u32,
    pub output_height: u32,
    pub http_timeout_s: f64,
    /// Optional JSON file with style/niche table rows.
    pub tables_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisThresholds::default(),
            layout: LayoutDefaults::default(),
            selection: SelectionDefaults::default(),
            pipeline_versions: PipelineVersion::CHAIN.to_vec(),
            output_width: 1920,
            output_height: 1080,
            http_timeout_s: 120.0,
            tables_path: None,
        }
    }
}

impl EngineConfig {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        let mut layers: Vec<PathBuf> = Vec::new();
        if let Some(path) = home_config_path().filter(|path| path.exists()) {
            layers.push(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV).map(PathBuf::from) {
            layers.push(path);
        }
        if let Some(path) = explicit {
            layers.push(path.to_path_buf());
        }
        for path in layers {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading config {}", path.display()))?;
            let overlay: Value = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in config {}", path.display()))?;
            merge_values(&mut merged, overlay);
        }
        let mut config: Self =
            serde_json::from_value(merged).context("config does not match the schema")?;
        config.sanitize();
        Ok(config)
    }

    pub fn tables(&self) -> Result<EngineTables> {
        let mut tables = EngineTables::default();
        if let Some(path) = &self.tables_path {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading tables {}", path.display()))?;
            tables
                .merge_json(&raw)
                .with_context(|| format!("invalid tables file {}", path.display()))?;
        }
        Ok(tables)
    }

    /// Lay out for `platform` at the profile's own output size.
    pub fn apply_platform(&mut self, platform: Platform) {
        let profile = platform.profile();
        self.layout.platform = platform;
        self.output_width = profile.width;
        self.output_height = profile.height;
    }

    fn sanitize(&mut self) {
        let layout = &mut self.layout;
        layout.min_font_size = layout.min_font_size.max(1.0);
        layout.max_font_size = layout.max_font_size.max(layout.min_font_size);
        layout.font_step = layout.font_step.max(1.0);
        layout.max_lines = layout.max_lines.max(1);
        layout.line_height = layout.line_height.max(1.0);
        self.selection.max_candidates = self.selection.max_candidates.max(1);
        self.analysis.grid_cols = self.analysis.grid_cols.max(1);
        self.analysis.grid_rows = self.analysis.grid_rows.max(1);
        self.analysis.subject_grid = self.analysis.subject_grid.max(1);
        self.analysis.samples_per_cell_axis = self.analysis.samples_per_cell_axis.max(1);
        if self.analysis.sharpness_divisor <= 0.0 {
            self.analysis.sharpness_divisor = AnalysisThresholds::default().sharpness_divisor;
        }
        if self.pipeline_versions.is_empty() {
            self.pipeline_versions = PipelineVersion::CHAIN.to_vec();
        }
        self.http_timeout_s = self.http_timeout_s.clamp(1.0, 600.0);
    }
}

fn home_config_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".thumbforge").join("config.json"))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
