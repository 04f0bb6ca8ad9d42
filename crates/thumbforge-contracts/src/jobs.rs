use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::layout::{CompositionAnalysis, TextLayout};
use crate::request::GenerationRequest;
use crate::scoring::QualityScore;

pub const JOB_RECORD_SCHEMA_VERSION: u64 = 1;

/// Orchestration strategy tag. Richer strategies compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineVersion {
    V2,
    V3,
    V8,
    V9,
}

impl PipelineVersion {
    /// Richest first.
    pub const CHAIN: [PipelineVersion; 4] = [
        PipelineVersion::V9,
        PipelineVersion::V8,
        PipelineVersion::V3,
        PipelineVersion::V2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
            Self::V8 => "v8",
            Self::V9 => "v9",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "v2" => Some(Self::V2),
            "v3" => Some(Self::V3),
            "v8" => Some(Self::V8),
            "v9" => Some(Self::V9),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible result unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub label: String,
    #[serde(skip)]
    pub image: Vec<u8>,
    pub mime: String,
    pub backend: String,
    pub quality: QualityScore,
    pub text_layout: Option<TextLayout>,
    pub composition: Option<CompositionAnalysis>,
}

pub fn new_job_id() -> String {
    format!("job-{}", Uuid::new_v4().simple())
}

pub fn variant_label(index: usize) -> String {
    let mut label = String::new();
    let mut n = index;
    loop {
        label.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    label
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionFailure {
    pub version: PipelineVersion,
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub label: String,
    pub image_path: String,
    pub backend: String,
    pub quality: QualityScore,
    pub text_layout: Option<TextLayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub schema_version: u64,
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub request: GenerationRequest,
    #[serde(default)]
    pub variants: Vec<VariantRecord>,
    pub pipeline_version: Option<PipelineVersion>,
    #[serde(default)]
    pub prior_failures: Vec<VersionFailure>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub failure_message: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl JobRecord {
    pub fn queued(job_id: impl Into<String>, request: GenerationRequest, created_at: String) -> Self {
        Self {
            schema_version: JOB_RECORD_SCHEMA_VERSION,
            job_id: job_id.into(),
            status: JobStatus::Queued,
            attempts: 0,
            request,
            variants: Vec::new(),
            pipeline_version: None,
            prior_failures: Vec::new(),
            warnings: Vec::new(),
            failure_message: None,
            created_at,
            finished_at: None,
        }
    }
}

/// Pretty JSON with reference-face bytes replaced by `<omitted>`.
pub fn write_job_record(path: &Path, record: &JobRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = sanitize_payload(&serde_json::to_value(record)?);
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

pub fn read_job_record(path: &Path) -> anyhow::Result<JobRecord> {
    let raw = std::fs::read_to_string(path)?;
    let mut payload: Value = serde_json::from_str(&raw)?;
    restore_omitted_faces(&mut payload);
    Ok(serde_json::from_value(payload)?)
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "bytes" | "image_bytes" | "b64_json") {
                    out.insert(key.clone(), Value::String(OMITTED.to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

const OMITTED: &str = "<omitted>";

// Records are reloaded for status queries; omitted faces come back empty.
fn restore_omitted_faces(payload: &mut Value) {
    let Some(faces) = payload
        .get_mut("request")
        .and_then(|request| request.get_mut("reference_faces"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for face in faces.iter_mut() {
        if let Some(bytes) = face.get_mut("bytes") {
            if bytes.as_str() == Some(OMITTED) {
                *bytes = Value::String(String::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::request::ReferenceImage;
    use crate::scoring::ScoreBreakdown;

    #[test]
    fn pipeline_versions_order_richest_first() {
        assert!(PipelineVersion::V9 > PipelineVersion::V8);
        assert!(PipelineVersion::V8 > PipelineVersion::V3);
        assert!(PipelineVersion::V3 > PipelineVersion::V2);
        let mut sorted = PipelineVersion::CHAIN.to_vec();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(sorted, PipelineVersion::CHAIN.to_vec());
        assert_eq!(PipelineVersion::parse("V8"), Some(PipelineVersion::V8));
    }

    #[test]
    fn variant_labels_are_spreadsheet_style() {
        assert_eq!(variant_label(0), "A");
        assert_eq!(variant_label(4), "E");
        assert_eq!(variant_label(25), "Z");
        assert_eq!(variant_label(26), "AA");
    }

    #[test]
    fn job_ids_are_unique_and_prefixed() {
        let a = new_job_id();
        let b = new_job_id();
        assert!(a.starts_with("job-"));
        assert_ne!(a, b);
    }

    #[test]
    fn job_record_omits_face_bytes_on_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("job-1").join("job.json");

        let mut request = GenerationRequest::new("unboxing the new phone");
        request.reference_faces.push(ReferenceImage {
            bytes: vec![9; 32],
            mime: "image/png".to_string(),
        });
        let mut record = JobRecord::queued("job-1", request, "2026-01-01T00:00:00Z".to_string());
        record.status = JobStatus::Completed;
        record.pipeline_version = Some(PipelineVersion::V8);
        record.variants.push(VariantRecord {
            label: "A".to_string(),
            image_path: "variant-A.png".to_string(),
            backend: "creative".to_string(),
            quality: QualityScore::from_breakdown(ScoreBreakdown::uniform(80.0), Vec::new()),
            text_layout: None,
        });
        write_job_record(&path, &record)?;

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["request"]["reference_faces"][0]["bytes"], json!("<omitted>"));
        assert_eq!(raw["pipeline_version"], json!("v8"));
        assert_eq!(raw["variants"][0]["quality"]["recommendation"], json!("good"));

        let loaded = read_job_record(&path)?;
        assert_eq!(loaded.status, JobStatus::Completed);
        assert!(loaded.request.reference_faces[0].bytes.is_empty());
        assert_eq!(loaded.variants.len(), 1);
        Ok(())
    }
}
