use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thumbforge_contracts::backends::BackendRegistry;
use thumbforge_contracts::request::ReferenceImage;

pub const HTTP_TIMEOUT_ENV: &str = "THUMBFORGE_HTTP_TIMEOUT_S";

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    /// 0-based candidate index within the current pass.
    pub index: usize,
    pub reference_images: Vec<ReferenceImage>,
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SynthesizedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub backend: String,
}

/// Opaque pixel generator. Implementations may ignore reference images.
pub trait SynthesisBackend: Send + Sync {
    fn id(&self) -> &str;
    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedImage>;
}

#[derive(Default)]
pub struct BackendSet {
    backends: BTreeMap<String, Box<dyn SynthesisBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: SynthesisBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.id().to_string(), Box::new(backend));
    }

    pub fn get(&self, id: &str) -> Option<&dyn SynthesisBackend> {
        self.backends.get(id).map(|backend| backend.as_ref())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// One offline backend per registry entry.
    pub fn dryrun(registry: &BackendRegistry) -> Self {
        let mut set = Self::new();
        for spec in registry.list() {
            set.register(DryrunBackend::new(&spec.id));
        }
        set
    }

    /// HTTP backends for every registry entry with a configured endpoint;
    /// the rest run offline. `THUMBFORGE_HTTP_TIMEOUT_S` overrides
    /// `default_timeout_s`.
    pub fn from_env(registry: &BackendRegistry, default_timeout_s: f64) -> Result<Self> {
        let timeout = http_timeout_from_env(default_timeout_s);
        let mut set = Self::new();
        for spec in registry.list() {
            match HttpBackend::from_env(&spec.id, timeout)? {
                Some(backend) => set.register(backend),
                None => {
                    tracing::debug!(backend = %spec.id, "no endpoint configured; using dryrun");
                    set.register(DryrunBackend::new(&spec.id));
                }
            }
        }
        Ok(set)
    }
}

fn http_timeout_from_env(default_timeout_s: f64) -> Duration {
    let seconds = non_empty_env(HTTP_TIMEOUT_ENV)
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(default_timeout_s);
    Duration::from_secs_f64(seconds.clamp(1.0, 600.0))
}

/// Deterministic offline backend. Draws a gradient with one bright textured
/// block so downstream analysis has something to find.
pub struct DryrunBackend {
    id: String,
    failing: BTreeSet<usize>,
    fail_all: bool,
    calls: AtomicUsize,
}

impl DryrunBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            failing: BTreeSet::new(),
            fail_all: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(indices);
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SynthesisBackend for DryrunBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing.contains(&request.index) {
            bail!(
                "dryrun backend '{}' configured to fail candidate {}",
                self.id,
                request.index
            );
        }
        let image = render_dryrun_image(
            request.width.max(1),
            request.height.max(1),
            &request.prompt,
            request.index as u64,
        );
        Ok(SynthesizedImage {
            bytes: encode_png(&image)?,
            mime: "image/png".to_string(),
            backend: self.id.clone(),
        })
    }
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(out.into_inner())
}

fn prompt_digest(prompt: &str, seed: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Short stable id for a prompt/index pair, used in logs.
pub fn short_id(prompt: &str, index: u64) -> String {
    hex::encode(&prompt_digest(prompt, index)[..4])
}

fn render_dryrun_image(width: u32, height: u32, prompt: &str, seed: u64) -> RgbImage {
    let digest = prompt_digest(prompt, seed);
    let (r, g, b) = (digest[0], digest[1], digest[2]);
    let mut image = RgbImage::new(width, height);
    for (_, y, pixel) in image.enumerate_pixels_mut() {
        let t = y as f64 / height.max(1) as f64;
        let shade = |channel: u8| ((channel as f64) * (0.35 + 0.4 * t)) as u8;
        *pixel = Rgb([shade(r), shade(g), shade(b)]);
    }

    // Subject block: a third of the frame, horizontally placed by the digest.
    let block_w = (width / 3).max(1);
    let block_h = (height / 2).max(1);
    let slots = width.saturating_sub(block_w).max(1);
    let x0 = (u32::from(digest[3]) * slots / 255).min(width.saturating_sub(block_w));
    let y0 = (height / 3).min(height.saturating_sub(block_h));
    let accent = [digest[4] | 0x80, digest[5] | 0x60, digest[6] | 0x40];
    for y in y0..(y0 + block_h).min(height) {
        for x in x0..(x0 + block_w).min(width) {
            let px = if (x / 6 + y / 6) % 2 == 0 {
                accent
            } else {
                [accent[0] / 4, accent[1] / 4, accent[2] / 4]
            };
            image.put_pixel(x, y, Rgb(px));
        }
    }
    image
}

/// JSON-over-HTTP synthesis backend.
///
/// Configured per registry id from `THUMBFORGE_<ID>_ENDPOINT` and
/// `THUMBFORGE_<ID>_API_KEY` (id upper-cased, `-` replaced by `_`).
pub struct HttpBackend {
    id: String,
    endpoint: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl HttpBackend {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            id: id.into(),
            endpoint: endpoint.into().trim().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    pub fn from_env(id: &str, timeout: Duration) -> Result<Option<Self>> {
        let prefix = env_prefix(id);
        let Some(endpoint) = non_empty_env(&format!("{prefix}_ENDPOINT")) else {
            return Ok(None);
        };
        let api_key = non_empty_env(&format!("{prefix}_API_KEY"));
        Self::new(id, endpoint, api_key, timeout).map(Some)
    }

    fn payload(request: &SynthesisRequest) -> Value {
        let references: Vec<Value> = request
            .reference_images
            .iter()
            .filter(|image| !image.bytes.is_empty())
            .map(|image| {
                json!({
                    "mime": image.mime,
                    "base64": BASE64.encode(&image.bytes),
                })
            })
            .collect();
        json!({
            "prompt": request.prompt,
            "width": request.width,
            "height": request.height,
            "index": request.index,
            "params": request.params,
            "reference_images": references,
        })
    }

    fn download(&self, url: &str) -> Result<(Vec<u8>, String)> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("{} output download failed ({url})", self.id))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} output download failed ({})", self.id, status.as_u16());
        }
        let mime = content_type(&response).unwrap_or_else(|| "image/png".to_string());
        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading {} output bytes", self.id))?
            .to_vec();
        Ok((bytes, mime))
    }
}

impl SynthesisBackend for HttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedImage> {
        let mut call = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "image/*, application/json")
            .json(&Self::payload(request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .with_context(|| format!("{} request failed ({})", self.id, self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "{} request failed ({}): {}",
                self.id,
                status.as_u16(),
                truncate_text(&body, 512)
            );
        }

        let mime = content_type(&response).unwrap_or_default();
        let (bytes, mime) = if mime.starts_with("image/") {
            let bytes = response
                .bytes()
                .with_context(|| format!("failed reading {} image bytes", self.id))?
                .to_vec();
            (bytes, mime)
        } else {
            let payload: Value = response
                .json()
                .with_context(|| format!("{} returned invalid JSON payload", self.id))?;
            match decode_json_image(&payload)? {
                JsonImage::Inline(bytes) => (bytes, "image/png".to_string()),
                JsonImage::Url(url) => self.download(&url)?,
            }
        };
        if bytes.is_empty() {
            bail!("{} returned an empty image", self.id);
        }
        Ok(SynthesizedImage {
            bytes,
            mime,
            backend: self.id.clone(),
        })
    }
}

#[derive(Debug, PartialEq)]
enum JsonImage {
    Inline(Vec<u8>),
    Url(String),
}

fn decode_json_image(payload: &Value) -> Result<JsonImage> {
    let inline = payload
        .get("image")
        .or_else(|| payload.get("base64"))
        .or_else(|| {
            payload
                .get("data")
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|row| row.get("b64_json"))
        })
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(encoded) = inline {
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .context("image base64 decode failed")?;
        return Ok(JsonImage::Inline(bytes));
    }
    let url = payload
        .get("url")
        .or_else(|| payload.get("output"))
        .and_then(|value| match value {
            Value::Array(rows) => rows.first(),
            other => Some(other),
        })
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| value.starts_with("http://") || value.starts_with("https://"));
    match url {
        Some(url) => Ok(JsonImage::Url(url.to_string())),
        None => bail!("JSON response missing image bytes"),
    }
}

fn content_type(response: &HttpResponse) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase())
}

fn env_prefix(id: &str) -> String {
    let normalized: String = id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("THUMBFORGE_{normalized}")
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|last| last == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
