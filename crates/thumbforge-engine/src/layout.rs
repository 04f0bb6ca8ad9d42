//! Font sizing, word wrap and safe-zone placement for overlay text.

use serde::{Deserialize, Serialize};
use thumbforge_contracts::layout::{Anchor, TextLayout, TextPosition};
use thumbforge_contracts::zones::{Canvas, DangerZone, Platform, Rect};

use crate::config::LayoutDefaults;

/// Gap left between a moved text box and the danger zone it was moved out of.
const DANGER_CLEARANCE: f64 = 4.0;
const MAX_DANGER_PASSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub font_family: String,
    pub font_weight: u16,
    pub stroke_width: f64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "Impact".to_string(),
            font_weight: 800,
            stroke_width: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitConstraints {
    pub enforce_safe_zone: bool,
    pub max_lines: usize,
    pub max_font_size: f64,
    pub min_font_size: f64,
    pub font_step: f64,
    pub line_height: f64,
    pub platform: Platform,
}

impl From<&LayoutDefaults> for FitConstraints {
    fn from(defaults: &LayoutDefaults) -> Self {
        Self {
            enforce_safe_zone: defaults.enforce_safe_zone,
            max_lines: defaults.max_lines,
            max_font_size: defaults.max_font_size,
            min_font_size: defaults.min_font_size,
            font_step: defaults.font_step,
            line_height: defaults.line_height,
            platform: defaults.platform,
        }
    }
}

impl Default for FitConstraints {
    fn default() -> Self {
        Self::from(&LayoutDefaults::default())
    }
}

impl FitConstraints {
    /// Font bounds scaled for a canvas other than the 1920x1080 reference.
    ///
    /// The configured sizes, the `min_font_size` floor included, are given at
    /// the reference scale, so on a 960x540 canvas the 48px floor becomes 24px.
    pub fn scaled_for(&self, canvas: &Canvas) -> Self {
        let factor = canvas.scale_x().min(canvas.scale_y());
        if !factor.is_finite() || factor <= 0.0 || (factor - 1.0).abs() < 1e-9 {
            return *self;
        }
        Self {
            max_font_size: (self.max_font_size * factor).max(1.0),
            min_font_size: (self.min_font_size * factor).max(1.0),
            font_step: (self.font_step * factor).max(1.0),
            ..*self
        }
    }
}

fn char_width_factor(ch: char) -> f64 {
    match ch {
        'i' | 'l' | 'I' | 'j' | '!' | '.' | ',' | ':' | ';' | '\'' | '|' | ' ' => 0.3,
        'M' | 'W' | 'm' | 'w' => 0.85,
        '0'..='9' => 0.56,
        c if c.is_uppercase() => 0.68,
        _ => 0.55,
    }
}

/// Estimated rendered width of one line.
pub fn measure_line(text: &str, font_size: f64, style: &TextStyle) -> f64 {
    let weight = if style.font_weight >= 700 { 1.05 } else { 1.0 };
    let glyphs: f64 = text.chars().map(char_width_factor).sum();
    glyphs * font_size * weight + 2.0 * style.stroke_width.max(0.0)
}

/// Greedy wrap. Returns the lines and whether any line is wider than `max_width`.
pub fn wrap(text: &str, font_size: f64, max_width: f64, style: &TextStyle) -> (Vec<String>, bool) {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{current} {word}");
        if measure_line(&candidate, font_size, style) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    let too_wide = lines
        .iter()
        .any(|line| measure_line(line, font_size, style) > max_width);
    (lines, too_wide)
}

struct Attempt {
    font_size: f64,
    lines: Vec<String>,
    fits: bool,
}

fn attempt(text: &str, font_size: f64, area: &Rect, style: &TextStyle, constraints: &FitConstraints) -> Attempt {
    let (lines, too_wide) = wrap(text, font_size, area.w, style);
    let height = lines.len().max(1) as f64 * font_size * constraints.line_height;
    let fits = !too_wide && lines.len() <= constraints.max_lines && height <= area.h;
    Attempt {
        font_size,
        lines,
        fits,
    }
}

/// Fit `text` at `requested`, shrinking from the maximum font size towards the
/// floor and moving the box out of the way of platform overlays.
pub fn fit(
    text: &str,
    style: &TextStyle,
    requested: &TextPosition,
    canvas: Canvas,
    constraints: &FitConstraints,
) -> TextLayout {
    let profile = constraints.platform.profile();
    let area = if constraints.enforce_safe_zone {
        profile.safe_rect_on(&canvas)
    } else {
        canvas.bounds()
    };
    let floor = constraints.min_font_size.max(1.0);
    let step = constraints.font_step.max(1.0);
    let mut warnings = Vec::new();

    let mut size = constraints.max_font_size.max(floor);
    let mut current = attempt(text, size, &area, style, constraints);
    while !current.fits && size > floor {
        size = (size - step).max(floor);
        current = attempt(text, size, &area, style, constraints);
    }

    let mut lines = current.lines;
    let mut overflowed = !current.fits;
    if lines.len() > constraints.max_lines.max(1) {
        let keep = constraints.max_lines.max(1);
        let tail = lines.split_off(keep - 1).join(" ");
        lines.push(tail);
    }
    let width = lines
        .iter()
        .map(|line| measure_line(line, current.font_size, style))
        .fold(0.0, f64::max);
    let height = lines.len().max(1) as f64 * current.font_size * constraints.line_height;
    if overflowed {
        warnings.push(format!(
            "text overflows the safe area at the minimum font size {:.0}px",
            current.font_size
        ));
    }
    if text.trim().is_empty() {
        warnings.push("empty text".to_string());
        overflowed = false;
    }

    let mut bounds = requested.anchor.box_at(requested.x, requested.y, width, height);
    let mut adjusted = false;

    if constraints.enforce_safe_zone {
        let clamped = clamp_into(&bounds, &area);
        if clamped != bounds {
            adjusted = true;
            bounds = clamped;
        }
    }

    let dangers = profile.danger_zones_on(&canvas);
    for _ in 0..MAX_DANGER_PASSES {
        let Some(danger) = dangers.iter().find(|zone| bounds.intersects(&zone.rect)) else {
            break;
        };
        bounds = move_out_of(&bounds, danger, &area, constraints.enforce_safe_zone);
        adjusted = true;
        warnings.push(format!("moved text clear of {}", danger.name));
    }

    let clear = dangers.iter().all(|zone| !bounds.intersects(&zone.rect));
    let inside = area.contains(&bounds);
    if !clear {
        warnings.push("text still overlaps a platform overlay".to_string());
    }
    let (x, y) = requested.anchor.point_of(&bounds);

    TextLayout {
        x,
        y,
        anchor: requested.anchor,
        font_size: current.font_size,
        lines,
        fits: inside && clear && !overflowed,
        position_adjusted: adjusted,
        bounds,
        warnings,
    }
}

fn clamp_axis(start: f64, len: f64, min: f64, max: f64) -> f64 {
    if len >= max - min {
        return min;
    }
    start.clamp(min, max - len)
}

fn clamp_into(rect: &Rect, area: &Rect) -> Rect {
    Rect::new(
        clamp_axis(rect.x, rect.w, area.x, area.right()),
        clamp_axis(rect.y, rect.h, area.y, area.bottom()),
        rect.w,
        rect.h,
    )
}

/// Smallest single-axis translation that clears `danger`, preferring moves
/// that keep the box inside `area`.
fn move_out_of(rect: &Rect, danger: &DangerZone, area: &Rect, keep_inside: bool) -> Rect {
    let zone = danger.rect;
    let moves = [
        (0.0, zone.y - rect.bottom() - DANGER_CLEARANCE),
        (0.0, zone.bottom() - rect.y + DANGER_CLEARANCE),
        (zone.x - rect.right() - DANGER_CLEARANCE, 0.0),
        (zone.right() - rect.x + DANGER_CLEARANCE, 0.0),
    ];
    let distance = |(dx, dy): &(f64, f64)| dx.abs() + dy.abs();
    let best_inside = moves
        .iter()
        .filter(|(dx, dy)| !keep_inside || area.contains(&rect.translated(*dx, *dy)))
        .min_by(|a, b| distance(a).total_cmp(&distance(b)));
    let chosen = best_inside
        .or_else(|| moves.iter().min_by(|a, b| distance(a).total_cmp(&distance(b))))
        .copied()
        .unwrap_or((0.0, 0.0));
    rect.translated(chosen.0, chosen.1)
}

/// Caller-chosen anchor point, at full confidence.
pub fn requested_position(anchor: Anchor, x: f64, y: f64) -> TextPosition {
    TextPosition {
        x,
        y,
        anchor,
        score: 0.0,
        zone: "requested".to_string(),
        confidence: 1.0,
    }
}
