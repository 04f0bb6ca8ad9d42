use serde::{Deserialize, Serialize};

use crate::zones::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    #[default]
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    /// Fraction of the box that sits left of / above the anchor point.
    pub fn offsets(&self) -> (f64, f64) {
        match self {
            Self::TopLeft => (0.0, 0.0),
            Self::TopCenter => (0.5, 0.0),
            Self::TopRight => (1.0, 0.0),
            Self::MiddleLeft => (0.0, 0.5),
            Self::Center => (0.5, 0.5),
            Self::MiddleRight => (1.0, 0.5),
            Self::BottomLeft => (0.0, 1.0),
            Self::BottomCenter => (0.5, 1.0),
            Self::BottomRight => (1.0, 1.0),
        }
    }

    /// Box of size `w`x`h` placed so that its anchor point lands on (`x`, `y`).
    pub fn box_at(&self, x: f64, y: f64, w: f64, h: f64) -> Rect {
        let (ox, oy) = self.offsets();
        Rect::new(x - ox * w, y - oy * h, w, h)
    }

    /// Inverse of [`Anchor::box_at`].
    pub fn point_of(&self, rect: &Rect) -> (f64, f64) {
        let (ox, oy) = self.offsets();
        (rect.x + ox * rect.w, rect.y + oy * rect.h)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Some(Self::TopLeft),
            "top-center" | "top" => Some(Self::TopCenter),
            "top-right" => Some(Self::TopRight),
            "middle-left" | "left" => Some(Self::MiddleLeft),
            "center" | "middle" => Some(Self::Center),
            "middle-right" | "right" => Some(Self::MiddleRight),
            "bottom-left" => Some(Self::BottomLeft),
            "bottom-center" | "bottom" => Some(Self::BottomCenter),
            "bottom-right" => Some(Self::BottomRight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub x: f64,
    pub y: f64,
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NegativeSpace {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub uniformity: f64,
    pub region_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPosition {
    pub x: f64,
    pub y: f64,
    pub anchor: Anchor,
    pub score: f64,
    pub zone: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextColor {
    pub fill: String,
    pub stroke: String,
    /// Background luminance (0-1) sampled around the text position.
    pub background_luminance: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionAnalysis {
    pub focal_points: Vec<FocalPoint>,
    pub negative_spaces: Vec<NegativeSpace>,
    pub best_position: TextPosition,
    pub text_color: TextColor,
    /// True when the analysis could not run and the documented fallback was used.
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLayout {
    pub x: f64,
    pub y: f64,
    pub anchor: Anchor,
    pub font_size: f64,
    pub lines: Vec<String>,
    pub fits: bool,
    pub position_adjusted: bool,
    pub bounds: Rect,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_at_and_point_of_are_inverse() {
        for anchor in [
            Anchor::TopLeft,
            Anchor::Center,
            Anchor::BottomRight,
            Anchor::MiddleLeft,
        ] {
            let rect = anchor.box_at(400.0, 300.0, 200.0, 80.0);
            let (x, y) = anchor.point_of(&rect);
            assert!((x - 400.0).abs() < 1e-9 && (y - 300.0).abs() < 1e-9);
        }
        let rect = Anchor::BottomRight.box_at(100.0, 100.0, 40.0, 20.0);
        assert_eq!(rect, Rect::new(60.0, 80.0, 40.0, 20.0));
    }

    #[test]
    fn anchor_parse_accepts_short_names() {
        assert_eq!(Anchor::parse("top"), Some(Anchor::TopCenter));
        assert_eq!(Anchor::parse("bottom_right"), Some(Anchor::BottomRight));
        assert_eq!(Anchor::parse("nowhere"), None);
    }
}
