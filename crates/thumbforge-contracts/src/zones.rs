//! Canvas geometry shared by the planner and the fitter.
//!
//! All constants are expressed on the 1920x1080 reference canvas (the
//! bottom-left icon zone's width on the 1280-wide reference) and scaled to the
//! real canvas with [`Canvas::scale_x`] / [`Canvas::scale_y`].

use serde::{Deserialize, Serialize};

pub const REFERENCE_WIDTH: f64 = 1920.0;
pub const REFERENCE_HEIGHT: f64 = 1080.0;
const ICON_REFERENCE_WIDTH: f64 = 1280.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// Strict overlap: rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        const EPS: f64 = 1e-6;
        other.x >= self.x - EPS
            && other.y >= self.y - EPS
            && other.right() <= self.right() + EPS
            && other.bottom() <= self.bottom() + EPS
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.w, self.h)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerZone {
    pub name: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
}

impl Canvas {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn reference() -> Self {
        Self::new(REFERENCE_WIDTH, REFERENCE_HEIGHT)
    }

    pub fn scale_x(&self) -> f64 {
        self.width / REFERENCE_WIDTH
    }

    pub fn scale_y(&self) -> f64 {
        self.height / REFERENCE_HEIGHT
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    pub fn safe_zone(&self, platform: Platform) -> Rect {
        platform.profile().safe_rect_on(self)
    }

    pub fn duration_overlay(&self) -> DangerZone {
        let sx = self.scale_x();
        let sy = self.scale_y();
        DangerZone {
            name: "duration-overlay".to_string(),
            rect: Rect::new(1750.0 * sx, 1000.0 * sy, 170.0 * sx, 80.0 * sy),
        }
    }

    pub fn bottom_left_icon(&self) -> DangerZone {
        let sx = self.width / ICON_REFERENCE_WIDTH;
        let sy = self.scale_y();
        DangerZone {
            name: "bottom-left-icon".to_string(),
            rect: Rect::new(0.0, 920.0 * sy, 180.0 * sx, 160.0 * sy),
        }
    }

    pub fn danger_zones(&self) -> Vec<DangerZone> {
        vec![self.duration_overlay(), self.bottom_left_icon()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// Desktop player margins.
    #[default]
    Youtube,
    /// Mobile player margins.
    YoutubeMobile,
    Shorts,
    InstagramSquare,
    TwitterCard,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Youtube,
        Platform::YoutubeMobile,
        Platform::Shorts,
        Platform::InstagramSquare,
        Platform::TwitterCard,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::YoutubeMobile => "youtube-mobile",
            Self::Shorts => "shorts",
            Self::InstagramSquare => "instagram-square",
            Self::TwitterCard => "twitter-card",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase().replace('_', "-");
        match value.as_str() {
            "desktop" => Some(Self::Youtube),
            "mobile" => Some(Self::YoutubeMobile),
            other => Self::ALL.into_iter().find(|platform| platform.id() == other),
        }
    }

    pub fn profile(&self) -> PlatformProfile {
        let (width, height, aspect, inset, focus, min_subject, video_overlays) = match self {
            Self::Youtube => (1920, 1080, "16:9", (50.0, 90.0, 50.0, 90.0), FocusStrategy::Subject, 0.25, true),
            Self::YoutubeMobile => (1920, 1080, "16:9", (90.0, 160.0, 90.0, 160.0), FocusStrategy::Subject, 0.35, true),
            Self::Shorts => (1080, 1920, "9:16", (220.0, 120.0, 380.0, 60.0), FocusStrategy::Subject, 0.4, false),
            Self::InstagramSquare => (1080, 1080, "1:1", (60.0, 60.0, 60.0, 60.0), FocusStrategy::Center, 0.3, false),
            Self::TwitterCard => (1200, 628, "1.91:1", (40.0, 40.0, 40.0, 40.0), FocusStrategy::Center, 0.2, false),
        };
        PlatformProfile {
            id: self.id().to_string(),
            width,
            height,
            aspect_ratio: aspect.to_string(),
            safe_inset: EdgeInsets {
                top: inset.0,
                right: inset.1,
                bottom: inset.2,
                left: inset.3,
            },
            focus,
            min_subject_fraction: min_subject,
            video_overlays,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusStrategy {
    Subject,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeInsets {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

/// Target shape for one platform. Insets are in the profile's own pixels and
/// are scaled onto whatever canvas the text is actually laid out on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
    pub safe_inset: EdgeInsets,
    pub focus: FocusStrategy,
    pub min_subject_fraction: f64,
    /// Player chrome (duration badge, channel icon) drawn over the frame.
    pub video_overlays: bool,
}

impl PlatformProfile {
    pub fn canvas(&self) -> Canvas {
        Canvas::new(self.width as f64, self.height as f64)
    }

    pub fn safe_rect(&self) -> Rect {
        self.safe_rect_on(&self.canvas())
    }

    pub fn safe_rect_on(&self, canvas: &Canvas) -> Rect {
        let sx = canvas.width / (self.width.max(1) as f64);
        let sy = canvas.height / (self.height.max(1) as f64);
        let left = self.safe_inset.left * sx;
        let top = self.safe_inset.top * sy;
        Rect::new(
            left,
            top,
            (canvas.width - left - self.safe_inset.right * sx).max(0.0),
            (canvas.height - top - self.safe_inset.bottom * sy).max(0.0),
        )
    }

    pub fn danger_zones_on(&self, canvas: &Canvas) -> Vec<DangerZone> {
        if self.video_overlays {
            canvas.danger_zones()
        } else {
            Vec::new()
        }
    }
}
