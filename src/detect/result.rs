use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame-pixel coordinates.
///
/// Width and height are unsigned. `x`/`y` may be negative when an external
/// detection extends past the top-left frame edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }
}

/// One person found by the external detection service.
///
/// No identity across frames: detections are recomputed every cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// In `[0, 1]` when the service reports one.
    pub confidence: Option<f32>,
    pub label: String,
}

/// One bright light source found by the bright-spot detector.
#[derive(Clone, Debug, PartialEq)]
pub struct FlashlightRegion {
    pub bbox: BoundingBox,
    /// Foreground pixel count of the component (not the box area).
    pub area: f32,
}

/// Raw center-format prediction as returned by the inference service.
///
/// Every field is optional on the wire; missing geometry is rejected by the
/// person adapter, not by deserialization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub class: Option<String>,
}

impl Prediction {
    /// Fully specified prediction (tests and stub backends).
    pub fn centered(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            width: Some(width),
            height: Some(height),
            confidence: Some(confidence),
            class: Some("person".to_string()),
        }
    }
}
