use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scanned coupon code, exactly as read from the frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouponCode(pub String);

impl CouponCode {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of one confirmation request. Answers must carry the id they were
/// issued for, so a late answer from a torn-down prompt can be told apart
/// from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationId(pub Uuid);

impl ConfirmationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConfirmationId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegionError {
    #[error("region coordinates must lie in 0.0..=1.0 (got {0:?})")]
    OutOfBounds(Region),
}

/// Frame-relative bounding rectangle in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Like `new`, but refuses rectangles that leave the unit square.
    pub fn normalized(x: f32, y: f32, width: f32, height: f32) -> Result<Self, RegionError> {
        let region = Self::new(x, y, width, height);
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if in_unit(x) && in_unit(y) && in_unit(width) && in_unit(height)
            && in_unit(x + width)
            && in_unit(y + height)
        {
            Ok(region)
        } else {
            Err(RegionError::OutOfBounds(region))
        }
    }
}

/// Raw per-frame reading produced by the sensor worker, before any debounce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameCandidate {
    pub code: CouponCode,
    pub region: Region,
}

/// A candidate that survived the settle window. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub code: CouponCode,
    pub region: Region,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confirmation {
    Yes,
    No,
}

/// What the host screen ultimately hears about a scan.
///
/// `Redeemed` and `Cancelled` are terminal; `Declined` is a notification and
/// scanning continues afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionOutcome {
    Redeemed(CouponCode),
    Declined,
    Cancelled,
}
