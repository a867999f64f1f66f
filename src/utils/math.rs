//! Gaze geometry helpers

use std::f32::consts::FRAC_PI_2;

/// Weight of a directional blendshape for a signed gaze angle in radians.
///
/// Positive angles map linearly onto `[0, 1]`, saturating at 90 degrees; the
/// opposite direction clamps to zero.
pub fn directional_weight(angle: f32) -> f32 {
    (angle / FRAC_PI_2).clamp(0.0, 1.0)
}

/// Decode a weighted-planar gaze encoding into a unit normal.
///
/// The encoded pair is the arctangent of the XY coordinates on a plane one
/// meter ahead of the eye; the decoded normal always has positive Z.
pub fn gaze_normal(x: f32, y: f32) -> [f32; 3] {
    let (px, py) = (x.tan(), y.tan());
    let len = (px * px + py * py + 1.0).sqrt();
    [px / len, py / len, 1.0 / len]
}
