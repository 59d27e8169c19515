//! Rotation error as a regularized log map.

use nalgebra::{UnitQuaternion, Vector3};

/// World-frame rotation vector taking `current` onto `target`
/// (the log map of `target * current^-1`).
///
/// `eps` guards the small-angle branch so the result stays smooth through
/// the identity; the original controller uses `1e-7`.
pub fn rotation_error(
    current: &UnitQuaternion<f64>,
    target: &UnitQuaternion<f64>,
    eps: f64,
) -> Vector3<f64> {
    let rel = target * current.inverse();

    // Shortest path: flip to the positive-w hemisphere.
    let (w, v) = if rel.w >= 0.0 {
        (rel.w, Vector3::new(rel.i, rel.j, rel.k))
    } else {
        (-rel.w, -Vector3::new(rel.i, rel.j, rel.k))
    };

    let sin_half = v.norm();
    if sin_half < eps {
        // angle/sin(angle/2) -> 2 as angle -> 0
        v * 2.0
    } else {
        let angle = 2.0 * sin_half.atan2(w);
        v * (angle / sin_half)
    }
}
