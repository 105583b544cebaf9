//! Quaternion handling for recorded orientations.
//!
//! Recorded quaternions are scalar-first `(w, x, y, z)`. The math library
//! expects scalar-last `(x, y, z, w)`, so every conversion goes through
//! [`wxyz_to_xyzw`] first.

use bridge_rlds_shared::{BridgeRldsError, Result};
use glam::{DQuat, EulerRot};

/// Reorder a scalar-first quaternion to scalar-last.
pub fn wxyz_to_xyzw(q: [f64; 4]) -> [f64; 4] {
    let [w, x, y, z] = q;
    [x, y, z, w]
}

/// Convert a recorded `(w, x, y, z)` quaternion to extrinsic x-y-z Euler
/// angles `[roll, pitch, yaw]` in radians.
///
/// The quaternion is normalized first; a zero (or non-finite) norm is an
/// `InvalidValue` for `field`.
pub fn euler_xyz_from_wxyz(field: &str, q: [f64; 4]) -> Result<[f64; 3]> {
    let [x, y, z, w] = wxyz_to_xyzw(q);
    let quat = DQuat::from_xyzw(x, y, z, w);

    let norm = quat.length();
    if !norm.is_finite() || norm == 0.0 {
        return Err(BridgeRldsError::invalid(
            field,
            format!("quaternion {q:?} cannot be normalized"),
        ));
    }

    // Extrinsic x-y-z equals intrinsic Z-Y-X: R = Rz(yaw) * Ry(pitch) * Rx(roll).
    let (yaw, pitch, roll) = (quat / norm).to_euler(EulerRot::ZYX);
    Ok([roll, pitch, yaw])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: [f64; 3], expected: [f64; 3]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn reorder_moves_scalar_last() {
        assert_eq!(wxyz_to_xyzw([1.0, 2.0, 3.0, 4.0]), [2.0, 3.0, 4.0, 1.0]);
    }

    #[test]
    fn identity_is_zero_rotation() {
        let euler = euler_xyz_from_wxyz("q", [1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(euler.iter().all(|a| a.abs() < 1e-12), "{euler:?}");
    }

    #[test]
    fn pure_roll_comes_through_reorder() {
        let half = 0.15f64;
        let euler = euler_xyz_from_wxyz("q", [half.cos(), half.sin(), 0.0, 0.0]).unwrap();
        assert_close(euler, [0.3, 0.0, 0.0]);
    }

    #[test]
    fn skipping_the_reorder_gives_a_different_rotation() {
        let half = 0.15f64;
        let raw = [half.cos(), half.sin(), 0.0, 0.0];
        let reordered = euler_xyz_from_wxyz("q", raw).unwrap();
        // Feeding the raw array as if it were already (x, y, z, w).
        let [x, y, z, w] = raw;
        let (c, b, a) = DQuat::from_xyzw(x, y, z, w).normalize().to_euler(EulerRot::ZYX);
        let differs =
            (reordered[0] - a).abs() > 1e-3 || (reordered[2] - c).abs() > 1e-3 || b.abs() > 1e-3;
        assert!(differs);
    }

    #[test]
    fn matches_composed_rotation() {
        let (roll, pitch, yaw) = (0.2, -0.4, 1.1);
        let q = DQuat::from_euler(EulerRot::ZYX, yaw, pitch, roll);
        let euler = euler_xyz_from_wxyz("q", [q.w, q.x, q.y, q.z]).unwrap();
        assert_close(euler, [roll, pitch, yaw]);
    }

    #[test]
    fn unnormalized_input_is_accepted() {
        let euler = euler_xyz_from_wxyz("q", [2.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(euler.iter().all(|a| a.abs() < 1e-12));
    }

    #[test]
    fn zero_quaternion_is_invalid() {
        let err = euler_xyz_from_wxyz("end_effector_ori_quat", [0.0; 4]).unwrap_err();
        assert!(matches!(err, BridgeRldsError::InvalidValue { .. }));
        assert!(err.to_string().contains("end_effector_ori_quat"));
    }
}
