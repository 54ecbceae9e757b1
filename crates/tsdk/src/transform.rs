//! Coordinate-frame math: dataset records store `[w, x, y, z]` quaternions
//! and global-frame translations; Foxglove wants vehicle-relative poses.

use glam::{DQuat, DVec3};

/// Dataset `[w, x, y, z]` quaternion to glam (which is x, y, z, w).
pub fn quat_wxyz(q: [f64; 4]) -> DQuat {
    DQuat::from_xyzw(q[1], q[2], q[3], q[0])
}

#[derive(Debug, Clone, Copy)]
pub struct RelativePose {
    pub position: DVec3,
    pub orientation: DQuat,
}

/// Express a global-frame pose relative to the ego pose:
/// `p' = q_ego^-1 * (p - t_ego)`, `q' = q_ego^-1 * q`.
pub fn ego_relative(
    ego_translation: [f64; 3],
    ego_rotation: [f64; 4],
    translation: [f64; 3],
    rotation: [f64; 4],
) -> RelativePose {
    let ego_inv = quat_wxyz(ego_rotation).inverse();
    RelativePose {
        position: ego_inv * (DVec3::from_array(translation) - DVec3::from_array(ego_translation)),
        orientation: ego_inv * quat_wxyz(rotation),
    }
}

/// Apply sensor extrinsics: sensor-frame point into the vehicle frame.
pub fn sensor_to_ego(translation: [f64; 3], rotation: [f64; 4], point: DVec3) -> DVec3 {
    quat_wxyz(rotation) * point + DVec3::from_array(translation)
}
