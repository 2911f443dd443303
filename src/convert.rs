//! Conversion from the authoring Z-up, Y-forward convention to the KN5
//! Y-up, Z-forward convention.

use glam::{Mat4, Quat, Vec3};

/// Maps `(x, y, z)` to `(x, z, -y)`.
pub fn convert_vector3(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, -v.y)
}

/// Rebuilds the rotation around the converted axis.
pub fn convert_quaternion(q: Quat) -> Quat {
    let (axis, angle) = q.to_axis_angle();
    Quat::from_axis_angle(convert_vector3(axis), angle)
}

/// Decomposes into translation, rotation and scale, converts each part and
/// recomposes as `T * R * S`. The Y and Z scale components trade places
/// along with their axes.
pub fn convert_matrix(m: Mat4) -> Mat4 {
    let (scale, rotation, translation) = m.to_scale_rotation_translation();
    let translation = convert_vector3(translation);
    let rotation = convert_quaternion(rotation);
    let scale = Vec3::new(scale.x, scale.z, scale.y);
    Mat4::from_translation(translation) * Mat4::from_quat(rotation) * Mat4::from_scale(scale)
}

/// Inverse of [`convert_vector3`]: maps `(x, y, z)` to `(x, -z, y)`.
pub fn revert_vector3(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, v.y)
}

/// Inverse of [`convert_quaternion`].
pub fn revert_quaternion(q: Quat) -> Quat {
    let (axis, angle) = q.to_axis_angle();
    Quat::from_axis_angle(revert_vector3(axis), angle)
}

/// Inverse of [`convert_matrix`].
pub fn revert_matrix(m: Mat4) -> Mat4 {
    let (scale, rotation, translation) = m.to_scale_rotation_translation();
    let translation = revert_vector3(translation);
    let rotation = revert_quaternion(rotation);
    let scale = Vec3::new(scale.x, scale.z, scale.y);
    Mat4::from_translation(translation) * Mat4::from_quat(rotation) * Mat4::from_scale(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::EulerRot;

    const TOLERANCE: f32 = 1e-5;

    fn assert_vec3_close(a: Vec3, b: Vec3) {
        assert!((a - b).abs().max_element() < TOLERANCE, "{a} != {b}");
    }

    #[test]
    fn vector_swaps_up_axis() {
        assert_eq!(convert_vector3(Vec3::new(1.0, 2.0, 3.0)), Vec3::new(1.0, 3.0, -2.0));
        assert_eq!(convert_vector3(Vec3::Z), Vec3::Y);
    }

    #[test]
    fn vector_round_trip() {
        for v in [
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-4.5, 0.25, -9.0),
            Vec3::ZERO,
        ] {
            assert_vec3_close(revert_vector3(convert_vector3(v)), v);
        }
    }

    #[test]
    fn quaternion_round_trip() {
        let q = Quat::from_euler(EulerRot::ZYX, 0.3, -1.1, 2.0);
        let back = revert_quaternion(convert_quaternion(q));
        // q and -q describe the same rotation
        let dot = q.dot(back).abs();
        assert!((dot - 1.0).abs() < TOLERANCE, "dot = {dot}");
    }

    #[test]
    fn quaternion_rotates_converted_vectors() {
        let q = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let v = Vec3::new(1.0, 0.5, -2.0);
        let expected = convert_vector3(q * v);
        let actual = convert_quaternion(q) * convert_vector3(v);
        assert_vec3_close(actual, expected);
    }

    #[test]
    fn matrix_round_trip() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 0.5),
            Quat::from_euler(EulerRot::ZYX, 0.7, 0.2, -0.4),
            Vec3::new(10.0, -3.0, 4.0),
        );
        let back = revert_matrix(convert_matrix(m));
        // entries scale with the translation, so compare relative to magnitude
        for (a, b) in back.to_cols_array().iter().zip(m.to_cols_array().iter()) {
            assert!((a - b).abs() < TOLERANCE * b.abs().max(1.0), "{back} != {m}");
        }
    }

    #[test]
    fn matrix_swaps_scale_and_translation() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::IDENTITY,
            Vec3::new(5.0, 6.0, 7.0),
        );
        let (scale, _, translation) = convert_matrix(m).to_scale_rotation_translation();
        assert_vec3_close(scale, Vec3::new(1.0, 3.0, 2.0));
        assert_vec3_close(translation, Vec3::new(5.0, 7.0, -6.0));
    }
}
