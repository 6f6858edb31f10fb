//! Mathematical types shared by every replica.
//!
//! These are the canonical representations written to the wire. All of them
//! are `Pod` so the codec can copy them as fixed-size little-endian floats.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D Vector - position, scale, velocity
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// All-ones vector (identity scale)
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Creates from array
    #[must_use]
    pub const fn from_array(arr: [f32; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Linear interpolation towards `other`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }

    /// Component-wise addition of `other * factor`.
    #[must_use]
    pub fn add_scaled(self, other: Self, factor: f32) -> Self {
        Self::new(
            self.x + other.x * factor,
            self.y + other.y * factor,
            self.z + other.z * factor,
        )
    }
}

/// Rotation quaternion (x, y, z, w).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Quat {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// W (scalar) component
    pub w: f32,
}

impl Quat {
    /// Creates a quaternion from raw components.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation.
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Rotation of `angle` radians around the Y axis.
    #[must_use]
    pub fn from_rotation_y(angle: f32) -> Self {
        let (sin, cos) = (angle * 0.5).sin_cos();
        Self::new(0.0, sin, 0.0, cos)
    }

    /// 4D dot product.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Returns the normalized quaternion, or identity for a zero quaternion.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.dot(self).sqrt();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Normalized linear interpolation along the shortest arc.
    #[must_use]
    pub fn nlerp(self, other: Self, t: f32) -> Self {
        let other = if self.dot(other) < 0.0 {
            Self::new(-other.x, -other.y, -other.z, -other.w)
        } else {
            other
        };
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
            self.w + (other.w - self.w) * t,
        )
        .normalize()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position, rotation and scale of one entity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World-space position.
    pub position: Vec3,
    /// World-space rotation.
    pub rotation: Quat,
    /// Local scale.
    pub scale: Vec3,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Creates a transform from its three channels.
    #[must_use]
    pub const fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quat_default_is_identity() {
        assert_eq!(Quat::default(), Quat::IDENTITY);
        assert_eq!(Transform::default().scale, Vec3::ONE);
    }

    #[test]
    fn test_nlerp_endpoints() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(1.0);
        let start = a.nlerp(b, 0.0);
        let end = a.nlerp(b, 1.0);
        assert!((start.dot(a) - 1.0).abs() < 1e-5);
        assert!((end.dot(b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vec3_lerp() {
        let v = Vec3::ZERO.lerp(Vec3::new(10.0, 0.0, -4.0), 0.5);
        assert_eq!(v, Vec3::new(5.0, 0.0, -2.0));
    }
}
