//! Transform component.

use glam::{Mat4, Quat, Vec3};
use lumina_core::{set_if_changed, Dirty};

/// Position, rotation and scale of an entity.
///
/// The model matrix is cached and only recomputed on read after a setter
/// changed one of its inputs.
#[derive(Debug, Clone)]
pub struct Transform {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
    model: Dirty<Mat4>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            model: Dirty::clean(Mat4::IDENTITY),
        }
    }
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            model: Dirty::new(Mat4::IDENTITY),
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY, Vec3::ONE)
    }

    pub const fn position(&self) -> Vec3 {
        self.position
    }

    pub const fn rotation(&self) -> Quat {
        self.rotation
    }

    pub const fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_position(&mut self, position: Vec3) {
        if set_if_changed(&mut self.position, position) {
            self.model.invalidate();
        }
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        if set_if_changed(&mut self.rotation, rotation) {
            self.model.invalidate();
        }
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        if set_if_changed(&mut self.scale, scale) {
            self.model.invalidate();
        }
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.set_position(self.position + offset);
    }

    /// Apply `rotation` after the current rotation.
    pub fn rotate(&mut self, rotation: Quat) {
        self.set_rotation((rotation * self.rotation).normalize());
    }

    /// Direction the entity faces (-Z in local space).
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Whether the cached model matrix is stale.
    pub const fn is_dirty(&self) -> bool {
        self.model.is_dirty()
    }

    /// Model matrix, recomputed only if an input changed since the last read.
    pub fn model_matrix(&mut self) -> Mat4 {
        let (scale, rotation, position) = (self.scale, self.rotation, self.position);
        *self
            .model
            .get_or_update(|| Mat4::from_scale_rotation_translation(scale, rotation, position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_clean_identity() {
        let mut t = Transform::default();
        assert!(!t.is_dirty());
        assert_eq!(t.model_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn setters_invalidate_only_on_change() {
        let mut t = Transform::default();
        t.set_position(Vec3::ZERO);
        assert!(!t.is_dirty());

        t.set_position(Vec3::new(1.0, 2.0, 3.0));
        assert!(t.is_dirty());
        let m = t.model_matrix();
        assert!(!t.is_dirty());
        assert!(m.w_axis.truncate().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));

        t.set_scale(Vec3::ONE);
        assert!(!t.is_dirty());
    }

    #[test]
    fn forward_follows_rotation() {
        let mut t = Transform::default();
        assert!(t.forward().abs_diff_eq(Vec3::NEG_Z, 1e-6));
        t.rotate(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        assert!(t.forward().abs_diff_eq(Vec3::NEG_X, 1e-5));
    }
}
