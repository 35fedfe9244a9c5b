//! Camera and view management.

use glam::{Mat4, Vec3};
use lumina_core::constants::SHADOW_CASCADE_COUNT;
use lumina_core::{BoundingSphere, Frustum};

/// Blend between logarithmic and uniform cascade splits.
const CASCADE_SPLIT_LAMBDA: f32 = 0.75;

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    /// Create a new camera.
    pub fn new(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let direction = (target - position).normalize();
        Self {
            position,
            direction,
            up,
            fov,
            aspect,
            near,
            far,
        }
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn inverse_view_matrix(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    pub fn inverse_projection_matrix(&self) -> Mat4 {
        self.projection_matrix().inverse()
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Extract frustum planes from the current camera state.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection_matrix())
    }

    /// Get camera uniforms for GPU.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }

    /// Split the view frustum into `count` depth slices.
    ///
    /// Split distances blend a logarithmic and a uniform distribution. Each
    /// cascade carries the bounding sphere of its slice, which directional
    /// shadow projections are fitted to.
    pub fn cascades(&self, count: usize) -> Vec<Cascade> {
        let splits = cascade_splits(self.near, self.far, count, CASCADE_SPLIT_LAMBDA);
        let view = self.view_matrix();
        splits
            .windows(2)
            .map(|w| {
                let projection = Mat4::perspective_rh(self.fov, self.aspect, w[0], w[1]);
                let corners = Frustum::corners(projection * view);
                Cascade {
                    near: w[0],
                    far: w[1],
                    sphere: BoundingSphere::from_points(&corners),
                }
            })
            .collect()
    }
}

/// One depth slice of the camera frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cascade {
    pub near: f32,
    pub far: f32,
    /// World-space sphere enclosing the slice.
    pub sphere: BoundingSphere,
}

/// `count + 1` split distances from `near` to `far`.
pub fn cascade_splits(near: f32, far: f32, count: usize, lambda: f32) -> Vec<f32> {
    let count = count.max(1);
    let ratio = far / near;
    (0..=count)
        .map(|i| {
            if i == 0 {
                return near;
            }
            if i == count {
                return far;
            }
            let p = i as f32 / count as f32;
            let log = near * ratio.powf(p);
            let uniform = near + (far - near) * p;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Camera uniform buffer data for GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_view: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub position: [f32; 4],
    pub direction: [f32; 4],
    /// Far distance of each shadow cascade in view space.
    pub cascade_splits: [f32; SHADOW_CASCADE_COUNT],
}

impl From<&Camera> for CameraUniforms {
    fn from(camera: &Camera) -> Self {
        let mut cascade_splits = [camera.far; SHADOW_CASCADE_COUNT];
        let splits = cascade_splits_for(camera);
        for (slot, split) in cascade_splits.iter_mut().zip(splits.iter().skip(1)) {
            *slot = *split;
        }
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix().to_cols_array_2d(),
            inverse_view: camera.inverse_view_matrix().to_cols_array_2d(),
            inverse_projection: camera.inverse_projection_matrix().to_cols_array_2d(),
            position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            direction: [
                camera.direction.x,
                camera.direction.y,
                camera.direction.z,
                0.0,
            ],
            cascade_splits,
        }
    }
}

fn cascade_splits_for(camera: &Camera) -> Vec<f32> {
    cascade_splits(
        camera.near,
        camera.far,
        SHADOW_CASCADE_COUNT,
        CASCADE_SPLIT_LAMBDA,
    )
}
