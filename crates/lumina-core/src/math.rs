//! Math utilities and helpers.

use glam::{Mat4, Vec3, Vec4};

/// Axis-Aligned Bounding Box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Build the tightest AABB around a set of points.
    ///
    /// Returns the default (degenerate) box for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some((first, rest)) = points.split_first() else {
            return Self::default();
        };
        let mut aabb = Self::new(*first, *first);
        for point in rest {
            aabb.expand_to_include(*point);
        }
        aabb
    }

    /// Get the center of the AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the AABB
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if a point is inside the AABB
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Expand AABB to include a point
    #[inline]
    pub fn expand_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Merge two AABBs
    #[inline]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Bounding sphere.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    #[inline]
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere centered on the centroid of `points` enclosing all of them.
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let center = points.iter().copied().sum::<Vec3>() / points.len() as f32;
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0_f32, f32::max);
        Self { center, radius }
    }

    /// Returns `true` if `other` lies entirely inside this sphere.
    #[inline]
    pub fn contains_sphere(&self, other: &Self) -> bool {
        self.center.distance(other.center) + other.radius <= self.radius
    }

    /// Returns `true` if the two spheres overlap.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.center.distance(other.center) <= self.radius + other.radius
    }
}

/// Frustum for culling operations.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    /// Six frustum planes (left, right, bottom, top, near, far)
    /// Each plane is (nx, ny, nz, d) where n is normal and d is distance
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: Mat4) -> Self {
        let row0 = vp.row(0);
        let row1 = vp.row(1);
        let row2 = vp.row(2);
        let row3 = vp.row(3);

        let planes = [
            (row3 + row0).normalize(), // Left
            (row3 - row0).normalize(), // Right
            (row3 + row1).normalize(), // Bottom
            (row3 - row1).normalize(), // Top
            row2.normalize(),          // Near (zero-to-one depth)
            (row3 - row2).normalize(), // Far
        ];

        Self { planes }
    }

    /// World-space corners of the frustum described by `view_projection`.
    ///
    /// Near plane corners come first, then far plane corners, both in
    /// (-x -y, +x -y, +x +y, -x +y) order. Assumes zero-to-one clip depth.
    pub fn corners(view_projection: Mat4) -> [Vec3; 8] {
        let inverse = view_projection.inverse();
        let mut corners = [Vec3::ZERO; 8];
        let ndc = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        for (layer, z) in [0.0_f32, 1.0].into_iter().enumerate() {
            for (i, (x, y)) in ndc.iter().enumerate() {
                let clip = inverse * Vec4::new(*x, *y, z, 1.0);
                corners[layer * 4 + i] = clip.truncate() / clip.w;
            }
        }
        corners
    }

    /// Test if a sphere is inside or intersects the frustum
    pub fn test_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes.iter().all(|plane| {
            let normal = Vec3::new(plane.x, plane.y, plane.z);
            normal.dot(sphere.center) + plane.w >= -sphere.radius
        })
    }

    /// Test if an AABB is inside or intersects the frustum
    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let normal = Vec3::new(plane.x, plane.y, plane.z);

            // Find the positive vertex (furthest along plane normal)
            let p = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);

            if normal.dot(p) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn aabb_contains_point() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(aabb.contains_point(Vec3::splat(0.5)));
        assert!(aabb.contains_point(Vec3::ZERO));
        assert!(aabb.contains_point(Vec3::ONE));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.5, 0.5)));
    }

    #[test]
    fn sphere_containment() {
        let outer = BoundingSphere::new(Vec3::ZERO, 10.0);
        let inner = BoundingSphere::new(Vec3::new(2.0, 0.0, 0.0), 3.0);
        let straddling = BoundingSphere::new(Vec3::new(9.0, 0.0, 0.0), 3.0);
        assert!(outer.contains_sphere(&inner));
        assert!(!outer.contains_sphere(&straddling));
        assert!(outer.intersects(&straddling));
    }

    #[test]
    fn sphere_from_points_encloses_all() {
        let points = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let sphere = BoundingSphere::from_points(&points);
        assert_relative_eq!(sphere.radius, 1.0);
        assert_relative_eq!(sphere.center.x, 0.0);
    }

    #[test]
    fn frustum_corners_of_orthographic_box() {
        let ortho = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.0, 2.0);
        let corners = Frustum::corners(ortho);
        assert_relative_eq!(corners[0].z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(corners[4].z, -2.0, epsilon = 1e-5);
        assert_relative_eq!(corners[2].x, 1.0, epsilon = 1e-5);
    }
}
