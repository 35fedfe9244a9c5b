//! Procedural meshes for the demo scene.

use glam::{Vec2, Vec3};
use lumina_render::ImportedMesh;

/// Axis-aligned cube centred on the origin, four vertices per face.
pub fn cube(name: &str, half_extent: f32) -> ImportedMesh {
    // (normal, tangent) per face; bitangent = normal x tangent
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut mesh = ImportedMesh {
        name: name.to_string(),
        ..Default::default()
    };
    let mut tangents = Vec::with_capacity(24);
    let mut bitangents = Vec::with_capacity(24);
    let mut uvs = Vec::with_capacity(24);
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = mesh.positions.len() as u32;
        for (u, v) in corners {
            mesh.positions
                .push((normal + tangent * u + bitangent * v) * half_extent);
            mesh.normals.push(normal);
            tangents.push(tangent);
            bitangents.push(bitangent);
            uvs.push(Vec2::new((u + 1.0) * 0.5, 1.0 - (v + 1.0) * 0.5));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh.tangents = Some(tangents);
    mesh.bitangents = Some(bitangents);
    mesh.uvs = vec![uvs];
    mesh
}

/// Square in the XZ plane facing +Y.
pub fn plane(name: &str, half_extent: f32) -> ImportedMesh {
    let corners = [(-1.0, 1.0), (1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)];
    ImportedMesh {
        name: name.to_string(),
        positions: corners
            .iter()
            .map(|&(x, z)| Vec3::new(x, 0.0, z) * half_extent)
            .collect(),
        normals: vec![Vec3::Y; 4],
        tangents: Some(vec![Vec3::X; 4]),
        bitangents: Some(vec![Vec3::NEG_Z; 4]),
        uvs: vec![corners
            .iter()
            .map(|&(x, z)| Vec2::new(x + 1.0, 1.0 - z) * half_extent * 0.5)
            .collect()],
        indices: vec![0, 1, 2, 0, 2, 3],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_normal(mesh: &ImportedMesh, triangle: usize) -> Vec3 {
        let [a, b, c] = [0, 1, 2].map(|i| mesh.positions[mesh.indices[triangle * 3 + i] as usize]);
        (b - a).cross(c - a).normalize()
    }

    #[test]
    fn cube_is_valid_with_outward_counter_clockwise_faces() {
        let mesh = cube("cube", 0.5);
        mesh.validate().unwrap();
        assert_eq!(mesh.positions.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        for triangle in 0..12 {
            let vertex = mesh.indices[triangle * 3] as usize;
            assert!(triangle_normal(&mesh, triangle).abs_diff_eq(mesh.normals[vertex], 1e-5));
        }
        let bounds = mesh.bounds();
        assert!(bounds.max.abs_diff_eq(Vec3::splat(0.5), 1e-6));
    }

    #[test]
    fn plane_faces_up() {
        let mesh = plane("ground", 10.0);
        mesh.validate().unwrap();
        assert!(triangle_normal(&mesh, 0).abs_diff_eq(Vec3::Y, 1e-5));
        assert!(triangle_normal(&mesh, 1).abs_diff_eq(Vec3::Y, 1e-5));
    }
}
