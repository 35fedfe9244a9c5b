//! Meshes and models.
//!
//! Importers hand over geometry as [`ImportedMesh`]. Uploading interleaves
//! it into [`Vertex`] records and copies vertex and index data into
//! device-local buffers.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};
use gpu_allocator::MemoryLocation;
use lumina_core::constants::{MAX_UV_SETS, MAX_VERTEX_COLOR_SETS};
use lumina_core::Aabb;
use lumina_gpu::{Buffer, BufferDesc, CommandPool, ResourceCache, SharedDevice, SingleTimeCommands};
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use crate::error::{RenderError, Result};
use crate::material::Material;

/// Interleaved vertex consumed by the PBR and shadow shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
    pub colors: [[f32; 4]; MAX_VERTEX_COLOR_SETS],
    pub uvs: [[f32; 2]; MAX_UV_SETS],
}

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// One attribute per field, color and UV sets on consecutive locations.
    pub fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location: u32, format: vk::Format, offset: usize| {
            vk::VertexInputAttributeDescription::default()
                .location(location)
                .binding(0)
                .format(format)
                .offset(offset as u32)
        };
        let mut attributes = vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, normal)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, tangent)),
            attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, bitangent)),
        ];
        let mut location = 4;
        for set in 0..MAX_VERTEX_COLOR_SETS {
            attributes.push(attribute(
                location,
                vk::Format::R32G32B32A32_SFLOAT,
                offset_of!(Self, colors) + set * size_of::<[f32; 4]>(),
            ));
            location += 1;
        }
        for set in 0..MAX_UV_SETS {
            attributes.push(attribute(
                location,
                vk::Format::R32G32_SFLOAT,
                offset_of!(Self, uvs) + set * size_of::<[f32; 2]>(),
            ));
            location += 1;
        }
        attributes
    }
}

/// Geometry handed over by a model importer.
#[derive(Debug, Clone, Default)]
pub struct ImportedMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Option<Vec<Vec3>>,
    pub bitangents: Option<Vec<Vec3>>,
    /// Vertex color sets; sets past the supported count are ignored.
    pub colors: Vec<Vec<Vec4>>,
    /// UV sets; sets past the supported count are ignored.
    pub uvs: Vec<Vec<Vec2>>,
    /// Triangle list indices.
    pub indices: Vec<u32>,
    /// Index into the owning model's material list.
    pub material_index: usize,
}

impl ImportedMesh {
    /// Check every per-vertex stream and index against the position count.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| RenderError::InvalidAsset {
            name: self.name.clone(),
            reason,
        };
        let count = self.positions.len();
        if count == 0 || self.indices.is_empty() {
            return Err(invalid("mesh has no geometry".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} indices do not form triangles",
                self.indices.len()
            )));
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(invalid(format!(
                "index {index} out of range for {count} vertices"
            )));
        }

        let streams = [
            ("normals", Some(self.normals.len())),
            ("tangents", self.tangents.as_ref().map(Vec::len)),
            ("bitangents", self.bitangents.as_ref().map(Vec::len)),
        ];
        for (stream, len) in streams {
            if let Some(len) = len.filter(|&len| len != 0 && len != count) {
                return Err(invalid(format!(
                    "{len} {stream} for {count} positions"
                )));
            }
        }
        if let Some(set) = self.colors.iter().find(|s| !s.is_empty() && s.len() != count) {
            return Err(invalid(format!("{} colors for {count} positions", set.len())));
        }
        if let Some(set) = self.uvs.iter().find(|s| !s.is_empty() && s.len() != count) {
            return Err(invalid(format!("{} uvs for {count} positions", set.len())));
        }
        Ok(())
    }

    /// Interleave the streams into vertices.
    ///
    /// Missing normals default to +Y and missing colors to white.
    pub fn vertices(&self) -> Vec<Vertex> {
        if self.colors.len() > MAX_VERTEX_COLOR_SETS {
            tracing::warn!(
                "Mesh '{}' has {} color sets, only {MAX_VERTEX_COLOR_SETS} are used",
                self.name,
                self.colors.len()
            );
        }
        if self.uvs.len() > MAX_UV_SETS {
            tracing::warn!(
                "Mesh '{}' has {} UV sets, only {MAX_UV_SETS} are used",
                self.name,
                self.uvs.len()
            );
        }

        let stream = |data: Option<&Vec<Vec3>>, i: usize, default: Vec3| {
            data.and_then(|d| d.get(i)).copied().unwrap_or(default)
        };
        self.positions
            .iter()
            .enumerate()
            .map(|(i, position)| {
                let mut colors = [[1.0; 4]; MAX_VERTEX_COLOR_SETS];
                for (slot, set) in colors.iter_mut().zip(&self.colors) {
                    if let Some(color) = set.get(i) {
                        *slot = color.to_array();
                    }
                }
                let mut uvs = [[0.0; 2]; MAX_UV_SETS];
                for (slot, set) in uvs.iter_mut().zip(&self.uvs) {
                    if let Some(uv) = set.get(i) {
                        *slot = uv.to_array();
                    }
                }
                Vertex {
                    position: position.to_array(),
                    normal: stream(Some(&self.normals), i, Vec3::Y).to_array(),
                    tangent: stream(self.tangents.as_ref(), i, Vec3::X).to_array(),
                    bitangent: stream(self.bitangents.as_ref(), i, Vec3::Z).to_array(),
                    colors,
                    uvs,
                }
            })
            .collect()
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.positions)
    }
}

/// Copy `data` into a new device-local buffer through a staging buffer.
fn upload_buffer<T: Pod>(
    device: &SharedDevice,
    pool: &CommandPool,
    name: &str,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<Buffer> {
    let staging = Buffer::with_data(device, "mesh_staging", vk::BufferUsageFlags::TRANSFER_SRC, data)?;
    let buffer = Buffer::create(
        device,
        &BufferDesc {
            name,
            size: staging.size(),
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::GpuOnly,
        },
    )?;
    let mut cmd = SingleTimeCommands::begin(pool)?;
    cmd.copy_buffer(staging.handle(), buffer.handle(), staging.size());
    cmd.finish()?;
    Ok(buffer)
}

/// A drawable sub-mesh.
pub struct Mesh {
    name: String,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    material_index: usize,
    bounds: Aabb,
}

impl Mesh {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn upload(device: &SharedDevice, pool: &CommandPool, imported: &ImportedMesh) -> Result<Self> {
        imported.validate()?;
        let vertices = imported.vertices();
        let vertex_buffer = upload_buffer(
            device,
            pool,
            &imported.name,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &vertices,
        )?;
        let index_buffer = upload_buffer(
            device,
            pool,
            &imported.name,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &imported.indices,
        )?;
        Ok(Self {
            name: imported.name.clone(),
            vertex_buffer,
            index_buffer,
            index_count: imported.indices.len() as u32,
            material_index: imported.material_index,
            bounds: imported.bounds(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn material_index(&self) -> usize {
        self.material_index
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

/// Sub-meshes loaded from one asset.
pub struct Model {
    name: String,
    meshes: Vec<Mesh>,
    bounds: Aabb,
}

impl Model {
    pub fn from_imported(
        device: &SharedDevice,
        pool: &CommandPool,
        name: &str,
        imported: &[ImportedMesh],
    ) -> Result<Self> {
        let meshes = imported
            .iter()
            .map(|mesh| Mesh::upload(device, pool, mesh))
            .collect::<Result<Vec<_>>>()?;
        let bounds = meshes
            .iter()
            .map(Mesh::bounds)
            .reduce(|a, b| a.merge(&b))
            .unwrap_or_default();
        tracing::debug!("Loaded model '{name}' with {} meshes", meshes.len());
        Ok(Self {
            name: name.to_string(),
            meshes,
            bounds,
        })
    }

    /// Load `path` through `cache`, running `import` only on a miss.
    pub fn load(
        cache: &ResourceCache<Self>,
        device: &SharedDevice,
        pool: &CommandPool,
        path: &str,
        import: impl FnOnce(&str) -> Result<Vec<ImportedMesh>>,
    ) -> Result<Arc<Self>> {
        cache.get_or_try_insert(path, || {
            let imported = import(path)?;
            Self::from_imported(device, pool, path, &imported)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }
}

/// Component drawing a model with one material per material slot.
#[derive(Clone)]
pub struct MeshRenderer {
    pub model: Arc<Model>,
    pub materials: Vec<Arc<Material>>,
    pub casts_shadows: bool,
}

impl MeshRenderer {
    pub fn new(model: Arc<Model>, materials: Vec<Arc<Material>>) -> Self {
        Self {
            model,
            materials,
            casts_shadows: true,
        }
    }

    /// Material of a sub-mesh, falling back to the first material.
    pub fn material_for(&self, mesh: &Mesh) -> Option<&Arc<Material>> {
        self.materials
            .get(mesh.material_index())
            .or_else(|| self.materials.first())
    }
}

#[cfg(test)]
pub(crate) fn triangle(name: &str) -> ImportedMesh {
    ImportedMesh {
        name: name.to_string(),
        positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        normals: vec![Vec3::Z; 3],
        indices: vec![0, 1, 2],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::headless;
    use lumina_gpu::headless::Call;
    use lumina_gpu::QueueKind;

    #[test]
    fn vertex_layout_covers_every_field() {
        assert_eq!(size_of::<Vertex>(), 96);
        let attributes = Vertex::attributes();
        assert_eq!(attributes.len(), 4 + MAX_VERTEX_COLOR_SETS + MAX_UV_SETS);
        assert_eq!(attributes.last().unwrap().offset, 88);
        assert_eq!(Vertex::binding().stride, 96);
    }

    #[test]
    fn missing_streams_get_defaults() {
        let mut mesh = triangle("tri");
        mesh.normals.clear();
        mesh.uvs = vec![vec![Vec2::ONE; 3]];
        let vertices = mesh.vertices();
        assert_eq!(vertices[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(vertices[1].colors, [[1.0; 4]; MAX_VERTEX_COLOR_SETS]);
        assert_eq!(vertices[2].uvs[0], [1.0, 1.0]);
        assert_eq!(vertices[2].uvs[1], [0.0, 0.0]);
    }

    #[test]
    fn extra_sets_are_ignored() {
        let mut mesh = triangle("tri");
        mesh.colors = vec![vec![Vec4::ZERO; 3]; MAX_VERTEX_COLOR_SETS + 1];
        assert!(mesh.validate().is_ok());
        let vertices = mesh.vertices();
        assert_eq!(vertices[0].colors, [[0.0; 4]; MAX_VERTEX_COLOR_SETS]);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let mut out_of_range = triangle("a");
        out_of_range.indices = vec![0, 1, 3];
        let mut not_triangles = triangle("b");
        not_triangles.indices = vec![0, 1];
        let mut short_normals = triangle("c");
        short_normals.normals.pop();
        let mut short_uvs = triangle("d");
        short_uvs.uvs = vec![vec![Vec2::ZERO; 2]];

        for mesh in [out_of_range, not_triangles, short_normals, short_uvs] {
            assert!(
                matches!(mesh.validate(), Err(RenderError::InvalidAsset { .. })),
                "{} should be rejected",
                mesh.name
            );
        }
    }

    #[test]
    fn upload_copies_into_device_local_buffers() {
        let (headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let mesh = Mesh::upload(&device, &pool, &triangle("tri")).unwrap();
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(mesh.bounds().max, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CopyBuffer { .. })),
            2
        );
        // Staging buffers are released
        assert_eq!(headless.live_objects("buffer"), 2);
    }

    #[test]
    fn cached_model_is_imported_once() {
        let (_headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let cache = ResourceCache::new();
        let mut imports = 0;
        let a = Model::load(&cache, &device, &pool, "models/tri.gltf", |_| {
            imports += 1;
            Ok(vec![triangle("tri"), triangle("tri2")])
        })
        .unwrap();
        let b = Model::load(&cache, &device, &pool, "models/tri.gltf", |_| {
            imports += 1;
            Ok(Vec::new())
        })
        .unwrap();
        assert_eq!(imports, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.meshes().len(), 2);
    }
}
