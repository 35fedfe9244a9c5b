//! PBR materials.
//!
//! Material parameters live in one storage buffer indexed by material id.
//! Textures are exposed in one of two ways, picked once per process by the
//! descriptor table:
//! - bindless: every texture is registered once in the global texture array
//!   and materials store array indices
//! - dynamic: each material owns a small texture array set bound before its
//!   draws, indexed by [`TextureSlot`]

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use lumina_gpu::{
    set_index, Buffer, BufferDesc, CommandBuffer, CommandPool, DescriptorTable, FrameTarget,
    SharedDevice, TextureBindingStrategy,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::mem::size_of;
use std::sync::Arc;

use crate::error::{RenderError, Result};
use crate::texture::{Texture, TextureData};

/// Materials the parameter buffer has room for.
pub const MAX_MATERIALS: u32 = 1024;

/// Texture slots of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    BaseColor = 0,
    MetallicRoughness = 1,
    Normal = 2,
    Emissive = 3,
}

impl TextureSlot {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::BaseColor,
        Self::MetallicRoughness,
        Self::Normal,
        Self::Emissive,
    ];
}

/// Material record as read by the PBR shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialParams {
    pub base_color: [f32; 4],
    /// RGB emissive color, alpha unused.
    pub emissive: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion: f32,
    pub normal_scale: f32,
    /// Bindless array index or per-material array element, by [`TextureSlot`].
    pub texture_indices: [u32; TextureSlot::COUNT],
}

/// Description of a material to create.
#[derive(Clone)]
pub struct MaterialDesc {
    pub name: String,
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion: f32,
    pub normal_scale: f32,
    /// Unset slots sample the white fallback texture.
    pub textures: [Option<Arc<Texture>>; TextureSlot::COUNT],
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 1.0,
            occlusion: 1.0,
            normal_scale: 1.0,
            textures: Default::default(),
        }
    }
}

impl MaterialDesc {
    pub fn with_texture(mut self, slot: TextureSlot, texture: Arc<Texture>) -> Self {
        self.textures[slot as usize] = Some(texture);
        self
    }
}

/// How a material's textures reach the shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialBinding {
    /// Indices into the global texture array.
    Bindless,
    /// Texture array set owned by this material.
    PerMaterialSet(vk::DescriptorSet),
}

/// Parameter slots and texture sets released by dropped materials.
#[derive(Debug, Default)]
struct Recycled {
    indices: BTreeSet<u32>,
    sets: Vec<vk::DescriptorSet>,
}

/// A created material. Its parameter slot and texture set are reused by
/// later materials once it is dropped.
pub struct Material {
    name: String,
    index: u32,
    params: MaterialParams,
    textures: [Arc<Texture>; TextureSlot::COUNT],
    binding: MaterialBinding,
    recycled: Arc<Mutex<Recycled>>,
}

impl Material {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of this material in the parameter buffer.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn params(&self) -> &MaterialParams {
        &self.params
    }

    pub fn texture(&self, slot: TextureSlot) -> &Arc<Texture> {
        &self.textures[slot as usize]
    }

    pub fn binding(&self) -> MaterialBinding {
        self.binding
    }

    /// Bind the material's texture set. A no-op under bindless textures.
    pub fn bind(
        &self,
        table: &DescriptorTable,
        cmd: &mut CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
    ) {
        if let MaterialBinding::PerMaterialSet(set) = self.binding {
            table.bind_material_set(set_index::TEXTURES, cmd, bind_point, layout, set);
        }
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        let mut recycled = self.recycled.lock();
        recycled.indices.insert(self.index);
        if let MaterialBinding::PerMaterialSet(set) = self.binding {
            recycled.sets.push(set);
        }
    }
}

/// Material parameter buffer and texture registry.
pub struct Materials {
    params: Buffer,
    /// Parameter slots handed out so far, live or recycled.
    allocated: u32,
    recycled: Arc<Mutex<Recycled>>,
    strategy: TextureBindingStrategy,
    /// Bindless array index by texture address.
    registered: HashMap<usize, u32>,
    /// Keeps registered textures alive while the array references them.
    textures: Vec<Arc<Texture>>,
    fallback: Arc<Texture>,
}

impl Materials {
    /// Create the parameter buffer, bind it to the material set of every
    /// frame and register the fallback texture.
    pub fn new(device: &SharedDevice, pool: &CommandPool, table: &DescriptorTable) -> Result<Self> {
        let size = u64::from(MAX_MATERIALS) * size_of::<MaterialParams>() as u64;
        let params = Buffer::create(
            device,
            &BufferDesc {
                name: "material_params",
                size,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                location: MemoryLocation::CpuToGpu,
            },
        )?;
        table.update_buffer(
            set_index::MATERIAL,
            0,
            params.handle(),
            0,
            size,
            FrameTarget::AllFrames,
        )?;

        let fallback = Arc::new(Texture::upload(
            device,
            pool,
            "fallback_white",
            &TextureData::solid([255; 4]),
        )?);
        let mut materials = Self {
            params,
            allocated: 0,
            recycled: Arc::default(),
            strategy: table.strategy(),
            registered: HashMap::new(),
            textures: Vec::new(),
            fallback,
        };
        if materials.strategy.is_bindless() {
            let fallback = materials.fallback.clone();
            materials.register(table, &fallback)?;
        }
        Ok(materials)
    }

    /// Bindless array index of `texture`, writing it into the array on first use.
    fn register(&mut self, table: &DescriptorTable, texture: &Arc<Texture>) -> Result<u32> {
        let key = Arc::as_ptr(texture) as usize;
        if let Some(&index) = self.registered.get(&key) {
            return Ok(index);
        }
        let index = self.textures.len() as u32;
        if let TextureBindingStrategy::Bindless { capacity } = self.strategy {
            if index >= capacity {
                return Err(RenderError::InvalidAsset {
                    name: texture.name().to_string(),
                    reason: format!("bindless texture array is full ({capacity} textures)"),
                });
            }
        }
        table.update_texture(
            set_index::TEXTURES,
            0,
            index,
            texture.view().handle(),
            texture.sampler().handle(),
            FrameTarget::AllFrames,
        )?;
        self.registered.insert(key, index);
        self.textures.push(texture.clone());
        Ok(index)
    }

    /// Lowest free parameter slot, preferring slots of dropped materials.
    fn take_index(&mut self, name: &str) -> Result<u32> {
        if let Some(index) = self.recycled.lock().indices.pop_first() {
            return Ok(index);
        }
        if self.allocated >= MAX_MATERIALS {
            return Err(RenderError::InvalidAsset {
                name: name.to_string(),
                reason: format!("material buffer is full ({MAX_MATERIALS} materials)"),
            });
        }
        self.allocated += 1;
        Ok(self.allocated - 1)
    }

    /// Texture set of a dropped material, or a new one.
    fn take_set(&self, table: &DescriptorTable) -> Result<vk::DescriptorSet> {
        if let Some(set) = self.recycled.lock().sets.pop() {
            return Ok(set);
        }
        Ok(table.allocate_material_set(set_index::TEXTURES)?)
    }

    /// Create a material and write its parameters.
    pub fn create(&mut self, table: &DescriptorTable, desc: &MaterialDesc) -> Result<Arc<Material>> {
        let index = self.take_index(&desc.name)?;
        match self.write_material(table, desc, index) {
            Ok(material) => Ok(material),
            Err(e) => {
                self.recycled.lock().indices.insert(index);
                Err(e)
            }
        }
    }

    fn write_material(
        &mut self,
        table: &DescriptorTable,
        desc: &MaterialDesc,
        index: u32,
    ) -> Result<Arc<Material>> {
        let textures: [Arc<Texture>; TextureSlot::COUNT] = TextureSlot::ALL.map(|slot| {
            desc.textures[slot as usize]
                .clone()
                .unwrap_or_else(|| self.fallback.clone())
        });

        let mut texture_indices = [0; TextureSlot::COUNT];
        let strategy = self.strategy;
        let binding = match strategy {
            TextureBindingStrategy::Bindless { .. } => {
                for (array_index, texture) in texture_indices.iter_mut().zip(&textures) {
                    *array_index = self.register(table, texture)?;
                }
                MaterialBinding::Bindless
            }
            TextureBindingStrategy::Dynamic { array_size } => {
                let set = self.take_set(table)?;
                // Every element of the array is written; elements past the
                // material's slots hold the fallback
                for element in 0..array_size {
                    let texture = textures.get(element as usize).unwrap_or(&self.fallback);
                    table.write_material_texture(
                        set,
                        0,
                        element,
                        texture.view().handle(),
                        texture.sampler().handle(),
                    );
                }
                for slot in TextureSlot::ALL {
                    texture_indices[slot as usize] = slot as u32;
                }
                MaterialBinding::PerMaterialSet(set)
            }
        };

        let params = MaterialParams {
            base_color: desc.base_color.to_array(),
            emissive: desc.emissive.extend(0.0).to_array(),
            metallic: desc.metallic,
            roughness: desc.roughness,
            occlusion: desc.occlusion,
            normal_scale: desc.normal_scale,
            texture_indices,
        };
        if let Err(e) = self.params.write_bytes(
            u64::from(index) * size_of::<MaterialParams>() as u64,
            bytemuck::bytes_of(&params),
        ) {
            if let MaterialBinding::PerMaterialSet(set) = binding {
                self.recycled.lock().sets.push(set);
            }
            return Err(e.into());
        }
        tracing::debug!("Created material '{}' at index {index}", desc.name);

        Ok(Arc::new(Material {
            name: desc.name.clone(),
            index,
            params,
            textures,
            binding,
            recycled: self.recycled.clone(),
        }))
    }

    /// Whether the next material reuses the slot of a dropped one.
    pub fn reuses_slot(&self) -> bool {
        !self.recycled.lock().indices.is_empty()
    }

    /// Number of live materials.
    pub fn len(&self) -> u32 {
        self.allocated - self.recycled.lock().indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Texture sampled by unset material slots.
    pub fn fallback(&self) -> &Arc<Texture> {
        &self.fallback
    }

    /// Number of textures in the bindless array.
    pub fn registered_textures(&self) -> usize {
        self.textures.len()
    }
}

#[cfg(test)]
pub(crate) fn material_table(device: &SharedDevice, frames: usize) -> DescriptorTable {
    use lumina_gpu::BindingCount;
    let mut table = DescriptorTable::new(device, frames);
    table
        .add_binding(
            set_index::MATERIAL,
            0,
            vk::DescriptorType::STORAGE_BUFFER,
            BindingCount::Single,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
    table
        .add_binding(
            set_index::TEXTURES,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingCount::Bindless,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .unwrap();
    table.create_descriptor_sets().unwrap();
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::headless;
    use lumina_gpu::headless::{Call, HeadlessDevice};
    use lumina_gpu::{DescriptorResource, QueueKind};

    fn texture(device: &SharedDevice, pool: &CommandPool, name: &str) -> Arc<Texture> {
        Arc::new(Texture::upload(device, pool, name, &TextureData::solid([1, 2, 3, 4])).unwrap())
    }

    fn params_at(headless: &HeadlessDevice, materials: &Materials, index: u32) -> MaterialParams {
        let bytes = headless.buffer_contents(materials.params.handle()).unwrap();
        let start = index as usize * size_of::<MaterialParams>();
        bytemuck::pod_read_unaligned(&bytes[start..start + size_of::<MaterialParams>()])
    }

    #[test]
    fn bindless_textures_are_registered_once() {
        let (headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let table = material_table(&device, 2);
        let mut materials = Materials::new(&device, &pool, &table).unwrap();
        assert_eq!(materials.registered_textures(), 1);

        let albedo = texture(&device, &pool, "albedo");
        let desc = MaterialDesc::default().with_texture(TextureSlot::BaseColor, albedo.clone());
        let first = materials.create(&table, &desc).unwrap();
        let second = materials.create(&table, &desc).unwrap();

        assert_eq!(materials.registered_textures(), 2);
        assert_eq!(first.binding(), MaterialBinding::Bindless);
        assert_eq!(second.index(), 1);
        assert_eq!(first.params().texture_indices, [1, 0, 0, 0]);
        assert_eq!(params_at(&headless, &materials, 1), *second.params());

        for frame in 0..2 {
            let set = table.set_handle(set_index::TEXTURES, frame).unwrap();
            assert_eq!(
                headless.descriptor(set, 0, 1),
                Some(DescriptorResource::Image {
                    view: albedo.view().handle(),
                    sampler: albedo.sampler().handle(),
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                })
            );
        }
    }

    #[test]
    fn dynamic_materials_own_a_texture_set() {
        let headless = Arc::new(HeadlessDevice::with_sampled_image_limit(16));
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let table = material_table(&device, 2);
        assert!(table.is_per_material(set_index::TEXTURES));

        let mut materials = Materials::new(&device, &pool, &table).unwrap();
        assert_eq!(materials.registered_textures(), 0);
        let normal = texture(&device, &pool, "normal");
        let material = materials
            .create(
                &table,
                &MaterialDesc::default().with_texture(TextureSlot::Normal, normal.clone()),
            )
            .unwrap();

        let MaterialBinding::PerMaterialSet(set) = material.binding() else {
            panic!("expected a per-material set");
        };
        assert_eq!(material.params().texture_indices, [0, 1, 2, 3]);
        assert!(matches!(
            headless.descriptor(set, 0, TextureSlot::Normal as u32),
            Some(DescriptorResource::Image { view, .. }) if view == normal.view().handle()
        ));
        assert!(matches!(
            headless.descriptor(set, 0, TextureSlot::BaseColor as u32),
            Some(DescriptorResource::Image { view, .. })
                if view == materials.fallback().view().handle()
        ));

        let command_pool = CommandPool::new(&device, QueueKind::Graphics).unwrap();
        let mut cmd = command_pool.allocate().unwrap();
        cmd.begin().unwrap();
        material.bind(
            &table,
            &mut cmd,
            vk::PipelineBindPoint::GRAPHICS,
            vk::PipelineLayout::null(),
        );
        assert_eq!(
            headless.count_calls(|c| matches!(
                c,
                Call::BindDescriptorSets { first_set, sets, .. }
                    if *first_set == set_index::TEXTURES && sets == &vec![set]
            )),
            1
        );
    }

    #[test]
    fn material_params_follow_the_description() {
        let (headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let table = material_table(&device, 1);
        let mut materials = Materials::new(&device, &pool, &table).unwrap();
        let material = materials
            .create(
                &table,
                &MaterialDesc {
                    name: "gold".to_string(),
                    base_color: Vec4::new(1.0, 0.8, 0.3, 1.0),
                    metallic: 1.0,
                    roughness: 0.25,
                    ..Default::default()
                },
            )
            .unwrap();
        let stored = params_at(&headless, &materials, material.index());
        assert_eq!(stored.base_color, [1.0, 0.8, 0.3, 1.0]);
        assert_eq!(stored.metallic, 1.0);
        assert_eq!(stored.roughness, 0.25);
        assert_eq!(stored.emissive, [0.0; 4]);
        assert_eq!(materials.len(), 1);
    }

    #[test]
    fn dynamic_texture_sets_are_fully_written() {
        let headless = Arc::new(HeadlessDevice::with_sampled_image_limit(16));
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let table = material_table(&device, 2);
        let TextureBindingStrategy::Dynamic { array_size } = table.strategy() else {
            panic!("expected dynamic texture arrays");
        };
        assert!(array_size as usize > TextureSlot::COUNT);

        let mut materials = Materials::new(&device, &pool, &table).unwrap();
        let material = materials.create(&table, &MaterialDesc::default()).unwrap();
        let MaterialBinding::PerMaterialSet(set) = material.binding() else {
            panic!("expected a per-material set");
        };
        for element in 0..array_size {
            assert!(
                matches!(
                    headless.descriptor(set, 0, element),
                    Some(DescriptorResource::Image { view, .. }) if view != vk::ImageView::null()
                ),
                "element {element} of the texture array was never written"
            );
        }
    }

    #[test]
    fn dropped_materials_return_their_slot_and_set() {
        let headless = Arc::new(HeadlessDevice::with_sampled_image_limit(16));
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let table = material_table(&device, 1);
        let mut materials = Materials::new(&device, &pool, &table).unwrap();

        let first = materials.create(&table, &MaterialDesc::default()).unwrap();
        let second = materials.create(&table, &MaterialDesc::default()).unwrap();
        assert_eq!((first.index(), second.index()), (0, 1));
        let first_set = first.binding();
        assert!(!materials.reuses_slot());
        drop(first);
        assert_eq!(materials.len(), 1);
        assert!(materials.reuses_slot());

        let third = materials.create(&table, &MaterialDesc::default()).unwrap();
        assert_eq!(third.index(), 0);
        assert_eq!(third.binding(), first_set);
        assert_eq!(materials.len(), 2);
    }

    #[test]
    fn load_unload_cycles_never_fill_the_buffer() {
        let (_headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let table = material_table(&device, 1);
        let mut materials = Materials::new(&device, &pool, &table).unwrap();
        for _ in 0..MAX_MATERIALS * 2 {
            let material = materials.create(&table, &MaterialDesc::default()).unwrap();
            assert_eq!(material.index(), 0);
        }
        assert!(materials.is_empty());
    }
}
