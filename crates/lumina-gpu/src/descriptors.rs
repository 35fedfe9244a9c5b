//! Descriptor set management.
//!
//! A [`DescriptorTable`] collects binding declarations per set index, then
//! creates one layout per set and one set instance per frame in flight.
//! Updates target a single frame or all of them, so data a frame is still
//! reading on the GPU is never overwritten by the next frame's CPU work.

use crate::command::CommandBuffer;
use crate::device::{
    DescriptorBindingDesc, DescriptorResource, DescriptorWrite, DeviceLimits, SharedDevice,
};
use crate::error::{GpuError, Result};
use ash::vk;
use lumina_core::constants::{
    BINDLESS_TEXTURE_THRESHOLD, DYNAMIC_TEXTURE_ARRAY_SIZE, MAX_BINDLESS_TEXTURES,
};
use std::collections::BTreeMap;

/// Standard descriptor set indices.
pub mod set_index {
    pub const CAMERA: u32 = 0;
    pub const MATERIAL: u32 = 1;
    pub const TEXTURES: u32 = 2;
    pub const LIGHTS: u32 = 3;
    pub const SCENE: u32 = 4;
    pub const PANORAMA: u32 = 5;
    pub const MODEL_MATRICES: u32 = 6;
}

/// Maximum per-material sets allocated under the dynamic strategy.
pub const MAX_MATERIAL_SETS: u32 = 1024;

/// How texture arrays are exposed to shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureBindingStrategy {
    /// One large partially bound array indexed by texture id.
    Bindless { capacity: u32 },
    /// Small fixed-size arrays bound per material.
    Dynamic { array_size: u32 },
}

impl TextureBindingStrategy {
    /// Pick the strategy a device supports. Chosen once per process.
    pub fn select(limits: &DeviceLimits) -> Self {
        let per_stage = limits.max_per_stage_descriptor_sampled_images;
        if limits.supports_descriptor_indexing && per_stage >= BINDLESS_TEXTURE_THRESHOLD {
            let capacity = per_stage
                .min(limits.max_update_after_bind_sampled_images)
                .min(MAX_BINDLESS_TEXTURES);
            tracing::debug!("Using bindless textures with {capacity} slots");
            Self::Bindless { capacity }
        } else {
            tracing::warn!(
                "Device exposes {per_stage} sampled images per stage (bindless needs {BINDLESS_TEXTURE_THRESHOLD}); \
                 falling back to per-material texture arrays of {DYNAMIC_TEXTURE_ARRAY_SIZE}"
            );
            Self::Dynamic {
                array_size: DYNAMIC_TEXTURE_ARRAY_SIZE,
            }
        }
    }

    pub const fn is_bindless(self) -> bool {
        matches!(self, Self::Bindless { .. })
    }
}

/// Number of descriptors behind a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingCount {
    Single,
    Array(u32),
    /// Texture array sized by the active [`TextureBindingStrategy`].
    Bindless,
}

/// Which frame instances an update writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTarget {
    Frame(usize),
    AllFrames,
}

#[derive(Debug, Clone, Copy)]
struct DeclaredBinding {
    binding: u32,
    kind: vk::DescriptorType,
    count: BindingCount,
    stages: vk::ShaderStageFlags,
}

#[derive(Default)]
struct SetGroup {
    bindings: Vec<DeclaredBinding>,
    layout: vk::DescriptorSetLayout,
    /// One set per frame in flight; empty for per-material groups.
    sets: Vec<vk::DescriptorSet>,
    per_material: bool,
    /// False for placeholder sets filling gaps between declared indices.
    declared: bool,
}

impl SetGroup {
    fn kind_of(&self, binding: u32) -> Option<vk::DescriptorType> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.kind)
    }
}

/// Descriptor layouts, pools and per-frame sets for every declared set index.
pub struct DescriptorTable {
    device: SharedDevice,
    frames_in_flight: usize,
    strategy: TextureBindingStrategy,
    groups: BTreeMap<u32, SetGroup>,
    pool: vk::DescriptorPool,
    material_pool: vk::DescriptorPool,
    created: bool,
}

impl DescriptorTable {
    /// Create an empty table, selecting the texture binding strategy from the device limits.
    pub fn new(device: &SharedDevice, frames_in_flight: usize) -> Self {
        Self {
            strategy: TextureBindingStrategy::select(device.limits()),
            device: device.clone(),
            frames_in_flight: frames_in_flight.max(1),
            groups: BTreeMap::new(),
            pool: vk::DescriptorPool::null(),
            material_pool: vk::DescriptorPool::null(),
            created: false,
        }
    }

    pub fn strategy(&self) -> TextureBindingStrategy {
        self.strategy
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Declare a binding. Must happen before [`create_descriptor_sets`](Self::create_descriptor_sets).
    pub fn add_binding(
        &mut self,
        set: u32,
        binding: u32,
        kind: vk::DescriptorType,
        count: BindingCount,
        stages: vk::ShaderStageFlags,
    ) -> Result<()> {
        if self.created {
            return Err(GpuError::InvalidState(
                "Bindings cannot be added after descriptor sets were created".to_string(),
            ));
        }
        let group = self.groups.entry(set).or_default();
        group.declared = true;
        if group.bindings.iter().any(|b| b.binding == binding) {
            return Err(GpuError::InvalidArgument(format!(
                "Binding {binding} of set {set} declared twice"
            )));
        }
        group.bindings.push(DeclaredBinding {
            binding,
            kind,
            count,
            stages,
        });
        Ok(())
    }

    /// Create layouts, pools and one set per frame for every declared set.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn create_descriptor_sets(&mut self) -> Result<()> {
        if self.created {
            return Err(GpuError::InvalidState(
                "Descriptor sets already created".to_string(),
            ));
        }

        // Pipeline layouts need contiguous set indices.
        if let Some(&last) = self.groups.keys().next_back() {
            for index in 0..last {
                self.groups.entry(index).or_default();
            }
        }

        let frames = self.frames_in_flight as u32;
        let mut frame_sizes: BTreeMap<i32, u32> = BTreeMap::new();
        let mut material_sizes: BTreeMap<i32, u32> = BTreeMap::new();
        let mut update_after_bind = false;
        let mut frame_sets = 0;

        for group in self.groups.values_mut() {
            // Bindless arrays must be the last binding of their set.
            group.bindings.sort_by_key(|b| b.binding);
            let descs: Vec<DescriptorBindingDesc> = group
                .bindings
                .iter()
                .map(|b| resolve_binding(b, self.strategy))
                .collect();
            group.per_material = !self.strategy.is_bindless()
                && group.bindings.iter().any(|b| b.count == BindingCount::Bindless);
            update_after_bind |= descs.iter().any(|d| d.bindless);

            group.layout = self.device.create_descriptor_set_layout(&descs)?;

            let sizes = if group.per_material {
                &mut material_sizes
            } else {
                frame_sets += frames;
                &mut frame_sizes
            };
            let multiplier = if group.per_material {
                MAX_MATERIAL_SETS
            } else {
                frames
            };
            for desc in &descs {
                *sizes.entry(desc.kind.as_raw()).or_default() += desc.count * multiplier;
            }
        }

        if frame_sets > 0 {
            let sizes = pool_sizes(&frame_sizes);
            self.pool = self
                .device
                .create_descriptor_pool(frame_sets, &sizes, update_after_bind)?;
        }
        if !material_sizes.is_empty() {
            let sizes = pool_sizes(&material_sizes);
            self.material_pool =
                self.device
                    .create_descriptor_pool(MAX_MATERIAL_SETS, &sizes, false)?;
        }

        for group in self.groups.values_mut() {
            if group.per_material {
                continue;
            }
            let variable_count = match self.strategy {
                TextureBindingStrategy::Bindless { capacity }
                    if group.bindings.iter().any(|b| b.count == BindingCount::Bindless) =>
                {
                    Some(capacity)
                }
                _ => None,
            };
            let layouts = vec![group.layout; self.frames_in_flight];
            group.sets =
                self.device
                    .allocate_descriptor_sets(self.pool, &layouts, variable_count)?;
        }

        self.created = true;
        tracing::debug!(
            "Created {} descriptor set groups for {} frames in flight",
            self.groups.len(),
            self.frames_in_flight
        );
        Ok(())
    }

    /// Layouts of every set in index order, for pipeline layout creation.
    pub fn set_layouts(&self) -> Vec<vk::DescriptorSetLayout> {
        self.groups.values().map(|g| g.layout).collect()
    }

    /// Set instance of `set` used by `frame`.
    pub fn set_handle(&self, set: u32, frame: usize) -> Option<vk::DescriptorSet> {
        self.groups.get(&set).and_then(|g| g.sets.get(frame).copied())
    }

    /// Whether `set` is allocated per material rather than per frame.
    pub fn is_per_material(&self, set: u32) -> bool {
        self.groups.get(&set).is_some_and(|g| g.per_material)
    }

    /// Point a buffer binding at `buffer`.
    pub fn update_buffer(
        &self,
        set: u32,
        binding: u32,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
        target: FrameTarget,
    ) -> Result<()> {
        self.write(
            set,
            binding,
            0,
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            },
            target,
        )
    }

    /// Point element `element` of an image binding at `view`.
    pub fn update_texture(
        &self,
        set: u32,
        binding: u32,
        element: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        target: FrameTarget,
    ) -> Result<()> {
        self.write(
            set,
            binding,
            element,
            DescriptorResource::Image {
                view,
                sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            target,
        )
    }

    /// Point element `element` of a sampler binding at `sampler`.
    pub fn update_sampler(
        &self,
        set: u32,
        binding: u32,
        element: u32,
        sampler: vk::Sampler,
        target: FrameTarget,
    ) -> Result<()> {
        self.write(
            set,
            binding,
            element,
            DescriptorResource::Sampler(sampler),
            target,
        )
    }

    fn declared_group(&self, set: u32) -> Result<&SetGroup> {
        self.groups
            .get(&set)
            .filter(|g| g.declared)
            .ok_or_else(|| GpuError::InvalidArgument(format!("Set {set} was never declared")))
    }

    fn write(
        &self,
        set: u32,
        binding: u32,
        element: u32,
        resource: DescriptorResource,
        target: FrameTarget,
    ) -> Result<()> {
        let group = self.declared_group(set)?;
        if group.per_material {
            return Err(GpuError::InvalidState(format!(
                "Set {set} is allocated per material"
            )));
        }
        let kind = group.kind_of(binding).ok_or_else(|| {
            GpuError::InvalidArgument(format!("Binding {binding} of set {set} was never declared"))
        })?;
        let frames: Vec<vk::DescriptorSet> = match target {
            FrameTarget::AllFrames => group.sets.clone(),
            FrameTarget::Frame(frame) => vec![*group.sets.get(frame).ok_or_else(|| {
                GpuError::InvalidArgument(format!(
                    "Frame {frame} out of range for {} frames in flight",
                    self.frames_in_flight
                ))
            })?],
        };
        let writes: Vec<DescriptorWrite> = frames
            .into_iter()
            .map(|set| DescriptorWrite {
                set,
                binding,
                array_element: element,
                kind,
                resource,
            })
            .collect();
        self.device.update_descriptor_sets(&writes);
        Ok(())
    }

    /// Bind `frame`'s instance of `set`.
    ///
    /// # Panics
    /// Panics if `set` was never declared.
    pub fn bind_descriptor_sets(
        &self,
        set: u32,
        cmd: &mut CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        frame: usize,
    ) {
        let group = self
            .groups
            .get(&set)
            .filter(|g| g.declared)
            .unwrap_or_else(|| panic!("descriptor set {set} was never declared"));
        assert!(
            !group.per_material,
            "descriptor set {set} is bound per material"
        );
        cmd.bind_descriptor_sets(bind_point, layout, set, &[group.sets[frame]]);
    }

    /// Allocate a set for one material's textures (dynamic strategy only).
    pub fn allocate_material_set(&self, set: u32) -> Result<vk::DescriptorSet> {
        let group = self.declared_group(set)?;
        if !group.per_material {
            return Err(GpuError::InvalidState(format!(
                "Set {set} is not allocated per material"
            )));
        }
        self.device
            .allocate_descriptor_sets(self.material_pool, &[group.layout], None)?
            .pop()
            .ok_or_else(|| GpuError::AllocationFailed("Material descriptor set".to_string()))
    }

    /// Write a texture into a per-material set.
    pub fn write_material_texture(
        &self,
        material_set: vk::DescriptorSet,
        binding: u32,
        element: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        self.device.update_descriptor_sets(&[DescriptorWrite {
            set: material_set,
            binding,
            array_element: element,
            kind: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            resource: DescriptorResource::Image {
                view,
                sampler,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }]);
    }

    /// Bind a per-material set at index `set`.
    pub fn bind_material_set(
        &self,
        set: u32,
        cmd: &mut CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        material_set: vk::DescriptorSet,
    ) {
        cmd.bind_descriptor_sets(bind_point, layout, set, &[material_set]);
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.pool);
        }
        if self.material_pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.material_pool);
        }
        for group in self.groups.values() {
            if group.layout != vk::DescriptorSetLayout::null() {
                self.device.destroy_descriptor_set_layout(group.layout);
            }
        }
    }
}

fn resolve_binding(b: &DeclaredBinding, strategy: TextureBindingStrategy) -> DescriptorBindingDesc {
    let (count, bindless) = match (b.count, strategy) {
        (BindingCount::Single, _) => (1, false),
        (BindingCount::Array(n), _) => (n, false),
        (BindingCount::Bindless, TextureBindingStrategy::Bindless { capacity }) => (capacity, true),
        (BindingCount::Bindless, TextureBindingStrategy::Dynamic { array_size }) => {
            (array_size, false)
        }
    };
    DescriptorBindingDesc {
        binding: b.binding,
        kind: b.kind,
        count,
        stages: b.stages,
        bindless,
    }
}

fn pool_sizes(sizes: &BTreeMap<i32, u32>) -> Vec<vk::DescriptorPoolSize> {
    sizes
        .iter()
        .map(|(&kind, &count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(kind),
            descriptor_count: count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPool;
    use crate::device::QueueKind;
    use crate::headless::{Call, HeadlessDevice};
    use ash::vk::Handle;
    use std::sync::Arc;

    fn table(headless: &Arc<HeadlessDevice>, frames: usize) -> DescriptorTable {
        let device: SharedDevice = headless.clone();
        let mut table = DescriptorTable::new(&device, frames);
        table
            .add_binding(
                set_index::CAMERA,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                BindingCount::Single,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
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

    #[test]
    fn one_set_per_frame_in_flight() {
        let headless = Arc::new(HeadlessDevice::default());
        let table = table(&headless, 3);
        let sets: Vec<_> = (0..3)
            .map(|f| table.set_handle(set_index::CAMERA, f).unwrap())
            .collect();
        assert_ne!(sets[0], sets[1]);
        assert_ne!(sets[1], sets[2]);
        assert!(table.set_handle(set_index::CAMERA, 3).is_none());
        // Gaps below the highest declared index get placeholder layouts.
        assert_eq!(table.set_layouts().len(), 3);
    }

    #[test]
    fn per_frame_update_leaves_other_frames_untouched() {
        let headless = Arc::new(HeadlessDevice::default());
        let table = table(&headless, 2);
        let first = vk::Buffer::from_raw(1000);
        let second = vk::Buffer::from_raw(2000);
        table
            .update_buffer(set_index::CAMERA, 0, first, 0, 64, FrameTarget::AllFrames)
            .unwrap();
        table
            .update_buffer(set_index::CAMERA, 0, second, 0, 64, FrameTarget::Frame(1))
            .unwrap();

        let frame0 = table.set_handle(set_index::CAMERA, 0).unwrap();
        let frame1 = table.set_handle(set_index::CAMERA, 1).unwrap();
        assert_eq!(
            headless.descriptor(frame0, 0, 0),
            Some(DescriptorResource::Buffer {
                buffer: first,
                offset: 0,
                range: 64
            })
        );
        assert_eq!(
            headless.descriptor(frame1, 0, 0),
            Some(DescriptorResource::Buffer {
                buffer: second,
                offset: 0,
                range: 64
            })
        );

        // A command buffer recorded for frame 0 binds frame 0's instance.
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::new(&device, QueueKind::Graphics).unwrap();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin().unwrap();
        table.bind_descriptor_sets(
            set_index::CAMERA,
            &mut cmd,
            vk::PipelineBindPoint::GRAPHICS,
            vk::PipelineLayout::null(),
            0,
        );
        let bound = headless.calls().into_iter().find_map(|c| match c {
            Call::BindDescriptorSets { sets, .. } => Some(sets),
            _ => None,
        });
        assert_eq!(bound, Some(vec![frame0]));
    }

    #[test]
    fn low_sampled_image_limit_selects_dynamic_arrays() {
        let headless = Arc::new(HeadlessDevice::with_sampled_image_limit(
            BINDLESS_TEXTURE_THRESHOLD - 1,
        ));
        let table = table(&headless, 2);
        assert_eq!(
            table.strategy(),
            TextureBindingStrategy::Dynamic {
                array_size: DYNAMIC_TEXTURE_ARRAY_SIZE
            }
        );
        assert!(table.is_per_material(set_index::TEXTURES));
        assert!(table.set_handle(set_index::TEXTURES, 0).is_none());
        assert!(table.allocate_material_set(set_index::TEXTURES).is_ok());
    }

    #[test]
    fn high_sampled_image_limit_selects_bindless() {
        let headless = Arc::new(HeadlessDevice::default());
        let table = table(&headless, 2);
        assert!(table.strategy().is_bindless());
        assert!(table.set_handle(set_index::TEXTURES, 1).is_some());
        assert!(table.allocate_material_set(set_index::TEXTURES).is_err());
    }

    #[test]
    fn bindings_are_frozen_after_creation() {
        let headless = Arc::new(HeadlessDevice::default());
        let mut table = table(&headless, 2);
        assert!(table
            .add_binding(
                set_index::LIGHTS,
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                BindingCount::Single,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .is_err());
    }

    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Build a table under a subscriber that records formatted events.
    fn table_with_log(headless: &Arc<HeadlessDevice>) -> (DescriptorTable, String) {
        let output = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || LogBuffer(writer.clone()))
            .finish();
        let table = tracing::subscriber::with_default(subscriber, || table(headless, 2));
        let log = String::from_utf8_lossy(&output.lock()).into_owned();
        (table, log)
    }

    #[test]
    fn dynamic_fallback_logs_a_warning() {
        let headless = Arc::new(HeadlessDevice::with_sampled_image_limit(
            BINDLESS_TEXTURE_THRESHOLD - 1,
        ));
        let (table, log) = table_with_log(&headless);
        assert!(!table.strategy().is_bindless());
        let warning = log
            .lines()
            .find(|line| line.contains("WARN"))
            .unwrap_or_else(|| panic!("no warning in log: {log:?}"));
        assert!(warning.contains("falling back"));

        let headless = Arc::new(HeadlessDevice::default());
        let (table, log) = table_with_log(&headless);
        assert!(table.strategy().is_bindless());
        assert!(!log.contains("WARN"));
    }

    #[test]
    #[should_panic(expected = "never declared")]
    fn binding_a_gap_set_panics() {
        let headless = Arc::new(HeadlessDevice::default());
        let table = table(&headless, 2);
        // Only CAMERA and TEXTURES are declared; MATERIAL lies between them
        assert_eq!(table.set_layouts().len(), 3);
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::new(&device, QueueKind::Graphics).unwrap();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin().unwrap();
        table.bind_descriptor_sets(
            set_index::MATERIAL,
            &mut cmd,
            vk::PipelineBindPoint::GRAPHICS,
            vk::PipelineLayout::null(),
            0,
        );
    }

    #[test]
    fn writing_a_gap_set_is_rejected() {
        let headless = Arc::new(HeadlessDevice::default());
        let table = table(&headless, 2);
        assert!(table
            .update_buffer(
                set_index::MATERIAL,
                0,
                vk::Buffer::null(),
                0,
                64,
                FrameTarget::AllFrames
            )
            .is_err());
    }

    #[test]
    #[should_panic(expected = "never declared")]
    fn binding_undeclared_set_panics() {
        let headless = Arc::new(HeadlessDevice::default());
        let table = table(&headless, 2);
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::new(&device, QueueKind::Graphics).unwrap();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin().unwrap();
        table.bind_descriptor_sets(
            set_index::PANORAMA,
            &mut cmd,
            vk::PipelineBindPoint::GRAPHICS,
            vk::PipelineLayout::null(),
            0,
        );
    }
}
