//! Frame orchestration.
//!
//! [`Renderer::render_frame`] drives one frame:
//! 1. apply pending settings changes
//! 2. wait for the frame slot's in-flight fence
//! 3. acquire a swapchain image, recreating everything swapchain-sized when
//!    it is out of date or a resize was requested
//! 4. upload per-frame data and re-record the shadow, scene, compute and
//!    GUI command buffers
//! 5. submit them as a semaphore chain whose last link signals the fence
//! 6. present and advance to the next frame slot

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use lumina_core::constants::{DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT, SHADOW_CASCADE_COUNT};
use lumina_entity::{Scene, Transform};
use lumina_gpu::{
    set_index, AcquireOutcome, BindingCount, Buffer, BufferDesc, CommandBuffer, CommandPool,
    DescriptorTable, FrameSyncManager, FrameTarget, GpuError, ImageBarrier, ImageView, QueueKind,
    ResourceCache, Sampler, SemaphoreWait, SharedDevice, SubmissionChain, SwapchainDesc,
};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::camera::{Camera, CameraUniforms};
use crate::draw::{DrawCommands, DrawConstants, DrawContext};
use crate::error::{RenderError, Result};
use crate::gui::{GuiFrame, GuiHook};
use crate::light::{GpuLight, Light, LightBufferHeader, LightSlots, LightType, TOTAL_LIGHT_CAPACITY};
use crate::material::{Material, MaterialDesc, Materials};
use crate::mesh::{ImportedMesh, MeshRenderer, Model, Vertex};
use crate::render_pass::{PassConfig, RenderPass, RenderPasses, RenderingPipelineType};
use crate::screenshot::save_screenshot;
use crate::settings::{GraphicsSettings, Settings, SettingsChanges};
use crate::shader::{PipelineTarget, ShaderPipeline, ShaderProgram, ShaderSource};
use crate::shadow::{create_placeholder_shadow, create_shadow_sampler};
use crate::swapchain::Swapchain;
use crate::targets::RenderTargets;
use crate::texture::{texel_size, Texture};

/// Model matrices the per-frame buffer has room for.
pub const MAX_MODEL_INSTANCES: usize = 4096;

const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Stages of the scene submission that wait for the acquired swapchain image.
const ACQUIRE_WAIT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::TRANSFER.as_raw(),
);

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub frames_in_flight: usize,
    pub settings: GraphicsSettings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            settings: GraphicsSettings::default(),
        }
    }
}

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { frame_index: usize, image_index: u32 },
    /// The swapchain was recreated instead of rendering.
    Recreated,
    /// Nothing to render into, e.g. a minimized window.
    Skipped,
}

/// Work recorded into the frame's compute submission.
pub trait ComputePass: Send {
    fn name(&self) -> &str;

    fn record(&mut self, cmd: &mut CommandBuffer, frame_index: usize) -> Result<()>;
}

/// Caches of loaded resources, one per resource kind.
#[derive(Default)]
pub struct ResourceCaches {
    pub shaders: ResourceCache<ShaderProgram>,
    pub textures: ResourceCache<Texture>,
    pub models: ResourceCache<Model>,
}

/// Per-frame values shared by every scene shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub resolution: [f32; 2],
    pub debug_mode: u32,
    pub frame_number: u32,
    /// Live lights per type, indexed like [`LightType::ALL`].
    pub light_counts: [u32; 4],
}

/// Resources owned by one frame slot.
struct FrameResources {
    shadow_cmd: CommandBuffer,
    scene_cmd: CommandBuffer,
    compute_cmd: CommandBuffer,
    gui_cmd: CommandBuffer,
    camera: Buffer,
    scene: Buffer,
    lights: Buffer,
    models: Buffer,
}

impl FrameResources {
    fn new(
        device: &SharedDevice,
        graphics: &CommandPool,
        compute: &CommandPool,
        table: &DescriptorTable,
        frame: usize,
    ) -> Result<Self> {
        let buffer = |name: &str, size: usize, usage: vk::BufferUsageFlags| {
            Buffer::create(
                device,
                &BufferDesc {
                    name,
                    size: size as u64,
                    usage,
                    location: MemoryLocation::CpuToGpu,
                },
            )
        };
        let resources = Self {
            shadow_cmd: graphics.allocate()?,
            scene_cmd: graphics.allocate()?,
            compute_cmd: compute.allocate()?,
            gui_cmd: graphics.allocate()?,
            camera: buffer(
                "camera_uniforms",
                size_of::<CameraUniforms>(),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?,
            scene: buffer(
                "scene_uniforms",
                size_of::<SceneUniforms>(),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?,
            lights: buffer(
                "lights",
                size_of::<LightBufferHeader>() + TOTAL_LIGHT_CAPACITY * size_of::<GpuLight>(),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )?,
            models: buffer(
                "model_matrices",
                MAX_MODEL_INSTANCES * size_of::<Mat4>(),
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )?,
        };

        let target = FrameTarget::Frame(frame);
        for (set, buffer) in [
            (set_index::CAMERA, &resources.camera),
            (set_index::SCENE, &resources.scene),
            (set_index::LIGHTS, &resources.lights),
            (set_index::MODEL_MATRICES, &resources.models),
        ] {
            table.update_buffer(set, 0, buffer.handle(), 0, buffer.size(), target)?;
        }
        Ok(resources)
    }
}

struct Pipelines {
    skybox: ShaderPipeline,
    pbr: ShaderPipeline,
    shadow: ShaderPipeline,
}

impl Pipelines {
    fn new(
        device: &SharedDevice,
        caches: &ResourceCaches,
        source: &dyn ShaderSource,
        table: &DescriptorTable,
    ) -> Result<Self> {
        let pipeline = |path: &str| -> Result<ShaderPipeline> {
            let mut pipeline = ShaderPipeline::new(device);
            pipeline.load_shader_from_file(&caches.shaders, source, path)?;
            pipeline.set_layout(
                table.set_layouts(),
                vec![vk::PushConstantRange::default()
                    .stage_flags(PUSH_CONSTANT_STAGES)
                    .offset(0)
                    .size(size_of::<DrawConstants>() as u32)],
            );
            Ok(pipeline)
        };

        let mut skybox = pipeline("skybox")?;
        skybox.set_depth_write(false);
        skybox.set_cull_mode(vk::CullModeFlags::NONE);

        let mut pbr = pipeline("pbr")?;
        pbr.set_vertex_input(vec![Vertex::binding()], Vertex::attributes());

        let mut shadow = pipeline("shadow")?;
        shadow.set_vertex_input(vec![Vertex::binding()], Vertex::attributes());
        shadow.set_custom_sample_count(Some(vk::SampleCountFlags::TYPE_1));
        shadow.set_depth_bias(Some((1.25, 1.75)));

        Ok(Self {
            skybox,
            pbr,
            shadow,
        })
    }

    /// Point every pipeline at its current pass and the global sample count.
    fn retarget(&mut self, passes: &RenderPasses, samples: vk::SampleCountFlags) {
        let target = |pass: &RenderPass| PipelineTarget {
            render_pass: pass.handle(),
            subpass: 0,
            color_attachment_count: pass.color_attachment_count(),
        };
        self.skybox.set_target(target(&passes.skybox));
        self.pbr.set_target(target(&passes.pbr));
        self.shadow.set_target(target(&passes.shadow));
        for pipeline in [&mut self.skybox, &mut self.pbr, &mut self.shadow] {
            pipeline.set_multisampling_count(samples);
        }
    }

    fn hot_reload(&mut self, caches: &ResourceCaches, source: &dyn ShaderSource) -> usize {
        [&mut self.skybox, &mut self.pbr, &mut self.shadow]
            .into_iter()
            .map(|pipeline| pipeline.hot_reload(&caches.shaders, source))
            .filter(|&reloaded| reloaded)
            .count()
    }
}

/// A model instance collected for this frame.
struct DrawItem {
    renderer: MeshRenderer,
    model_index: u32,
}

/// Shadow map layers of one light to render this frame.
struct ShadowJob {
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    light_index: u32,
}

struct PendingScreenshot {
    path: PathBuf,
    buffer: Buffer,
    format: vk::Format,
    extent: vk::Extent2D,
}

fn missing(what: &str) -> RenderError {
    GpuError::InvalidState(format!("No {what} for the current frame")).into()
}

/// Bind per-frame sets, skipping sets bound per material.
fn bind_frame_sets(
    table: &DescriptorTable,
    cmd: &mut CommandBuffer,
    layout: vk::PipelineLayout,
    frame: usize,
    sets: &[u32],
) {
    for &set in sets {
        if !table.is_per_material(set) {
            table.bind_descriptor_sets(set, cmd, vk::PipelineBindPoint::GRAPHICS, layout, frame);
        }
    }
}

fn declare_bindings(table: &mut DescriptorTable) -> Result<()> {
    let all = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    let fragment = vk::ShaderStageFlags::FRAGMENT;
    let bindings = [
        (set_index::CAMERA, 0, vk::DescriptorType::UNIFORM_BUFFER, BindingCount::Single, all),
        (set_index::MATERIAL, 0, vk::DescriptorType::STORAGE_BUFFER, BindingCount::Single, fragment),
        (
            set_index::TEXTURES,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingCount::Bindless,
            fragment,
        ),
        (set_index::LIGHTS, 0, vk::DescriptorType::STORAGE_BUFFER, BindingCount::Single, all),
        (
            set_index::LIGHTS,
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingCount::Array(TOTAL_LIGHT_CAPACITY as u32),
            fragment,
        ),
        (set_index::SCENE, 0, vk::DescriptorType::UNIFORM_BUFFER, BindingCount::Single, all),
        (
            set_index::PANORAMA,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingCount::Single,
            fragment,
        ),
        (
            set_index::MODEL_MATRICES,
            0,
            vk::DescriptorType::STORAGE_BUFFER,
            BindingCount::Single,
            vk::ShaderStageFlags::VERTEX,
        ),
    ];
    for (set, binding, kind, count, stages) in bindings {
        table.add_binding(set, binding, kind, count, stages)?;
    }
    table.create_descriptor_sets()?;
    Ok(())
}

/// Records and submits frames for one swapchain.
pub struct Renderer {
    // Fields drop in declaration order: users of a resource come first.
    gui: Option<Box<dyn GuiHook>>,
    compute_passes: Vec<Box<dyn ComputePass>>,
    pipelines: Pipelines,
    materials: Materials,
    panorama: Arc<Texture>,
    frames: Vec<FrameResources>,
    shadow_placeholder: ImageView,
    shadow_sampler: Sampler,
    targets: RenderTargets,
    passes: RenderPasses,
    swapchain: Swapchain,
    descriptors: DescriptorTable,
    sync: FrameSyncManager,
    graphics_pool: CommandPool,
    compute_pool: CommandPool,
    upload_pool: CommandPool,
    caches: ResourceCaches,
    shader_source: Box<dyn ShaderSource>,
    light_slots: LightSlots,
    settings: Settings,
    requested_extent: vk::Extent2D,
    resize_requested: bool,
    screenshot_request: Option<PathBuf>,
    frame_number: u64,
    device: SharedDevice,
}

impl Renderer {
    pub fn new(
        device: SharedDevice,
        config: RendererConfig,
        shader_source: Box<dyn ShaderSource>,
    ) -> Result<Self> {
        let frames_in_flight = config.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        let settings = Settings::new(config.settings);
        let requested_extent = vk::Extent2D {
            width: config.width,
            height: config.height,
        };

        let swapchain = Swapchain::new(
            &device,
            &SwapchainDesc {
                width: config.width,
                height: config.height,
                vsync: settings.get().vsync,
                hdr: settings.get().hdr,
                old: vk::SwapchainKHR::null(),
            },
        )?;
        let samples = device.limits().clamp_samples(settings.get().msaa.sample_count());
        let passes = RenderPasses::new(
            &device,
            &PassConfig {
                color_format: swapchain.format(),
                samples,
            },
        )?;
        let targets = RenderTargets::new(&device, &swapchain, &passes, samples)?;
        let sync = FrameSyncManager::new(&device, frames_in_flight)?;

        let graphics_pool = CommandPool::new(&device, QueueKind::Graphics)?;
        let compute_pool = CommandPool::new(&device, QueueKind::Compute)?;
        let upload_pool = CommandPool::transient(&device, QueueKind::Graphics)?;

        let mut descriptors = DescriptorTable::new(&device, frames_in_flight);
        declare_bindings(&mut descriptors)?;

        let frames = (0..frames_in_flight)
            .map(|frame| {
                FrameResources::new(&device, &graphics_pool, &compute_pool, &descriptors, frame)
            })
            .collect::<Result<Vec<_>>>()?;
        let shadow_sampler = create_shadow_sampler(&device)?;
        let shadow_placeholder = create_placeholder_shadow(&device, &upload_pool)?;

        let materials = Materials::new(&device, &upload_pool, &descriptors)?;
        let panorama = materials.fallback().clone();
        descriptors.update_texture(
            set_index::PANORAMA,
            0,
            0,
            panorama.view().handle(),
            panorama.sampler().handle(),
            FrameTarget::AllFrames,
        )?;

        let caches = ResourceCaches::default();
        let mut pipelines = Pipelines::new(&device, &caches, shader_source.as_ref(), &descriptors)?;
        pipelines.retarget(&passes, samples);

        tracing::info!(
            "Renderer ready on {} ({frames_in_flight} frames in flight, {:?} textures)",
            device.adapter_name(),
            descriptors.strategy()
        );

        Ok(Self {
            gui: None,
            compute_passes: Vec::new(),
            pipelines,
            materials,
            panorama,
            frames,
            shadow_placeholder,
            shadow_sampler,
            targets,
            passes,
            swapchain,
            descriptors,
            sync,
            graphics_pool,
            compute_pool,
            upload_pool,
            caches,
            shader_source,
            light_slots: LightSlots::new(),
            settings,
            requested_extent,
            resize_requested: false,
            screenshot_request: None,
            frame_number: 0,
            device,
        })
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub fn caches(&self) -> &ResourceCaches {
        &self.caches
    }

    /// Allocator handle lights are created with.
    pub fn light_slots(&self) -> &LightSlots {
        &self.light_slots
    }

    pub fn settings(&self) -> &GraphicsSettings {
        self.settings.get()
    }

    /// Settings changes are applied at the start of the next frame.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Sample count of the scene attachments.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.targets.samples()
    }

    pub fn render_targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn render_passes(&self) -> &RenderPasses {
        &self.passes
    }

    /// Index of the frame slot the next frame uses.
    pub fn current_frame(&self) -> usize {
        self.sync.current_frame()
    }

    /// Frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Flag the swapchain for recreation at the given size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.requested_extent = vk::Extent2D { width, height };
        self.resize_requested = true;
    }

    /// Save the next presented frame to `path`.
    pub fn request_screenshot(&mut self, path: impl Into<PathBuf>) {
        self.screenshot_request = Some(path.into());
    }

    pub fn set_gui(&mut self, mut gui: Box<dyn GuiHook>) -> Result<()> {
        gui.recreate(
            self.passes.gui.handle(),
            self.swapchain.image_count(),
            self.targets.samples(),
        )?;
        self.gui = Some(gui);
        Ok(())
    }

    pub fn add_compute_pass(&mut self, pass: Box<dyn ComputePass>) {
        tracing::debug!("Added compute pass '{}'", pass.name());
        self.compute_passes.push(pass);
    }

    /// Load a texture file through the texture cache.
    pub fn load_texture(&self, path: &Path) -> Result<Arc<Texture>> {
        Texture::load(&self.caches.textures, &self.device, &self.upload_pool, path)
    }

    /// Load a model through the model cache, importing it on a miss.
    pub fn load_model(
        &self,
        path: &str,
        import: impl FnOnce(&str) -> Result<Vec<ImportedMesh>>,
    ) -> Result<Arc<Model>> {
        Model::load(&self.caches.models, &self.device, &self.upload_pool, path, import)
    }

    pub fn create_material(&mut self, desc: &MaterialDesc) -> Result<Arc<Material>> {
        // Frames in flight may still read a dropped material's slot and set
        if self.materials.reuses_slot() {
            self.device.wait_idle()?;
        }
        self.materials.create(&self.descriptors, desc)
    }

    /// Sample `texture` as the skybox panorama.
    pub fn set_panorama(&mut self, texture: Arc<Texture>) -> Result<()> {
        self.device.wait_idle()?;
        self.descriptors.update_texture(
            set_index::PANORAMA,
            0,
            0,
            texture.view().handle(),
            texture.sampler().handle(),
            FrameTarget::AllFrames,
        )?;
        self.panorama = texture;
        Ok(())
    }

    /// Reload every pipeline's shader. Returns how many reloaded.
    pub fn reload_shaders(&mut self) -> Result<usize> {
        self.device.wait_idle()?;
        Ok(self
            .pipelines
            .hot_reload(&self.caches, self.shader_source.as_ref()))
    }

    /// Render and present one frame of `scene` seen from `camera`.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn render_frame(&mut self, scene: &mut Scene, camera: &Camera) -> Result<FrameOutcome> {
        self.apply_settings(scene)?;

        if self.requested_extent.width == 0 || self.requested_extent.height == 0 {
            return Ok(FrameOutcome::Skipped);
        }

        let frame = self.sync.current_frame();
        self.sync.current().wait()?;

        if self.resize_requested {
            self.recreate(scene)?;
            return Ok(FrameOutcome::Recreated);
        }

        let (image_index, suboptimal) = match self
            .device
            .acquire_next_image(self.swapchain.handle(), self.sync.current().image_available.handle())?
        {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                self.recreate(scene)?;
                return Ok(FrameOutcome::Recreated);
            }
        };
        let (draws, shadow_jobs) = self.update_frame_data(scene, camera, frame)?;
        self.record_shadows(frame, &shadow_jobs, &draws)?;
        self.record_scene(frame, image_index, &draws)?;
        let compute = self.record_compute(frame)?;
        let screenshot = self.record_gui(frame, image_index)?;

        // Reset only once nothing can fail before the fence is submitted
        self.sync.current().reset()?;
        self.submit(frame, compute)?;

        let outcome = self.device.present(
            self.swapchain.handle(),
            image_index,
            &[self.sync.current().render_finished.handle()],
        )?;

        if let Some(screenshot) = screenshot {
            self.sync.current().wait()?;
            if let Err(e) = Self::save_pending(&screenshot) {
                tracing::error!("Failed to save screenshot {}: {e}", screenshot.path.display());
            }
        }

        self.sync.advance();
        self.frame_number += 1;

        if suboptimal || outcome.needs_recreate() {
            tracing::debug!("Swapchain needs recreation after present ({outcome:?})");
            self.recreate(scene)?;
        }
        Ok(FrameOutcome::Presented {
            frame_index: frame,
            image_index,
        })
    }

    /// Apply settings changes published since the last frame.
    fn apply_settings(&mut self, scene: &mut Scene) -> Result<()> {
        let changes = self.settings.take_changes();
        if changes.is_empty() {
            return Ok(());
        }
        tracing::info!("Applying graphics settings changes: {changes:?}");
        let rebuild = SettingsChanges::SWAPCHAIN
            | SettingsChanges::RENDER_TARGETS
            | SettingsChanges::PIPELINES;
        if changes.intersects(rebuild) {
            self.recreate(scene)?;
        }
        Ok(())
    }

    /// Recreate the swapchain and everything sized or sampled like it.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn recreate(&mut self, scene: &mut Scene) -> Result<()> {
        let extent = self.requested_extent;
        if extent.width == 0 || extent.height == 0 {
            // Retried once the surface has a size again
            self.resize_requested = true;
            return Ok(());
        }
        self.device.wait_idle()?;
        self.targets.clear();

        let settings = self.settings.get();
        let swapchain = Swapchain::new(
            &self.device,
            &SwapchainDesc {
                width: extent.width,
                height: extent.height,
                vsync: settings.vsync,
                hdr: settings.hdr,
                old: self.swapchain.handle(),
            },
        )?;
        self.swapchain = swapchain;

        let samples = self
            .device
            .limits()
            .clamp_samples(settings.msaa.sample_count());
        self.passes = RenderPasses::new(
            &self.device,
            &PassConfig {
                color_format: self.swapchain.format(),
                samples,
            },
        )?;
        self.targets = RenderTargets::new(&self.device, &self.swapchain, &self.passes, samples)?;
        Self::reinit_shadow_maps(scene, &self.passes.shadow)?;
        self.pipelines.retarget(&self.passes, samples);

        if let Some(gui) = self.gui.as_mut() {
            gui.recreate(
                self.passes.gui.handle(),
                self.swapchain.image_count(),
                samples,
            )?;
        }
        self.resize_requested = false;
        tracing::info!(
            "Recreated swapchain at {}x{} with {samples:?}",
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Recreate the shadow pass alone, re-initializing every light's shadow map.
    pub fn rebuild_shadow_pass(&mut self, scene: &mut Scene) -> Result<()> {
        self.device.wait_idle()?;
        self.passes.shadow = RenderPass::new(
            &self.device,
            RenderingPipelineType::CascadedShadowMapping,
            &PassConfig {
                color_format: self.swapchain.format(),
                samples: vk::SampleCountFlags::TYPE_1,
            },
        )?;
        Self::reinit_shadow_maps(scene, &self.passes.shadow)?;
        self.pipelines.retarget(&self.passes, self.targets.samples());
        Ok(())
    }

    fn reinit_shadow_maps(scene: &mut Scene, shadow_pass: &RenderPass) -> Result<()> {
        for (_, light) in scene.world_mut().query_mut::<&mut Light>() {
            if let Some(map) = light.shadow_map_mut() {
                map.reinit(shadow_pass)?;
            }
        }
        Ok(())
    }

    /// Upload camera, scene, light and model data for `frame` and rewrite
    /// the frame's shadow map descriptors.
    fn update_frame_data(
        &mut self,
        scene: &mut Scene,
        camera: &Camera,
        frame: usize,
    ) -> Result<(Vec<DrawItem>, Vec<ShadowJob>)> {
        let extent = self.swapchain.extent();
        let mut camera = camera.clone();
        camera.set_aspect(extent.width as f32 / extent.height as f32);
        let cascades = camera.cascades(SHADOW_CASCADE_COUNT);

        let mut matrices: Vec<Mat4> = Vec::new();
        let mut draws = Vec::new();
        for (_, (transform, renderer)) in scene
            .world_mut()
            .query_mut::<(&mut Transform, &MeshRenderer)>()
        {
            if matrices.len() == MAX_MODEL_INSTANCES {
                tracing::warn!("More than {MAX_MODEL_INSTANCES} models in the scene, skipping the rest");
                break;
            }
            draws.push(DrawItem {
                renderer: renderer.clone(),
                model_index: matrices.len() as u32,
            });
            matrices.push(transform.model_matrix());
        }

        let mut header = LightBufferHeader::default();
        let mut lights = vec![GpuLight::zeroed(); TOTAL_LIGHT_CAPACITY];
        let mut shadow_views = vec![self.shadow_placeholder.handle(); TOTAL_LIGHT_CAPACITY];
        let mut shadow_jobs = Vec::new();
        for (_, (light, transform)) in scene
            .world_mut()
            .query_mut::<(&mut Light, &mut Transform)>()
        {
            light.ensure_shadow_map(&self.device, &self.passes.shadow)?;
            let index = light.slot().array_index();
            let kind = LightType::ALL
                .iter()
                .position(|&k| k == light.kind())
                .unwrap_or_default();
            header.counts[kind] += 1;
            lights[index] = light.gpu_data(transform.position(), transform.forward(), &cascades);

            if let Some(map) = light.shadow_map() {
                shadow_views[index] = map.sampled_view().handle();
                shadow_jobs.push(ShadowJob {
                    framebuffers: (0..map.layer_count())
                        .filter_map(|layer| map.framebuffer(layer).map(|fb| fb.handle()))
                        .collect(),
                    extent: map.extent(),
                    light_index: index as u32,
                });
            }
        }

        let resources = &self.frames[frame];
        resources.camera.write(&[camera.uniforms()])?;
        resources.scene.write(&[SceneUniforms {
            resolution: [extent.width as f32, extent.height as f32],
            debug_mode: self.settings.get().debug_mode.as_u32(),
            frame_number: self.frame_number as u32,
            light_counts: [header.counts[0], header.counts[1], header.counts[2], 0],
        }])?;
        if !matrices.is_empty() {
            resources.models.write(&matrices)?;
        }
        let mut light_bytes = bytemuck::bytes_of(&header).to_vec();
        light_bytes.extend_from_slice(bytemuck::cast_slice(&lights));
        resources.lights.write_bytes(0, &light_bytes)?;

        // This frame's fence has signaled, so its sets are no longer in use
        for (element, view) in shadow_views.into_iter().enumerate() {
            self.descriptors.update_texture(
                set_index::LIGHTS,
                1,
                element as u32,
                view,
                self.shadow_sampler.handle(),
                FrameTarget::Frame(frame),
            )?;
        }
        Ok((draws, shadow_jobs))
    }

    fn record_shadows(&mut self, frame: usize, jobs: &[ShadowJob], draws: &[DrawItem]) -> Result<()> {
        let cmd = &mut self.frames[frame].shadow_cmd;
        let pipeline = &mut self.pipelines.shadow;
        let pass = &self.passes.shadow;
        let table = &self.descriptors;

        cmd.reset()?;
        cmd.begin_one_time()?;
        if !jobs.is_empty() {
            pipeline.bind(cmd)?;
            let layout = pipeline.layout();
            bind_frame_sets(
                table,
                cmd,
                layout,
                frame,
                &[set_index::LIGHTS, set_index::MODEL_MATRICES],
            );
            let ctx = DrawContext {
                table,
                layout,
                stages: PUSH_CONSTANT_STAGES,
                bind_materials: false,
            };
            let clears = pass.clear_values();
            for job in jobs {
                for (layer, &framebuffer) in job.framebuffers.iter().enumerate() {
                    cmd.begin_render_pass(pass.handle(), framebuffer, job.extent, &clears);
                    cmd.set_viewport_and_scissor(job.extent);
                    for item in draws.iter().filter(|d| d.renderer.casts_shadows) {
                        cmd.draw_model(
                            &ctx,
                            &item.renderer,
                            item.model_index,
                            layer as u32,
                            job.light_index,
                        );
                    }
                    cmd.end_render_pass();
                }
            }
        }
        cmd.end()?;
        Ok(())
    }

    fn record_scene(&mut self, frame: usize, image_index: u32, draws: &[DrawItem]) -> Result<()> {
        let cmd = &mut self.frames[frame].scene_cmd;
        let table = &self.descriptors;
        let targets = &self.targets;
        let passes = &self.passes;
        let extent = targets.extent();

        cmd.reset()?;
        cmd.begin_one_time()?;

        let skybox_fb = targets
            .framebuffer(RenderingPipelineType::Skybox, image_index)
            .ok_or_else(|| missing("skybox framebuffer"))?;
        cmd.begin_render_pass(
            passes.skybox.handle(),
            skybox_fb.handle(),
            extent,
            &passes.skybox.clear_values(),
        );
        cmd.set_viewport_and_scissor(extent);
        self.pipelines.skybox.bind(cmd)?;
        bind_frame_sets(
            table,
            cmd,
            self.pipelines.skybox.layout(),
            frame,
            &[set_index::CAMERA, set_index::SCENE, set_index::PANORAMA],
        );
        cmd.draw_skybox();
        cmd.end_render_pass();

        let pbr_fb = targets
            .framebuffer(RenderingPipelineType::PbrModel, image_index)
            .ok_or_else(|| missing("PBR framebuffer"))?;
        cmd.begin_render_pass(
            passes.pbr.handle(),
            pbr_fb.handle(),
            extent,
            &passes.pbr.clear_values(),
        );
        cmd.set_viewport_and_scissor(extent);
        self.pipelines.pbr.bind(cmd)?;
        let layout = self.pipelines.pbr.layout();
        bind_frame_sets(
            table,
            cmd,
            layout,
            frame,
            &[
                set_index::CAMERA,
                set_index::MATERIAL,
                set_index::TEXTURES,
                set_index::LIGHTS,
                set_index::SCENE,
                set_index::MODEL_MATRICES,
            ],
        );
        let ctx = DrawContext {
            table,
            layout,
            stages: PUSH_CONSTANT_STAGES,
            bind_materials: true,
        };
        for item in draws {
            cmd.draw_model(&ctx, &item.renderer, item.model_index, 0, 0);
        }
        cmd.end_render_pass();

        if targets.samples() == vk::SampleCountFlags::TYPE_1 {
            // The GUI pass loads the swapchain image from TRANSFER_DST
            let src = targets.final_image().ok_or_else(|| missing("final color"))?;
            let dst = self
                .swapchain
                .image(image_index)
                .ok_or_else(|| missing("swapchain image"))?;
            // Must start in a stage the acquire semaphore wait covers
            cmd.image_barrier(&ImageBarrier {
                image: dst.handle(),
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                range: dst.full_range(),
            });
            cmd.copy_image(src.handle(), dst.handle(), src.format(), extent);
        }
        cmd.end()?;
        Ok(())
    }

    /// Record compute passes. Returns whether there is compute work.
    fn record_compute(&mut self, frame: usize) -> Result<bool> {
        if self.compute_passes.is_empty() {
            return Ok(false);
        }
        let cmd = &mut self.frames[frame].compute_cmd;
        cmd.reset()?;
        cmd.begin_one_time()?;
        for pass in &mut self.compute_passes {
            pass.record(cmd, frame)?;
        }
        cmd.end()?;
        Ok(true)
    }

    fn record_gui(&mut self, frame: usize, image_index: u32) -> Result<Option<PendingScreenshot>> {
        let cmd = &mut self.frames[frame].gui_cmd;
        let extent = self.targets.extent();
        let framebuffer = self
            .targets
            .framebuffer(RenderingPipelineType::Gui, image_index)
            .ok_or_else(|| missing("GUI framebuffer"))?;

        cmd.reset()?;
        cmd.begin_one_time()?;
        cmd.begin_render_pass(
            self.passes.gui.handle(),
            framebuffer.handle(),
            extent,
            &self.passes.gui.clear_values(),
        );
        cmd.set_viewport_and_scissor(extent);
        if let Some(gui) = self.gui.as_mut() {
            gui.draw(&mut GuiFrame {
                cmd,
                extent,
                frame_index: frame,
                image_index,
            })?;
        }
        cmd.end_render_pass();

        let screenshot = match self.screenshot_request.take() {
            Some(path) => {
                let image = self
                    .targets
                    .final_image()
                    .ok_or_else(|| missing("final color"))?;
                let format = image.format();
                let texel = texel_size(format).unwrap_or(4);
                let buffer = Buffer::create(
                    &self.device,
                    &BufferDesc {
                        name: "screenshot_readback",
                        size: (extent.width as usize * extent.height as usize * texel) as u64,
                        usage: vk::BufferUsageFlags::TRANSFER_DST,
                        location: MemoryLocation::GpuToCpu,
                    },
                )?;
                cmd.copy_image_to_buffer(image.handle(), format, extent, buffer.handle());
                Some(PendingScreenshot {
                    path,
                    buffer,
                    format,
                    extent,
                })
            }
            None => None,
        };
        cmd.end()?;
        Ok(screenshot)
    }

    /// Submit the frame's command buffers as one chain.
    fn submit(&self, frame: usize, compute: bool) -> Result<()> {
        let sync = self.sync.current();
        let resources = &self.frames[frame];
        let mut chain = SubmissionChain::new(&self.device);

        chain.submit(
            QueueKind::Graphics,
            &[resources.shadow_cmd.handle()],
            vk::PipelineStageFlags::TOP_OF_PIPE,
            &[],
            &[sync.shadows_finished.handle()],
            vk::Fence::null(),
        )?;
        chain.submit(
            QueueKind::Graphics,
            &[resources.scene_cmd.handle()],
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &[SemaphoreWait {
                semaphore: sync.image_available.handle(),
                stage: ACQUIRE_WAIT_STAGES,
            }],
            &[sync.scene_finished.handle()],
            vk::Fence::null(),
        )?;
        if compute {
            chain.submit(
                QueueKind::Compute,
                &[resources.compute_cmd.handle()],
                vk::PipelineStageFlags::COMPUTE_SHADER,
                &[],
                &[sync.compute_finished.handle()],
                vk::Fence::null(),
            )?;
        }
        chain.submit(
            QueueKind::Graphics,
            &[resources.gui_cmd.handle()],
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER,
            &[],
            &[sync.render_finished.handle()],
            sync.in_flight.handle(),
        )?;
        Ok(())
    }

    fn save_pending(screenshot: &PendingScreenshot) -> Result<()> {
        let pixels = screenshot.buffer.read_bytes()?;
        save_screenshot(
            pixels,
            screenshot.format,
            screenshot.extent.width,
            screenshot.extent.height,
            &screenshot.path,
        )?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle during renderer shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::triangle;
    use crate::settings::{DebugMode, MsaaMode};
    use crate::test_support::{headless, shader_source};
    use glam::Vec3;
    use lumina_gpu::headless::{Call, HeadlessDevice};
    use lumina_gpu::{DescriptorResource, PresentOutcome};

    fn renderer_with(device: &SharedDevice, settings: GraphicsSettings) -> Renderer {
        Renderer::new(
            device.clone(),
            RendererConfig {
                width: 64,
                height: 48,
                frames_in_flight: 2,
                settings,
            },
            Box::new(shader_source()),
        )
        .unwrap()
    }

    fn renderer(device: &SharedDevice) -> Renderer {
        renderer_with(device, GraphicsSettings::default())
    }

    fn populated_scene(renderer: &mut Renderer) -> Scene {
        let mut scene = Scene::new();
        let model = renderer
            .load_model("tri", |name| Ok(vec![triangle(name)]))
            .unwrap();
        let material = renderer.create_material(&MaterialDesc::default()).unwrap();
        let entity = scene.create_entity("tri");
        scene
            .attach(entity, MeshRenderer::new(model, vec![material]))
            .unwrap();

        let sun = scene.create_entity("sun");
        scene
            .attach(sun, Light::directional(renderer.light_slots(), Vec3::ONE, 3.0))
            .unwrap();
        let lamp = scene.create_entity("lamp");
        scene
            .attach(lamp, Light::point(renderer.light_slots(), Vec3::ONE, 10.0))
            .unwrap();
        scene
    }

    fn light_reinit_counts(scene: &mut Scene) -> Vec<u32> {
        scene
            .world_mut()
            .query_mut::<&Light>()
            .into_iter()
            .map(|(_, light)| light.shadow_map().map_or(0, |m| m.reinit_count()))
            .collect()
    }

    #[test]
    fn frame_submits_a_semaphore_chain() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        headless.clear_calls();

        let outcome = renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                frame_index: 0,
                image_index: 0
            }
        );

        let submissions = headless.submissions();
        assert_eq!(submissions.len(), 3);
        let (shadows, scene_sub, gui) = (&submissions[0], &submissions[1], &submissions[2]);
        assert!(shadows.waits.is_empty());
        assert_eq!(scene_sub.waits[0].semaphore, shadows.signals[0]);
        assert_eq!(gui.waits[0].semaphore, scene_sub.signals[0]);
        assert_eq!(shadows.fence, vk::Fence::null());
        assert_eq!(scene_sub.fence, vk::Fence::null());
        assert_ne!(gui.fence, vk::Fence::null());

        let acquired = headless
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Acquire { signal, .. } => Some(signal),
                _ => None,
            })
            .unwrap();
        assert_eq!(scene_sub.waits[1].semaphore, acquired);

        let presented_waits = headless
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Present { waits, .. } => Some(waits),
                _ => None,
            })
            .unwrap();
        assert_eq!(presented_waits, gui.signals);
    }

    #[test]
    fn shadow_layers_are_rendered_per_light() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        headless.clear_calls();
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();

        let shadow_cmd = headless.submissions()[0].command_buffers[0];
        let passes = headless.count_calls(
            |c| matches!(c, Call::BeginRenderPass { cmd, .. } if *cmd == shadow_cmd),
        );
        // Four cascades and six cube faces
        assert_eq!(passes, 4 + 6);
        let draws = headless
            .count_calls(|c| matches!(c, Call::DrawIndexed { cmd, .. } if *cmd == shadow_cmd));
        assert_eq!(draws, 10);
    }

    #[test]
    fn out_of_date_acquire_recreates_without_submitting() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        headless.clear_calls();
        headless.script_acquire(AcquireOutcome::OutOfDate);

        let outcome = renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert!(headless.submissions().is_empty());
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CreateSwapchain(_))),
            1
        );
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::DestroySwapchain(_))),
            1
        );

        // The fence was never reset, so the next frame does not deadlock
        assert!(matches!(
            renderer.render_frame(&mut scene, &Camera::default()).unwrap(),
            FrameOutcome::Presented { frame_index: 0, .. }
        ));
    }

    #[test]
    fn recreation_reinits_each_shadow_map_once() {
        let (_headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        assert_eq!(light_reinit_counts(&mut scene), vec![0, 0]);

        renderer.resize(96, 64);
        let outcome = renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        assert_eq!(outcome, FrameOutcome::Recreated);
        assert_eq!(light_reinit_counts(&mut scene), vec![1, 1]);
        assert_eq!(renderer.extent().width, 96);

        renderer.rebuild_shadow_pass(&mut scene).unwrap();
        assert_eq!(light_reinit_counts(&mut scene), vec![2, 2]);
    }

    #[test]
    fn present_out_of_date_recreates_after_advancing() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        headless.script_present(PresentOutcome::OutOfDate);
        headless.clear_calls();

        assert!(matches!(
            renderer.render_frame(&mut scene, &Camera::default()).unwrap(),
            FrameOutcome::Presented { frame_index: 0, .. }
        ));
        assert_eq!(renderer.current_frame(), 1);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CreateSwapchain(_))),
            1
        );
    }

    #[test]
    fn settings_changes_coalesce_into_one_rebuild() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = Scene::new();
        assert_eq!(renderer.samples(), vk::SampleCountFlags::TYPE_4);

        let settings = renderer.settings_mut();
        settings.start_change();
        settings.set_msaa(MsaaMode::X8);
        settings.set_vsync(false);
        settings.set_hdr(true);
        settings.end_change();
        headless.clear_calls();
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();

        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CreateSwapchain(_))),
            1
        );
        assert_eq!(renderer.samples(), vk::SampleCountFlags::TYPE_8);
        // Non-pinned pipelines follow the new sample count
        assert!(headless.count_calls(|c| matches!(
            c,
            Call::CreateGraphicsPipeline {
                samples: vk::SampleCountFlags::TYPE_8,
                ..
            }
        )) >= 2);

        headless.clear_calls();
        renderer.settings_mut().set_debug_mode(DebugMode::Normals);
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CreateSwapchain(_))),
            0
        );
    }

    #[test]
    fn frames_cycle_through_their_own_descriptor_sets() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        headless.clear_calls();

        let indices: Vec<usize> = (0..3)
            .map(|_| match renderer.render_frame(&mut scene, &Camera::default()).unwrap() {
                FrameOutcome::Presented { frame_index, .. } => frame_index,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);

        let table = renderer.descriptors();
        let frame_sets = [
            table.set_handle(set_index::CAMERA, 0).unwrap(),
            table.set_handle(set_index::CAMERA, 1).unwrap(),
        ];
        let bound: Vec<vk::DescriptorSet> = headless
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::BindDescriptorSets { first_set, sets, .. }
                    if first_set == set_index::CAMERA =>
                {
                    Some(sets[0])
                }
                _ => None,
            })
            .collect();
        assert!(!bound.is_empty());
        let expected_per_frame = bound.len() / 3;
        for (frame, chunk) in bound.chunks(expected_per_frame).enumerate() {
            let expected = frame_sets[indices[frame]];
            assert!(chunk.iter().all(|&set| set == expected));
        }
    }

    #[test]
    fn shadow_descriptors_are_written_for_the_current_frame_only() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = populated_scene(&mut renderer);
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();

        let table = renderer.descriptors();
        let frame0 = table.set_handle(set_index::LIGHTS, 0).unwrap();
        let frame1 = table.set_handle(set_index::LIGHTS, 1).unwrap();

        let sun_index = scene
            .world_mut()
            .query_mut::<&Light>()
            .into_iter()
            .find(|(_, l)| l.kind() == LightType::Directional)
            .map(|(_, l)| (l.slot().array_index(), l.shadow_map().unwrap().sampled_view().handle()))
            .unwrap();
        assert!(matches!(
            headless.descriptor(frame0, 1, sun_index.0 as u32),
            Some(DescriptorResource::Image { view, .. }) if view == sun_index.1
        ));
        // Unused slots point at the placeholder
        let unused = (TOTAL_LIGHT_CAPACITY - 1) as u32;
        assert!(matches!(
            headless.descriptor(frame0, 1, unused),
            Some(DescriptorResource::Image { view, .. }) if view != vk::ImageView::null()
        ));
        assert_eq!(headless.descriptor(frame1, 1, sun_index.0 as u32), None);
    }

    #[test]
    fn minimized_window_skips_frames() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = Scene::new();
        renderer.resize(0, 0);
        headless.clear_calls();
        assert_eq!(
            renderer.render_frame(&mut scene, &Camera::default()).unwrap(),
            FrameOutcome::Skipped
        );
        assert!(headless.submissions().is_empty());

        renderer.resize(32, 32);
        assert_eq!(
            renderer.render_frame(&mut scene, &Camera::default()).unwrap(),
            FrameOutcome::Recreated
        );
    }

    struct Dispatcher;

    impl ComputePass for Dispatcher {
        fn name(&self) -> &str {
            "dispatcher"
        }

        fn record(&mut self, cmd: &mut CommandBuffer, _frame_index: usize) -> Result<()> {
            cmd.dispatch(8, 8, 1);
            Ok(())
        }
    }

    #[test]
    fn compute_passes_join_the_chain_on_the_compute_queue() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = Scene::new();
        renderer.add_compute_pass(Box::new(Dispatcher));
        headless.clear_calls();
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();

        let submissions = headless.submissions();
        assert_eq!(submissions.len(), 4);
        assert_eq!(submissions[2].queue, QueueKind::Compute);
        assert_eq!(submissions[2].waits[0].semaphore, submissions[1].signals[0]);
        assert_eq!(submissions[3].waits[0].semaphore, submissions[2].signals[0]);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::Dispatch { groups: [8, 8, 1], .. })),
            1
        );
    }

    #[derive(Default)]
    struct GuiCounter {
        draws: Arc<parking_lot::Mutex<(u32, u32)>>,
    }

    impl GuiHook for GuiCounter {
        fn draw(&mut self, frame: &mut GuiFrame<'_>) -> Result<()> {
            frame.cmd.draw(3, 1);
            self.draws.lock().0 += 1;
            Ok(())
        }

        fn recreate(
            &mut self,
            _render_pass: vk::RenderPass,
            _image_count: usize,
            _samples: vk::SampleCountFlags,
        ) -> Result<()> {
            self.draws.lock().1 += 1;
            Ok(())
        }
    }

    #[test]
    fn gui_hook_runs_once_per_frame_and_on_recreate() {
        let (_headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = Scene::new();
        let gui = GuiCounter::default();
        let counts = gui.draws.clone();
        renderer.set_gui(Box::new(gui)).unwrap();

        renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        renderer.resize(80, 60);
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        assert_eq!(*counts.lock(), (2, 2));
    }

    #[test]
    fn screenshot_is_saved_after_the_frame() {
        let (headless, device): (Arc<HeadlessDevice>, SharedDevice) = headless();
        let mut renderer = renderer_with(
            &device,
            GraphicsSettings {
                msaa: MsaaMode::Off,
                ..Default::default()
            },
        );
        let mut scene = Scene::new();
        let final_image = renderer.render_targets().final_image().unwrap().handle();
        headless.fill_image(final_image, 200);

        let path = std::env::temp_dir().join(format!("lumina-shot-{}.png", std::process::id()));
        renderer.request_screenshot(&path);
        renderer.render_frame(&mut scene, &Camera::default()).unwrap();

        let saved = image::open(&path).unwrap().to_rgba8();
        std::fs::remove_file(&path).ok();
        assert_eq!(saved.dimensions(), (64, 48));
        assert_eq!(saved.get_pixel(0, 0).0, [200, 200, 200, 200]);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CopyImageToBuffer { .. })),
            1
        );
    }

    #[test]
    fn swapchain_copy_transition_starts_in_the_acquire_wait_stage() {
        let (headless, device) = headless();
        let mut renderer = renderer_with(
            &device,
            GraphicsSettings {
                msaa: MsaaMode::Off,
                ..Default::default()
            },
        );
        let mut scene = Scene::new();
        headless.clear_calls();

        let outcome = renderer.render_frame(&mut scene, &Camera::default()).unwrap();
        let FrameOutcome::Presented { image_index, .. } = outcome else {
            panic!("unexpected {outcome:?}");
        };
        let swapchain_image = renderer.swapchain.image(image_index).unwrap().handle();

        let barrier = headless
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::ImageBarrier { barrier, .. } if barrier.image == swapchain_image => {
                    Some(barrier)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let acquired = headless
            .calls()
            .into_iter()
            .find_map(|c| match c {
                Call::Acquire { signal, .. } => Some(signal),
                _ => None,
            })
            .unwrap();
        let wait = headless
            .submissions()
            .into_iter()
            .flat_map(|s| s.waits)
            .find(|w| w.semaphore == acquired)
            .unwrap();
        assert!(wait.stage.intersects(barrier.src_stage));
    }

    struct FailsOnce {
        failed: bool,
    }

    impl ComputePass for FailsOnce {
        fn name(&self) -> &str {
            "fails_once"
        }

        fn record(&mut self, cmd: &mut CommandBuffer, _frame_index: usize) -> Result<()> {
            if !self.failed {
                self.failed = true;
                return Err(RenderError::NoShaderLoaded);
            }
            cmd.dispatch(1, 1, 1);
            Ok(())
        }
    }

    #[test]
    fn failed_recording_keeps_the_fence_signaled() {
        let (headless, device) = headless();
        let mut renderer = renderer(&device);
        let mut scene = Scene::new();
        renderer.add_compute_pass(Box::new(FailsOnce { failed: false }));
        headless.clear_calls();

        assert!(renderer.render_frame(&mut scene, &Camera::default()).is_err());
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::ResetFence(_))),
            0
        );
        assert!(matches!(
            renderer.render_frame(&mut scene, &Camera::default()).unwrap(),
            FrameOutcome::Presented { frame_index: 0, .. }
        ));
    }
}
