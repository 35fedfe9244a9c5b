//! Shader programs and pipelines.
//!
//! A shader is addressed by a base path such as `"pbr"`. Its stage binaries
//! are the files named `<base>.<stage>[...].spv`, where the stage is found
//! by substring (`vert`, `frag`, `comp`, ...). Loaded programs are shared
//! through a [`ResourceCache`] keyed by the base path.
//!
//! A [`ShaderPipeline`] tracks every property the native pipeline depends
//! on. Setters only invalidate the pipeline when the value actually
//! changes, and the pipeline is rebuilt lazily on the next bind.

use ash::vk;
use lumina_core::{set_if_changed, Dirty};
use lumina_gpu::{
    CommandBuffer, ComputePipelineDesc, GraphicsPipelineDesc, RasterState, ResourceCache,
    ShaderStageDesc, SharedDevice,
};
use std::collections::BTreeMap;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RenderError, Result};

const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage of a shader binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Substrings identifying each stage in a file name.
    const MARKERS: [(&'static str, Self); 6] = [
        ("vert", Self::Vertex),
        ("tesc", Self::TessellationControl),
        ("tese", Self::TessellationEvaluation),
        ("geom", Self::Geometry),
        ("frag", Self::Fragment),
        ("comp", Self::Compute),
    ];

    /// Stage named in the part of a file name following the shader's base.
    pub fn from_file_suffix(suffix: &str) -> Option<Self> {
        Self::MARKERS
            .iter()
            .find(|(marker, _)| suffix.contains(marker))
            .map(|&(_, stage)| stage)
    }

    pub const fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessellationControl => "tessellation control",
            Self::TessellationEvaluation => "tessellation evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

/// Part of `file_name` after `prefix`, if it names a stage binary of that shader.
fn stage_suffix<'a>(file_name: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = file_name.strip_prefix(prefix)?;
    (rest.starts_with('.') && rest.ends_with(".spv")).then_some(rest)
}

/// One stage binary found for a shader.
#[derive(Debug, Clone)]
pub struct ShaderBinary {
    pub file_name: String,
    pub code: Vec<u8>,
}

/// Where shader binaries come from.
pub trait ShaderSource: Send + Sync {
    /// Every stage binary of the shader at `path`.
    fn stage_binaries(&self, path: &str) -> Result<Vec<ShaderBinary>>;
}

/// Shader binaries in a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryShaderSource {
    root: PathBuf,
}

impl DirectoryShaderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderSource for DirectoryShaderSource {
    fn stage_binaries(&self, path: &str) -> Result<Vec<ShaderBinary>> {
        let full = self.root.join(path);
        let dir = full.parent().unwrap_or(&self.root).to_path_buf();
        let Some(prefix) = full.file_name().and_then(|n| n.to_str()) else {
            return Err(RenderError::ShaderNotFound(path.to_string()));
        };

        let io_err = |source| RenderError::Io {
            path: dir.clone(),
            source,
        };
        let mut binaries = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if stage_suffix(&file_name, prefix).is_none() {
                continue;
            }
            let code = std::fs::read(entry.path()).map_err(|source| RenderError::Io {
                path: entry.path(),
                source,
            })?;
            binaries.push(ShaderBinary { file_name, code });
        }
        Ok(binaries)
    }
}

/// Shader binaries held in memory, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemoryShaderSource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryShaderSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a binary.
    pub fn insert(&mut self, file_name: impl Into<String>, code: Vec<u8>) {
        self.files.insert(file_name.into(), code);
    }

    pub fn remove(&mut self, file_name: &str) {
        self.files.remove(file_name);
    }
}

impl ShaderSource for MemoryShaderSource {
    fn stage_binaries(&self, path: &str) -> Result<Vec<ShaderBinary>> {
        Ok(self
            .files
            .iter()
            .filter(|(name, _)| stage_suffix(name, path).is_some())
            .map(|(name, code)| ShaderBinary {
                file_name: name.clone(),
                code: code.clone(),
            })
            .collect())
    }
}

/// Shader modules of every stage of one shader.
pub struct ShaderProgram {
    device: SharedDevice,
    path: String,
    /// Sorted in pipeline order.
    stages: Vec<(ShaderStage, vk::ShaderModule)>,
}

impl ShaderProgram {
    /// Load every stage binary of the shader at `path`.
    ///
    /// Fails if no binary is found, if two binaries map to the same stage or
    /// if a binary is not valid SPIR-V.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn load(device: &SharedDevice, source: &dyn ShaderSource, path: &str) -> Result<Self> {
        let binaries = source.stage_binaries(path)?;

        // Modules created so far are destroyed by Drop if a later stage fails
        let mut program = Self {
            device: device.clone(),
            path: path.to_string(),
            stages: Vec::with_capacity(binaries.len()),
        };
        for binary in binaries {
            let suffix =
                stage_suffix(file_prefix(&binary.file_name), file_prefix(path)).unwrap_or("");
            let Some(stage) = ShaderStage::from_file_suffix(suffix) else {
                tracing::warn!("Ignoring '{}': no shader stage in name", binary.file_name);
                continue;
            };
            if program.stages.iter().any(|(s, _)| *s == stage) {
                return Err(RenderError::DuplicateShaderStage {
                    path: path.to_string(),
                    stage: stage.name(),
                });
            }
            let words = ash::util::read_spv(&mut Cursor::new(&binary.code)).map_err(|e| {
                RenderError::InvalidSpirv {
                    path: binary.file_name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let module = device.create_shader_module(&words)?;
            program.stages.push((stage, module));
        }

        if program.stages.is_empty() {
            return Err(RenderError::ShaderNotFound(path.to_string()));
        }
        program.stages.sort_by_key(|(stage, _)| *stage);
        tracing::debug!("Loaded shader '{path}' with {} stages", program.stages.len());
        Ok(program)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stages(&self) -> &[(ShaderStage, vk::ShaderModule)] {
        &self.stages
    }

    /// Whether this is a single compute stage.
    pub fn is_compute(&self) -> bool {
        matches!(self.stages.as_slice(), [(ShaderStage::Compute, _)])
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        for (_, module) in &self.stages {
            self.device.destroy_shader_module(*module);
        }
    }
}

fn file_prefix(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Render pass and subpass a graphics pipeline draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub color_attachment_count: u32,
}

/// A shader program plus the state its native pipeline is built from.
pub struct ShaderPipeline {
    device: SharedDevice,
    program: Option<Arc<ShaderProgram>>,
    raster: RasterState,
    /// Sample count pinned regardless of the global MSAA setting.
    custom_samples: Option<vk::SampleCountFlags>,
    target: PipelineTarget,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constants: Vec<vk::PushConstantRange>,
    layout: Dirty<vk::PipelineLayout>,
    pipeline: Dirty<vk::Pipeline>,
}

impl ShaderPipeline {
    pub fn new(device: &SharedDevice) -> Self {
        Self {
            device: device.clone(),
            program: None,
            raster: RasterState::default(),
            custom_samples: None,
            target: PipelineTarget::default(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            set_layouts: Vec::new(),
            push_constants: Vec::new(),
            layout: Dirty::new(vk::PipelineLayout::null()),
            pipeline: Dirty::new(vk::Pipeline::null()),
        }
    }

    /// Use the shader at `path`, loading it through `cache` on a miss.
    pub fn load_shader_from_file(
        &mut self,
        cache: &ResourceCache<ShaderProgram>,
        source: &dyn ShaderSource,
        path: &str,
    ) -> Result<()> {
        let program =
            cache.get_or_try_insert(path, || ShaderProgram::load(&self.device, source, path))?;
        if self
            .program
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &program))
        {
            return Ok(());
        }
        self.program = Some(program);
        self.pipeline.invalidate();
        Ok(())
    }

    /// Reload the current shader from `source`.
    ///
    /// On success the cache entry is replaced and the pipeline rebuilds on
    /// the next bind. On failure the error is logged and the previous
    /// program stays in use. Returns whether the reload took effect.
    pub fn hot_reload(
        &mut self,
        cache: &ResourceCache<ShaderProgram>,
        source: &dyn ShaderSource,
    ) -> bool {
        let Some(path) = self.program.as_ref().map(|p| p.path().to_string()) else {
            return false;
        };
        match ShaderProgram::load(&self.device, source, &path) {
            Ok(program) => {
                let program = Arc::new(program);
                cache.set_cached(path.as_str(), &program);
                self.program = Some(program);
                self.pipeline.invalidate();
                tracing::info!("Reloaded shader '{path}'");
                true
            }
            Err(e) => {
                tracing::error!("Failed to reload shader '{path}': {e}");
                false
            }
        }
    }

    pub fn program(&self) -> Option<&Arc<ShaderProgram>> {
        self.program.as_ref()
    }

    fn update(&mut self, changed: bool) {
        if changed {
            self.pipeline.invalidate();
        }
    }

    pub fn set_depth_test(&mut self, enabled: bool) {
        let changed = set_if_changed(&mut self.raster.depth_test, enabled);
        self.update(changed);
    }

    pub fn set_depth_write(&mut self, enabled: bool) {
        let changed = set_if_changed(&mut self.raster.depth_write, enabled);
        self.update(changed);
    }

    pub fn set_depth_compare(&mut self, op: vk::CompareOp) {
        let changed = set_if_changed(&mut self.raster.depth_compare, op);
        self.update(changed);
    }

    /// Constant and slope depth bias, or `None` to disable.
    pub fn set_depth_bias(&mut self, bias: Option<(f32, f32)>) {
        let changed = set_if_changed(&mut self.raster.depth_bias, bias);
        self.update(changed);
    }

    pub fn set_cull_mode(&mut self, mode: vk::CullModeFlags) {
        let changed = set_if_changed(&mut self.raster.cull_mode, mode);
        self.update(changed);
    }

    pub fn set_front_face(&mut self, face: vk::FrontFace) {
        let changed = set_if_changed(&mut self.raster.front_face, face);
        self.update(changed);
    }

    pub fn set_polygon_mode(&mut self, mode: vk::PolygonMode) {
        let changed = set_if_changed(&mut self.raster.polygon_mode, mode);
        self.update(changed);
    }

    pub fn set_topology(&mut self, topology: vk::PrimitiveTopology) {
        let changed = set_if_changed(&mut self.raster.topology, topology);
        self.update(changed);
    }

    pub fn set_line_width(&mut self, width: f32) {
        let changed = set_if_changed(&mut self.raster.line_width, width);
        self.update(changed);
    }

    pub fn set_blend(&mut self, enabled: bool) {
        let changed = set_if_changed(&mut self.raster.blend, enabled);
        self.update(changed);
    }

    /// Follow the global MSAA sample count. Ignored while a custom count is pinned.
    pub fn set_multisampling_count(&mut self, samples: vk::SampleCountFlags) {
        if self.custom_samples.is_some() {
            return;
        }
        let changed = set_if_changed(&mut self.raster.samples, samples);
        self.update(changed);
    }

    /// Pin the sample count, or `None` to follow the global setting again.
    pub fn set_custom_sample_count(&mut self, samples: Option<vk::SampleCountFlags>) {
        self.custom_samples = samples;
        if let Some(samples) = samples {
            let changed = set_if_changed(&mut self.raster.samples, samples);
            self.update(changed);
        }
    }

    pub fn set_target(&mut self, target: PipelineTarget) {
        let changed = set_if_changed(&mut self.target, target);
        let changed = set_if_changed(
            &mut self.raster.color_attachment_count,
            target.color_attachment_count,
        ) || changed;
        self.update(changed);
    }

    pub fn set_vertex_input(
        &mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) {
        // Native descriptions have no PartialEq
        let same = bindings.len() == self.vertex_bindings.len()
            && attributes.len() == self.vertex_attributes.len()
            && bindings.iter().zip(&self.vertex_bindings).all(|(a, b)| {
                (a.binding, a.stride, a.input_rate) == (b.binding, b.stride, b.input_rate)
            })
            && attributes.iter().zip(&self.vertex_attributes).all(|(a, b)| {
                (a.location, a.binding, a.format, a.offset)
                    == (b.location, b.binding, b.format, b.offset)
            });
        if same {
            return;
        }
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self.pipeline.invalidate();
    }

    /// Descriptor set layouts and push constant ranges of the pipeline layout.
    pub fn set_layout(
        &mut self,
        set_layouts: Vec<vk::DescriptorSetLayout>,
        push_constants: Vec<vk::PushConstantRange>,
    ) {
        let same = set_layouts == self.set_layouts
            && push_constants.len() == self.push_constants.len()
            && push_constants.iter().zip(&self.push_constants).all(|(a, b)| {
                (a.stage_flags, a.offset, a.size) == (b.stage_flags, b.offset, b.size)
            });
        if same {
            return;
        }
        self.set_layouts = set_layouts;
        self.push_constants = push_constants;
        self.layout.invalidate();
        self.pipeline.invalidate();
    }

    pub fn raster_state(&self) -> &RasterState {
        &self.raster
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.raster.samples
    }

    /// Whether the next bind rebuilds the native pipeline.
    pub fn is_dirty(&self) -> bool {
        self.pipeline.is_dirty() || *self.pipeline.peek() == vk::Pipeline::null()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        *self.layout.peek()
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        *self.pipeline.peek()
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        if self.program.as_ref().is_some_and(|p| p.is_compute()) {
            vk::PipelineBindPoint::COMPUTE
        } else {
            vk::PipelineBindPoint::GRAPHICS
        }
    }

    /// Rebuild the native pipeline if anything it depends on changed.
    ///
    /// Previous native objects are destroyed immediately; callers make
    /// sure no submitted work still references them.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn reload_shader(&mut self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let program = self.program.clone().ok_or(RenderError::NoShaderLoaded)?;

        if self.layout.is_dirty() || *self.layout.peek() == vk::PipelineLayout::null() {
            let layout = self
                .device
                .create_pipeline_layout(&self.set_layouts, &self.push_constants)?;
            let old = *self.layout.peek();
            self.layout.set_clean(layout);
            if old != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(old);
            }
        }
        let layout = *self.layout.peek();

        let stages: Vec<ShaderStageDesc<'_>> = program
            .stages()
            .iter()
            .map(|&(stage, module)| ShaderStageDesc {
                stage: stage.flags(),
                module,
                entry_point: ENTRY_POINT,
            })
            .collect();

        let pipeline = if program.is_compute() {
            self.device.create_compute_pipeline(&ComputePipelineDesc {
                stage: stages[0],
                layout,
            })?
        } else {
            if self.target.render_pass == vk::RenderPass::null() {
                return Err(lumina_gpu::GpuError::InvalidState(format!(
                    "Pipeline for '{}' has no render pass",
                    program.path()
                ))
                .into());
            }
            self.device.create_graphics_pipeline(&GraphicsPipelineDesc {
                stages: &stages,
                vertex_bindings: &self.vertex_bindings,
                vertex_attributes: &self.vertex_attributes,
                raster: &self.raster,
                layout,
                render_pass: self.target.render_pass,
                subpass: self.target.subpass,
            })?
        };

        let old = *self.pipeline.peek();
        self.pipeline.set_clean(pipeline);
        if old != vk::Pipeline::null() {
            self.device.destroy_pipeline(old);
        }
        tracing::debug!("Built pipeline for '{}'", program.path());
        Ok(())
    }

    /// Bind the pipeline, rebuilding it first if needed.
    pub fn bind(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        self.reload_shader()?;
        cmd.bind_pipeline(self.bind_point(), *self.pipeline.peek());
        Ok(())
    }
}

impl Drop for ShaderPipeline {
    fn drop(&mut self) {
        let pipeline = *self.pipeline.peek();
        if pipeline != vk::Pipeline::null() {
            self.device.destroy_pipeline(pipeline);
        }
        let layout = *self.layout.peek();
        if layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{headless, shader_source, spirv};
    use lumina_gpu::headless::Call;
    use lumina_gpu::QueueKind;

    fn target() -> PipelineTarget {
        PipelineTarget {
            render_pass: ash::vk::Handle::from_raw(1000),
            subpass: 0,
            color_attachment_count: 1,
        }
    }

    fn pipeline_builds(headless: &lumina_gpu::headless::HeadlessDevice) -> usize {
        headless.count_calls(|c| matches!(c, Call::CreateGraphicsPipeline { .. }))
    }

    #[test]
    fn stage_detection_uses_the_part_after_the_base_name() {
        assert_eq!(stage_suffix("pbr.vert.spv", "pbr"), Some(".vert.spv"));
        assert_eq!(stage_suffix("pbr_shadow.vert.spv", "pbr"), None);
        assert_eq!(stage_suffix("pbr.vert.glsl", "pbr"), None);
        assert_eq!(
            ShaderStage::from_file_suffix(".frag.spv"),
            Some(ShaderStage::Fragment)
        );
        // The base name itself may contain a marker
        assert_eq!(
            stage_suffix("composite.frag.spv", "composite").and_then(ShaderStage::from_file_suffix),
            Some(ShaderStage::Fragment)
        );
    }

    #[test]
    fn duplicate_stage_is_rejected_and_modules_released() {
        let (headless, device) = headless();
        let mut source = MemoryShaderSource::new();
        source.insert("pbr.vert.spv", spirv());
        source.insert("pbr.vert.old.spv", spirv());

        let result = ShaderProgram::load(&device, &source, "pbr");
        assert!(matches!(
            result,
            Err(RenderError::DuplicateShaderStage { stage: "vertex", .. })
        ));
        assert_eq!(headless.live_objects("shader_module"), 0);
    }

    #[test]
    fn missing_shader_and_bad_spirv_fail() {
        let (_headless, device) = headless();
        let mut source = MemoryShaderSource::new();
        assert!(matches!(
            ShaderProgram::load(&device, &source, "missing"),
            Err(RenderError::ShaderNotFound(_))
        ));
        source.insert("bad.frag.spv", vec![1, 2, 3]);
        assert!(matches!(
            ShaderProgram::load(&device, &source, "bad"),
            Err(RenderError::InvalidSpirv { .. })
        ));
    }

    #[test]
    fn stages_are_sorted_in_pipeline_order() {
        let (_headless, device) = headless();
        let program = ShaderProgram::load(&device, &shader_source(), "pbr").unwrap();
        let stages: Vec<ShaderStage> = program.stages().iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
        assert!(!program.is_compute());
    }

    #[test]
    fn cached_program_is_loaded_once() {
        let (headless, device) = headless();
        let cache = ResourceCache::new();
        let source = shader_source();

        let mut a = ShaderPipeline::new(&device);
        let mut b = ShaderPipeline::new(&device);
        a.load_shader_from_file(&cache, &source, "pbr").unwrap();
        b.load_shader_from_file(&cache, &source, "pbr").unwrap();

        assert_eq!(headless.count_calls(|c| matches!(c, Call::CreateShaderModule(_))), 2);
        assert!(Arc::ptr_eq(a.program().unwrap(), b.program().unwrap()));
    }

    #[test]
    fn unchanged_setter_keeps_pipeline_clean() {
        let (headless, device) = headless();
        let cache = ResourceCache::new();
        let mut pipeline = ShaderPipeline::new(&device);
        pipeline.set_target(target());
        pipeline
            .load_shader_from_file(&cache, &shader_source(), "pbr")
            .unwrap();

        pipeline.reload_shader().unwrap();
        assert_eq!(pipeline_builds(&headless), 1);
        assert!(!pipeline.is_dirty());

        // Same value as the default
        pipeline.set_depth_test(true);
        assert!(!pipeline.is_dirty());
        pipeline.reload_shader().unwrap();
        assert_eq!(pipeline_builds(&headless), 1);

        pipeline.set_depth_test(false);
        assert!(pipeline.is_dirty());
        pipeline.reload_shader().unwrap();
        pipeline.reload_shader().unwrap();
        assert_eq!(pipeline_builds(&headless), 2);
        assert_eq!(headless.live_objects("pipeline"), 1);
    }

    #[test]
    fn pinned_sample_count_ignores_global_msaa() {
        let (_headless, device) = headless();
        let mut pipeline = ShaderPipeline::new(&device);
        pipeline.set_custom_sample_count(Some(vk::SampleCountFlags::TYPE_1));
        pipeline.set_multisampling_count(vk::SampleCountFlags::TYPE_4);
        assert_eq!(pipeline.samples(), vk::SampleCountFlags::TYPE_1);

        pipeline.set_custom_sample_count(None);
        pipeline.set_multisampling_count(vk::SampleCountFlags::TYPE_4);
        assert_eq!(pipeline.samples(), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn bind_builds_lazily_and_dedups() {
        let (headless, device) = headless();
        let pool = lumina_gpu::CommandPool::new(&device, QueueKind::Graphics).unwrap();
        let mut cmd = pool.allocate().unwrap();
        let cache = ResourceCache::new();
        let mut pipeline = ShaderPipeline::new(&device);
        pipeline.set_target(target());
        pipeline
            .load_shader_from_file(&cache, &shader_source(), "pbr")
            .unwrap();
        assert_eq!(pipeline_builds(&headless), 0);

        cmd.begin().unwrap();
        pipeline.bind(&mut cmd).unwrap();
        pipeline.bind(&mut cmd).unwrap();
        cmd.end().unwrap();
        assert_eq!(pipeline_builds(&headless), 1);
        assert_eq!(headless.count_calls(|c| matches!(c, Call::BindPipeline { .. })), 1);
    }

    #[test]
    fn failed_hot_reload_keeps_previous_program() {
        let (headless, device) = headless();
        let cache = ResourceCache::new();
        let mut source = shader_source();
        let mut pipeline = ShaderPipeline::new(&device);
        pipeline.set_target(target());
        pipeline.load_shader_from_file(&cache, &source, "pbr").unwrap();
        pipeline.reload_shader().unwrap();
        let built = pipeline.pipeline();

        source.insert("pbr.frag.spv", vec![0xde, 0xad]);
        assert!(!pipeline.hot_reload(&cache, &source));
        assert!(!pipeline.is_dirty());
        assert_eq!(pipeline.pipeline(), built);

        source.insert("pbr.frag.spv", spirv());
        assert!(pipeline.hot_reload(&cache, &source));
        assert!(pipeline.is_dirty());
        pipeline.reload_shader().unwrap();
        assert_ne!(pipeline.pipeline(), built);
        assert!(Arc::ptr_eq(
            &cache.get_cached("pbr").unwrap(),
            pipeline.program().unwrap()
        ));
        assert_eq!(pipeline_builds(&headless), 2);
    }

    #[test]
    fn graphics_pipeline_without_render_pass_fails() {
        let (_headless, device) = headless();
        let cache = ResourceCache::new();
        let mut pipeline = ShaderPipeline::new(&device);
        pipeline
            .load_shader_from_file(&cache, &shader_source(), "pbr")
            .unwrap();
        assert!(pipeline.reload_shader().is_err());
        assert!(matches!(
            ShaderPipeline::new(&device).reload_shader(),
            Err(RenderError::NoShaderLoaded)
        ));
    }
}
