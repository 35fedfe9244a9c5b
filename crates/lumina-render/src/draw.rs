//! Draw helpers on top of [`CommandBuffer`].

use ash::vk;
use bytemuck::{Pod, Zeroable};
use lumina_gpu::{CommandBuffer, DescriptorTable};

use crate::mesh::{Mesh, MeshRenderer};

/// Per-draw push constant block shared by the PBR and shadow shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawConstants {
    /// Index into the model matrix buffer.
    pub model_index: u32,
    pub material_index: u32,
    /// Shadow map layer being rendered.
    pub layer: u32,
    /// Light slot being rendered; unused outside shadow passes.
    pub light_index: u32,
}

/// Pipeline state a model draw needs.
pub struct DrawContext<'a> {
    pub table: &'a DescriptorTable,
    pub layout: vk::PipelineLayout,
    pub stages: vk::ShaderStageFlags,
    /// Shadow passes skip material binding.
    pub bind_materials: bool,
}

pub trait DrawCommands {
    /// Bind a mesh's buffers and draw all of its indices.
    fn draw_mesh(&mut self, mesh: &Mesh);

    /// Draw every sub-mesh of a model with its material.
    fn draw_model(
        &mut self,
        ctx: &DrawContext<'_>,
        renderer: &MeshRenderer,
        model_index: u32,
        layer: u32,
        light_index: u32,
    );

    /// Draw the skybox cube generated in the vertex shader.
    fn draw_skybox(&mut self);
}

/// Vertices of the skybox cube, generated from the vertex index.
pub const SKYBOX_VERTEX_COUNT: u32 = 36;

impl DrawCommands for CommandBuffer {
    fn draw_mesh(&mut self, mesh: &Mesh) {
        self.bind_vertex_buffer(mesh.vertex_buffer());
        self.bind_index_buffer(mesh.index_buffer());
        self.draw_indexed(mesh.index_count(), 1, 0);
    }

    fn draw_model(
        &mut self,
        ctx: &DrawContext<'_>,
        renderer: &MeshRenderer,
        model_index: u32,
        layer: u32,
        light_index: u32,
    ) {
        for mesh in renderer.model.meshes() {
            let material = renderer.material_for(mesh);
            if ctx.bind_materials {
                if let Some(material) = material {
                    material.bind(ctx.table, self, vk::PipelineBindPoint::GRAPHICS, ctx.layout);
                }
            }
            let constants = DrawConstants {
                model_index,
                material_index: material.map_or(0, |m| m.index()),
                layer,
                light_index,
            };
            self.push_constants(ctx.layout, ctx.stages, &constants);
            self.draw_mesh(mesh);
        }
    }

    fn draw_skybox(&mut self) {
        self.draw(SKYBOX_VERTEX_COUNT, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{material_table, MaterialDesc, Materials};
    use crate::mesh::{triangle, Model};
    use crate::test_support::headless;
    use lumina_gpu::headless::{Call, HeadlessDevice};
    use lumina_gpu::{set_index, CommandPool, QueueKind, SharedDevice};
    use std::mem::size_of;
    use std::sync::Arc;

    fn record_model(
        headless: &HeadlessDevice,
        device: &SharedDevice,
        bind_materials: bool,
    ) -> usize {
        let pool = CommandPool::transient(device, QueueKind::Graphics).unwrap();
        let table = material_table(device, 1);
        let mut materials = Materials::new(device, &pool, &table).unwrap();
        let material = materials.create(&table, &MaterialDesc::default()).unwrap();
        let model = Arc::new(
            Model::from_imported(device, &pool, "pair", &[triangle("a"), triangle("b")]).unwrap(),
        );
        let renderer = MeshRenderer::new(model, vec![material]);

        let command_pool = CommandPool::new(device, QueueKind::Graphics).unwrap();
        let mut cmd = command_pool.allocate().unwrap();
        cmd.begin().unwrap();
        headless.clear_calls();
        cmd.draw_model(
            &DrawContext {
                table: &table,
                layout: vk::PipelineLayout::null(),
                stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                bind_materials,
            },
            &renderer,
            7,
            0,
            0,
        );
        headless.count_calls(|c| {
            matches!(c, Call::BindDescriptorSets { first_set, .. } if *first_set == set_index::TEXTURES)
        })
    }

    #[test]
    fn model_draws_every_sub_mesh() {
        let (headless, device) = headless();
        record_model(&headless, &device, true);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::DrawIndexed { index_count: 3, .. })),
            2
        );
        assert_eq!(
            headless.count_calls(|c| matches!(
                c,
                Call::PushConstants { size, .. } if *size == size_of::<DrawConstants>()
            )),
            2
        );
    }

    #[test]
    fn dynamic_materials_bind_their_set_unless_skipped() {
        let headless = Arc::new(HeadlessDevice::with_sampled_image_limit(16));
        let device: SharedDevice = headless.clone();
        assert_eq!(record_model(&headless, &device, true), 2);
        assert_eq!(record_model(&headless, &device, false), 0);
    }

    #[test]
    fn skybox_is_a_non_indexed_cube() {
        let (headless, device) = headless();
        let pool = CommandPool::new(&device, QueueKind::Graphics).unwrap();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin().unwrap();
        cmd.draw_skybox();
        assert_eq!(
            headless.count_calls(|c| matches!(
                c,
                Call::Draw {
                    vertex_count: 36,
                    instance_count: 1,
                    ..
                }
            )),
            1
        );
    }
}
