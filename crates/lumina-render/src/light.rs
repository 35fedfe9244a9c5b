//! Lights and their slot indices.
//!
//! Every live light owns one slot of its type. Slots are dense, stable
//! indices into the light arrays shaders read, and the lowest free index is
//! always handed out first. A [`LightSlot`] returns its index when dropped
//! or when the light changes type.

use glam::{Mat4, Vec3};
use lumina_core::constants::{
    LIGHT_FALLOFF_THRESHOLD, MAX_DIRECTIONAL_LIGHTS, MAX_POINT_LIGHTS, MAX_SPOT_LIGHTS,
    POINT_LIGHT_SHADOW_FACES, SHADOW_CASCADE_COUNT,
};
use lumina_core::BoundingSphere;
use lumina_gpu::SharedDevice;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::camera::Cascade;
use crate::error::Result;
use crate::render_pass::RenderPass;
use crate::shadow::ShadowMap;

/// Near plane of point and spot light shadow projections.
const SHADOW_NEAR: f32 = 0.05;

/// Kind of light source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Directional,
    Point,
    Spot,
}

impl LightType {
    pub const ALL: [Self; 3] = [Self::Directional, Self::Point, Self::Spot];

    /// Maximum live lights of this type.
    pub const fn capacity(self) -> usize {
        match self {
            Self::Directional => MAX_DIRECTIONAL_LIGHTS,
            Self::Point => MAX_POINT_LIGHTS,
            Self::Spot => MAX_SPOT_LIGHTS,
        }
    }

    /// Layers of this type's shadow map.
    pub const fn shadow_layers(self) -> u32 {
        match self {
            Self::Directional => SHADOW_CASCADE_COUNT as u32,
            Self::Point => POINT_LIGHT_SHADOW_FACES as u32,
            Self::Spot => 1,
        }
    }

    /// First index of this type in the combined light array.
    pub const fn array_base(self) -> usize {
        match self {
            Self::Directional => 0,
            Self::Point => MAX_DIRECTIONAL_LIGHTS,
            Self::Spot => MAX_DIRECTIONAL_LIGHTS + MAX_POINT_LIGHTS,
        }
    }

    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Directional => 0,
            Self::Point => 1,
            Self::Spot => 2,
        }
    }

    const fn index(self) -> usize {
        self.as_u32() as usize
    }
}

/// Length of the combined light array.
pub const TOTAL_LIGHT_CAPACITY: usize = MAX_DIRECTIONAL_LIGHTS + MAX_POINT_LIGHTS + MAX_SPOT_LIGHTS;

/// Free slot lists per light type.
#[derive(Debug, Clone)]
pub struct LightSlotAllocator {
    free: [BTreeSet<u32>; 3],
}

impl LightSlotAllocator {
    pub fn new() -> Self {
        Self::with_capacities(LightType::ALL.map(LightType::capacity))
    }

    /// Allocator with custom capacities, indexed like [`LightType::ALL`].
    pub fn with_capacities(capacities: [usize; 3]) -> Self {
        Self {
            free: capacities.map(|n| (0..n as u32).collect()),
        }
    }

    /// Take the lowest free slot.
    ///
    /// # Panics
    /// Panics when every slot of `kind` is in use.
    pub fn allocate(&mut self, kind: LightType) -> u32 {
        self.free[kind.index()]
            .pop_first()
            .unwrap_or_else(|| panic!("all {kind:?} light slots are in use"))
    }

    /// Return a slot to the free list.
    pub fn deallocate(&mut self, kind: LightType, slot: u32) {
        let inserted = self.free[kind.index()].insert(slot);
        debug_assert!(inserted, "{kind:?} light slot {slot} freed twice");
    }

    /// Free slots of `kind` in ascending order.
    pub fn free_slots(&self, kind: LightType) -> Vec<u32> {
        self.free[kind.index()].iter().copied().collect()
    }
}

impl Default for LightSlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a [`LightSlotAllocator`].
#[derive(Debug, Clone, Default)]
pub struct LightSlots(Arc<Mutex<LightSlotAllocator>>);

impl LightSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_allocator(allocator: LightSlotAllocator) -> Self {
        Self(Arc::new(Mutex::new(allocator)))
    }

    /// Take the lowest free slot of `kind`.
    pub fn acquire(&self, kind: LightType) -> LightSlot {
        let index = self.0.lock().allocate(kind);
        LightSlot {
            slots: self.clone(),
            kind,
            index,
        }
    }

    pub fn free_slots(&self, kind: LightType) -> Vec<u32> {
        self.0.lock().free_slots(kind)
    }
}

/// A light slot, returned to its allocator on drop.
#[derive(Debug)]
pub struct LightSlot {
    slots: LightSlots,
    kind: LightType,
    index: u32,
}

impl LightSlot {
    pub fn kind(&self) -> LightType {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Index in the combined light array.
    pub fn array_index(&self) -> usize {
        self.kind.array_base() + self.index as usize
    }
}

impl Drop for LightSlot {
    fn drop(&mut self) {
        self.slots.0.lock().deallocate(self.kind, self.index);
    }
}

/// Light-space matrices of every shadow map layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowMapConstants {
    pub view_projections: Vec<Mat4>,
}

/// Light component.
///
/// Position and direction come from the entity's transform.
pub struct Light {
    pub color: Vec3,
    pub intensity: f32,
    /// Half-angle of a spot light's cone in radians.
    pub cone_angle: f32,
    pub casts_shadows: bool,
    slot: LightSlot,
    shadow_map: Option<ShadowMap>,
}

impl Light {
    pub fn new(slots: &LightSlots, kind: LightType, color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            cone_angle: std::f32::consts::FRAC_PI_6,
            casts_shadows: true,
            slot: slots.acquire(kind),
            shadow_map: None,
        }
    }

    pub fn directional(slots: &LightSlots, color: Vec3, intensity: f32) -> Self {
        Self::new(slots, LightType::Directional, color, intensity)
    }

    pub fn point(slots: &LightSlots, color: Vec3, intensity: f32) -> Self {
        Self::new(slots, LightType::Point, color, intensity)
    }

    pub fn spot(slots: &LightSlots, color: Vec3, intensity: f32, cone_angle: f32) -> Self {
        Self {
            cone_angle,
            ..Self::new(slots, LightType::Spot, color, intensity)
        }
    }

    pub fn kind(&self) -> LightType {
        self.slot.kind()
    }

    pub fn slot(&self) -> &LightSlot {
        &self.slot
    }

    /// Change the light's type, moving it to a slot of the new type.
    ///
    /// The old slot is released and the shadow map, whose layer count
    /// depends on the type, is dropped.
    pub fn set_type(&mut self, slots: &LightSlots, kind: LightType) {
        if kind == self.kind() {
            return;
        }
        self.slot = slots.acquire(kind);
        self.shadow_map = None;
    }

    /// Distance at which the light's contribution falls below the threshold.
    pub fn radius(&self) -> f32 {
        (self.intensity / LIGHT_FALLOFF_THRESHOLD).sqrt()
    }

    /// Far plane of point and spot shadow projections, kept past the near plane.
    fn shadow_far(&self) -> f32 {
        self.radius().max(SHADOW_NEAR * 2.0)
    }

    /// Sphere of influence of a light at `position`.
    pub fn influence(&self, position: Vec3) -> BoundingSphere {
        BoundingSphere::new(position, self.radius())
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.shadow_map.as_ref()
    }

    pub fn shadow_map_mut(&mut self) -> Option<&mut ShadowMap> {
        self.shadow_map.as_mut()
    }

    /// Create the shadow map if the light casts shadows and has none.
    /// Returns whether one was created.
    pub fn ensure_shadow_map(
        &mut self,
        device: &SharedDevice,
        render_pass: &RenderPass,
    ) -> Result<bool> {
        if !self.casts_shadows {
            self.shadow_map = None;
            return Ok(false);
        }
        if self.shadow_map.is_some() {
            return Ok(false);
        }
        self.shadow_map = Some(ShadowMap::new(device, self.kind(), render_pass)?);
        Ok(true)
    }

    /// Light-space view-projection of every shadow map layer.
    ///
    /// Directional lights fit one orthographic projection around each
    /// cascade sphere. Point lights render six cube faces and spot lights a
    /// single perspective projection covering the cone.
    pub fn shadow_map_constants(
        &self,
        position: Vec3,
        direction: Vec3,
        cascades: &[Cascade],
    ) -> ShadowMapConstants {
        let view_projections = match self.kind() {
            LightType::Directional => {
                let direction = direction.normalize_or(Vec3::NEG_Y);
                cascades
                    .iter()
                    .map(|cascade| {
                        let BoundingSphere { center, radius } = cascade.sphere;
                        let eye = center - direction * radius * 2.0;
                        let view = Mat4::look_to_rh(eye, direction, up_for(direction));
                        let projection = Mat4::orthographic_rh(
                            -radius,
                            radius,
                            -radius,
                            radius,
                            0.0,
                            radius * 4.0,
                        );
                        projection * view
                    })
                    .collect()
            }
            LightType::Point => {
                let projection = Mat4::perspective_rh(
                    std::f32::consts::FRAC_PI_2,
                    1.0,
                    SHADOW_NEAR,
                    self.shadow_far(),
                );
                CUBE_FACES
                    .iter()
                    .map(|&(dir, up)| projection * Mat4::look_to_rh(position, dir, up))
                    .collect()
            }
            LightType::Spot => {
                let direction = direction.normalize_or(Vec3::NEG_Z);
                let projection = Mat4::perspective_rh(
                    self.cone_angle * 2.0,
                    1.0,
                    SHADOW_NEAR,
                    self.shadow_far(),
                );
                vec![projection * Mat4::look_to_rh(position, direction, up_for(direction))]
            }
        };
        ShadowMapConstants { view_projections }
    }

    /// Cascade shading of this light samples from.
    ///
    /// Directional lights sample every cascade and return `None`. Point and
    /// spot lights pick the first cascade whose sphere is not fully inside
    /// their sphere of influence, or the last cascade when all are.
    pub fn cascade_index(&self, position: Vec3, cascades: &[Cascade]) -> Option<usize> {
        if self.kind() == LightType::Directional || cascades.is_empty() {
            return None;
        }
        let influence = self.influence(position);
        cascades
            .iter()
            .position(|c| !influence.contains_sphere(&c.sphere))
            .or(Some(cascades.len() - 1))
    }

    /// Data shaders read for this light.
    pub fn gpu_data(&self, position: Vec3, direction: Vec3, cascades: &[Cascade]) -> GpuLight {
        let mut shadow_matrices = [[[0.0; 4]; 4]; POINT_LIGHT_SHADOW_FACES];
        let has_shadow = self.shadow_map.is_some();
        if has_shadow {
            let constants = self.shadow_map_constants(position, direction, cascades);
            for (slot, m) in shadow_matrices.iter_mut().zip(&constants.view_projections) {
                *slot = m.to_cols_array_2d();
            }
        }
        let direction = direction.normalize_or_zero();
        GpuLight {
            position_radius: [position.x, position.y, position.z, self.radius()],
            direction_cone: [direction.x, direction.y, direction.z, self.cone_angle.cos()],
            color_intensity: [self.color.x, self.color.y, self.color.z, self.intensity],
            kind: self.kind().as_u32(),
            slot: self.slot.index(),
            cascade: self
                .cascade_index(position, cascades)
                .map_or(u32::MAX, |c| c as u32),
            shadow_layers: if has_shadow {
                self.kind().shadow_layers()
            } else {
                0
            },
            shadow_matrices,
        }
    }
}

const CUBE_FACES: [(Vec3, Vec3); POINT_LIGHT_SHADOW_FACES] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

fn up_for(direction: Vec3) -> Vec3 {
    if direction.abs_diff_eq(Vec3::Y, 1e-3) || direction.abs_diff_eq(Vec3::NEG_Y, 1e-3) {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// One entry of the light storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub position_radius: [f32; 4],
    /// Direction and cosine of the cone half-angle.
    pub direction_cone: [f32; 4],
    pub color_intensity: [f32; 4],
    pub kind: u32,
    pub slot: u32,
    /// Cascade to sample, `u32::MAX` for none.
    pub cascade: u32,
    /// Zero when the light has no shadow map.
    pub shadow_layers: u32,
    pub shadow_matrices: [[[f32; 4]; 4]; POINT_LIGHT_SHADOW_FACES],
}

/// Header of the light storage buffer, followed by the light array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightBufferHeader {
    /// Live lights per type, indexed like [`LightType::ALL`].
    pub counts: [u32; 3],
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade(radius: f32) -> Cascade {
        Cascade {
            near: 0.0,
            far: 1.0,
            sphere: BoundingSphere::new(Vec3::ZERO, radius),
        }
    }

    #[test]
    fn lowest_free_slot_is_reused() {
        let mut allocator = LightSlotAllocator::with_capacities([1, 3, 1]);
        let slots: Vec<u32> = (0..3).map(|_| allocator.allocate(LightType::Point)).collect();
        assert_eq!(slots, vec![0, 1, 2]);

        allocator.deallocate(LightType::Point, 1);
        assert_eq!(allocator.free_slots(LightType::Point), vec![1]);
        assert_eq!(allocator.allocate(LightType::Point), 1);
        assert!(allocator.free_slots(LightType::Point).is_empty());
    }

    #[test]
    #[should_panic(expected = "light slots are in use")]
    fn exhausted_type_panics() {
        let mut allocator = LightSlotAllocator::with_capacities([1, 1, 1]);
        allocator.allocate(LightType::Spot);
        allocator.allocate(LightType::Spot);
    }

    #[test]
    fn slot_guard_releases_on_drop_and_type_change() {
        let slots = LightSlots::new();
        let a = Light::point(&slots, Vec3::ONE, 1.0);
        let mut b = Light::point(&slots, Vec3::ONE, 1.0);
        assert_eq!((a.slot().index(), b.slot().index()), (0, 1));

        drop(a);
        assert_eq!(slots.free_slots(LightType::Point)[0], 0);

        b.set_type(&slots, LightType::Spot);
        assert_eq!(b.kind(), LightType::Spot);
        assert_eq!(b.slot().index(), 0);
        assert_eq!(b.slot().array_index(), LightType::Spot.array_base());
        assert_eq!(
            slots.free_slots(LightType::Point).len(),
            LightType::Point.capacity()
        );
    }

    #[test]
    fn radius_follows_falloff_threshold() {
        let slots = LightSlots::new();
        let light = Light::point(&slots, Vec3::ONE, 4.0);
        assert!((light.radius() - 20.0).abs() < 1e-4);
    }

    #[test]
    fn cascade_index_picks_first_cascade_outside_influence() {
        let slots = LightSlots::new();
        // Radius 10
        let light = Light::point(&slots, Vec3::ONE, 1.0);
        let cascades = [cascade(1.0), cascade(5.0), cascade(50.0), cascade(100.0)];
        assert_eq!(light.cascade_index(Vec3::ZERO, &cascades), Some(2));

        let small = [cascade(1.0), cascade(2.0)];
        assert_eq!(light.cascade_index(Vec3::ZERO, &small), Some(1));

        let sun = Light::directional(&slots, Vec3::ONE, 1.0);
        assert_eq!(sun.cascade_index(Vec3::ZERO, &cascades), None);
    }

    #[test]
    fn shadow_constants_have_one_matrix_per_layer() {
        let slots = LightSlots::new();
        let cascades = [cascade(1.0), cascade(2.0), cascade(4.0), cascade(8.0)];
        for kind in LightType::ALL {
            let light = Light::new(&slots, kind, Vec3::ONE, 1.0);
            let constants = light.shadow_map_constants(Vec3::ZERO, Vec3::NEG_Y, &cascades);
            assert_eq!(
                constants.view_projections.len(),
                kind.shadow_layers() as usize
            );
        }
    }

    #[test]
    fn directional_cascade_projection_contains_its_sphere() {
        let slots = LightSlots::new();
        let sun = Light::directional(&slots, Vec3::ONE, 1.0);
        let cascades = [Cascade {
            near: 0.0,
            far: 1.0,
            sphere: BoundingSphere::new(Vec3::new(3.0, 0.0, -2.0), 5.0),
        }];
        let vp = sun.shadow_map_constants(Vec3::ZERO, Vec3::new(0.3, -1.0, 0.2), &cascades)
            .view_projections[0];
        let ndc = vp.project_point3(Vec3::new(3.0, 0.0, -2.0));
        assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn unlit_lights_still_get_valid_shadow_projections() {
        let slots = LightSlots::new();
        for kind in [LightType::Point, LightType::Spot] {
            let light = Light::new(&slots, kind, Vec3::ONE, 0.0);
            assert_eq!(light.radius(), 0.0);
            let constants = light.shadow_map_constants(Vec3::ZERO, Vec3::NEG_Y, &[]);
            for m in &constants.view_projections {
                assert!(m.is_finite(), "{kind:?} shadow matrix is not finite");
            }
        }
    }

    #[test]
    fn live_slots_stay_unique_through_create_destroy_and_type_changes() {
        let capacities = [2, 4, 3];
        let slots = LightSlots::from_allocator(LightSlotAllocator::with_capacities(capacities));
        let mut lights: Vec<Light> = Vec::new();
        let mut seed: u32 = 0x2545_f491;
        let mut next = move |bound: usize| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed as usize % bound
        };

        for _ in 0..500 {
            let kind = LightType::ALL[next(3)];
            let has_room = !slots.free_slots(kind).is_empty();
            match next(3) {
                0 if has_room => lights.push(Light::new(&slots, kind, Vec3::ONE, 1.0)),
                1 if !lights.is_empty() => {
                    let index = next(lights.len());
                    lights.swap_remove(index);
                }
                2 if !lights.is_empty() && has_room => {
                    let index = next(lights.len());
                    lights[index].set_type(&slots, kind);
                }
                _ => {}
            }

            for kind in LightType::ALL {
                let mut live: Vec<u32> = lights
                    .iter()
                    .filter(|l| l.kind() == kind)
                    .map(|l| l.slot().index())
                    .collect();
                live.sort_unstable();
                let count = live.len();
                live.dedup();
                assert_eq!(live.len(), count, "{kind:?} slots shared: {live:?}");

                let free = slots.free_slots(kind);
                assert!(live.iter().all(|slot| !free.contains(slot)));
                assert_eq!(count + free.len(), capacities[kind.as_u32() as usize]);
            }
        }

        lights.clear();
        for kind in LightType::ALL {
            let capacity = capacities[kind.as_u32() as usize] as u32;
            assert_eq!(slots.free_slots(kind), (0..capacity).collect::<Vec<_>>());
        }
    }
}
