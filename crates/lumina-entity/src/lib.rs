//! Entity system for the Lumina engine.
//!
//! Uses hecs as the ECS backend. [`Scene`] wraps the world with the few
//! operations the engine relies on: named entity creation, component
//! attachment and lookup.

mod transform;

pub use hecs::{Entity, World};
pub use transform::Transform;

use lumina_core::{Error, Result};

/// Human-readable entity name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(pub String);

impl Name {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A collection of entities and their components.
#[derive(Default)]
pub struct Scene {
    world: World,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an entity with a [`Name`] and an identity [`Transform`].
    pub fn create_entity(&mut self, name: impl Into<String>) -> Entity {
        self.world.spawn((Name(name.into()), Transform::default()))
    }

    /// Attach a component, replacing one of the same type.
    pub fn attach<C: hecs::Component>(&mut self, entity: Entity, component: C) -> Result<()> {
        self.world
            .insert_one(entity, component)
            .map_err(|_| Error::InvalidArgument(format!("No such entity: {entity:?}")))
    }

    /// Detach and return a component.
    pub fn detach<C: hecs::Component>(&mut self, entity: Entity) -> Option<C> {
        self.world.remove_one::<C>(entity).ok()
    }

    /// Borrow a component.
    pub fn get<C: hecs::Component>(&self, entity: Entity) -> Option<hecs::Ref<'_, C>> {
        self.world.get::<&C>(entity).ok()
    }

    /// Mutably borrow a component.
    pub fn get_mut<C: hecs::Component>(&self, entity: Entity) -> Option<hecs::RefMut<'_, C>> {
        self.world.get::<&mut C>(entity).ok()
    }

    /// Remove an entity and all its components.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        self.world
            .despawn(entity)
            .map_err(|_| Error::InvalidArgument(format!("No such entity: {entity:?}")))
    }

    /// First entity with the given name.
    pub fn find(&self, name: &str) -> Option<Entity> {
        self.world
            .query::<&Name>()
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(entity, _)| entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.world.contains(entity)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.world.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable world access for queries that iterate components.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[derive(Debug, PartialEq)]
    struct Health(u32);

    #[test]
    fn created_entities_have_name_and_transform() {
        let mut scene = Scene::new();
        let e = scene.create_entity("camera");
        assert_eq!(scene.get::<Name>(e).unwrap().as_str(), "camera");
        assert!(scene.get::<Transform>(e).is_some());
        assert_eq!(scene.find("camera"), Some(e));
        assert_eq!(scene.find("missing"), None);
    }

    #[test]
    fn attach_get_and_detach() {
        let mut scene = Scene::new();
        let e = scene.create_entity("player");
        scene.attach(e, Health(10)).unwrap();
        scene.get_mut::<Health>(e).unwrap().0 = 7;
        assert_eq!(*scene.get::<Health>(e).unwrap(), Health(7));
        assert_eq!(scene.detach::<Health>(e), Some(Health(7)));
        assert!(scene.get::<Health>(e).is_none());
    }

    #[test]
    fn destroyed_entities_reject_components() {
        let mut scene = Scene::new();
        let e = scene.create_entity("temp");
        scene.destroy(e).unwrap();
        assert!(!scene.contains(e));
        assert!(scene.attach(e, Health(1)).is_err());
        assert!(scene.destroy(e).is_err());
        assert!(scene.is_empty());
    }

    #[test]
    fn iteration_over_transforms() {
        let mut scene = Scene::new();
        for i in 0..3 {
            let e = scene.create_entity(format!("e{i}"));
            scene
                .get_mut::<Transform>(e)
                .unwrap()
                .set_position(Vec3::splat(i as f32));
        }
        let sum: f32 = scene
            .world_mut()
            .query_mut::<&mut Transform>()
            .into_iter()
            .map(|(_, t)| t.model_matrix().w_axis.x)
            .sum();
        assert!((sum - 3.0).abs() < 1e-6);
    }
}
