use std::collections::BTreeMap;

use leapbox_common::EntityId;
use leapbox_render::{
    Backend, Drawable, FrameOutcome, MaterialView, MeshView, PrimitiveTopology, RenderError,
    Renderer, ShaderSource,
};

use crate::geometry;
use crate::mesh::{Material, Mesh};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("mesh not found: {0:?}")]
    UnknownMesh(MeshId),
    #[error("material not found: {0:?}")]
    UnknownMaterial(MaterialId),
    #[error("entity not found: {0:?}")]
    UnknownEntity(EntityId),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Pairs a mesh with the material it is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneEntity {
    pub id: EntityId,
    pub mesh: MeshId,
    pub material: MaterialId,
}

/// A resolved entity, borrowed from the scene for one frame.
pub struct DrawItem<'a, B: Backend> {
    mesh: &'a Mesh<B>,
    material: &'a Material<B>,
}

impl<B: Backend> Drawable<B> for DrawItem<'_, B> {
    fn mesh(&self) -> &dyn MeshView<B> {
        self.mesh
    }

    fn material(&self) -> &dyn MaterialView<B> {
        self.material
    }
}

/// Owns meshes and materials; entities refer to them by id.
///
/// Entities are drawn in spawn order.
pub struct Scene<B: Backend> {
    meshes: BTreeMap<MeshId, Mesh<B>>,
    materials: BTreeMap<MaterialId, Material<B>>,
    entities: Vec<SceneEntity>,
    next_id: u64,
}

impl<B: Backend> Default for Scene<B> {
    fn default() -> Self {
        Self {
            meshes: BTreeMap::new(),
            materials: BTreeMap::new(),
            entities: Vec::new(),
            next_id: 1,
        }
    }
}

impl<B: Backend> Scene<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// One cube drawn with `shader`.
    pub fn demo(renderer: &mut Renderer<B>, shader: ShaderSource) -> Result<Self, SceneError> {
        let mut scene = Self::new();
        let material = scene.add_material(Material::new(
            renderer,
            shader.label.clone(),
            shader,
            PrimitiveTopology::TriangleList,
        )?);
        let mesh = scene.add_mesh(Mesh::upload(renderer, &geometry::cube())?);
        scene.spawn(mesh, material)?;
        tracing::info!(entities = scene.len(), "demo scene ready");
        Ok(scene)
    }

    pub fn add_mesh(&mut self, mesh: Mesh<B>) -> MeshId {
        let id = MeshId(self.allocate_id());
        self.meshes.insert(id, mesh);
        id
    }

    pub fn add_material(&mut self, material: Material<B>) -> MaterialId {
        let id = MaterialId(self.allocate_id());
        self.materials.insert(id, material);
        id
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh<B>> {
        self.meshes.get(&id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material<B>> {
        self.materials.get(&id)
    }

    pub fn spawn(&mut self, mesh: MeshId, material: MaterialId) -> Result<EntityId, SceneError> {
        if !self.meshes.contains_key(&mesh) {
            return Err(SceneError::UnknownMesh(mesh));
        }
        if !self.materials.contains_key(&material) {
            return Err(SceneError::UnknownMaterial(material));
        }
        let id = EntityId::new();
        self.entities.push(SceneEntity { id, mesh, material });
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> Result<SceneEntity, SceneError> {
        let pos = self
            .entities
            .iter()
            .position(|e| e.id == id)
            .ok_or(SceneError::UnknownEntity(id))?;
        Ok(self.entities.remove(pos))
    }

    pub fn entities(&self) -> &[SceneEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn draw_items(&self) -> Result<Vec<DrawItem<'_, B>>, SceneError> {
        self.entities
            .iter()
            .map(|e| {
                Ok(DrawItem {
                    mesh: self.meshes.get(&e.mesh).ok_or(SceneError::UnknownMesh(e.mesh))?,
                    material: self
                        .materials
                        .get(&e.material)
                        .ok_or(SceneError::UnknownMaterial(e.material))?,
                })
            })
            .collect()
    }

    pub fn render(&self, renderer: &mut Renderer<B>) -> Result<FrameOutcome, SceneError> {
        let items = self.draw_items()?;
        let drawables: Vec<&dyn Drawable<B>> =
            items.iter().map(|item| item as &dyn Drawable<B>).collect();
        Ok(renderer.render(&drawables)?)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leapbox_common::Extent2D;
    use leapbox_render::RendererConfig;
    use leapbox_render::headless::{HeadlessBackend, RecordedCommand};

    fn renderer() -> Renderer<HeadlessBackend> {
        Renderer::new(
            HeadlessBackend::new(Extent2D::new(1280, 720)),
            RendererConfig::default(),
        )
        .unwrap()
    }

    fn shader() -> ShaderSource {
        ShaderSource {
            label: "shaders".into(),
            source: String::new(),
        }
    }

    #[test]
    fn demo_scene_draws_one_indexed_cube() {
        let mut r = renderer();
        let scene = Scene::demo(&mut r, shader()).unwrap();
        assert_eq!(scene.len(), 1);

        let outcome = scene.render(&mut r).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { draws: 1, .. }));
        let record = r.backend().last_record().unwrap();
        assert!(record
            .commands
            .iter()
            .any(|c| matches!(c, RecordedCommand::DrawIndexed { index_count: 36 })));
    }

    #[test]
    fn entities_draw_in_spawn_order() {
        let mut r = renderer();
        let mut scene = Scene::new();
        let strip = scene.add_material(
            Material::new(&mut r, "strip", shader(), PrimitiveTopology::TriangleStrip).unwrap(),
        );
        let tri = scene.add_mesh(Mesh::upload(&mut r, &geometry::triangle()).unwrap());
        let quad = scene.add_mesh(Mesh::upload(&mut r, &geometry::quad()).unwrap());
        scene.spawn(quad, strip).unwrap();
        scene.spawn(tri, strip).unwrap();

        scene.render(&mut r).unwrap();
        let counts: Vec<u32> = r
            .backend()
            .last_record()
            .unwrap()
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Draw { vertex_count } => Some(*vertex_count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![4, 3]);
    }

    #[test]
    fn spawn_rejects_unknown_ids() {
        let mut r = renderer();
        let mut scene = Scene::new();
        let mesh = scene.add_mesh(Mesh::upload(&mut r, &geometry::triangle()).unwrap());
        let err = scene.spawn(mesh, MaterialId(99)).unwrap_err();
        assert!(matches!(err, SceneError::UnknownMaterial(MaterialId(99))));
        let err = scene.spawn(MeshId(42), MaterialId(99)).unwrap_err();
        assert!(matches!(err, SceneError::UnknownMesh(MeshId(42))));
    }

    #[test]
    fn despawn_removes_entity() {
        let mut r = renderer();
        let mut scene = Scene::demo(&mut r, shader()).unwrap();
        let id = scene.entities()[0].id;
        scene.despawn(id).unwrap();
        assert!(scene.is_empty());
        assert!(matches!(
            scene.despawn(id),
            Err(SceneError::UnknownEntity(_))
        ));

        let outcome = scene.render(&mut r).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { draws: 0, .. }));
    }
}
