//! Scene glue for the leapbox renderer: built-in geometry, GPU meshes and
//! materials, and an arena of drawable entities.

pub mod geometry;
mod mesh;
mod scene;

pub use geometry::{ColorVertex, MeshData};
pub use mesh::{Material, Mesh};
pub use scene::{DrawItem, MaterialId, MeshId, Scene, SceneEntity, SceneError};

pub fn crate_info() -> &'static str {
    "leapbox-scene v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("scene"));
    }
}
