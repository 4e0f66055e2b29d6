use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a drawable entity in a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-area size in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Linear RGBA color used to clear render targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        // Teal background.
        Self::new(0.0, 0.6, 0.8, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_uniqueness() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn extent_empty_when_any_axis_is_zero() {
        assert!(Extent2D::new(0, 720).is_empty());
        assert!(Extent2D::new(1280, 0).is_empty());
        assert!(!Extent2D::new(1280, 720).is_empty());
    }

    #[test]
    fn clear_color_default_and_array_roundtrip() {
        let c = ClearColor::default();
        assert_eq!(c.to_array(), [0.0, 0.6, 0.8, 1.0]);
        assert_eq!(ClearColor::from([0.1, 0.2, 0.3, 0.4]).b, 0.3);
    }
}
