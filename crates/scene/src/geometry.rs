//! CPU-side mesh data for the built-in shapes.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use leapbox_render::{PrimitiveTopology, VertexAttribute, VertexFormat};

/// Position + RGBA color, tightly packed.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl ColorVertex {
    pub const STRIDE: u32 = std::mem::size_of::<ColorVertex>() as u32;

    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }

    pub fn attributes() -> Vec<VertexAttribute> {
        vec![
            VertexAttribute {
                location: 0,
                offset: 0,
                format: VertexFormat::Float32x3,
            },
            VertexAttribute {
                location: 1,
                offset: 12,
                format: VertexFormat::Float32x4,
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<ColorVertex>,
    pub indices: Option<Vec<u16>>,
    pub topology: PrimitiveTopology,
}

const RED: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
const GREEN: Vec4 = Vec4::new(0.0, 1.0, 0.0, 1.0);
const BLUE: Vec4 = Vec4::new(0.0, 0.0, 1.0, 1.0);

/// Single triangle, drawn as a strip.
pub fn triangle() -> MeshData {
    MeshData {
        vertices: vec![
            ColorVertex::new(Vec3::new(0.0, 1.0, 0.0), RED),
            ColorVertex::new(Vec3::new(1.0, -1.0, 0.0), GREEN),
            ColorVertex::new(Vec3::new(-1.0, -1.0, 0.0), BLUE),
        ],
        indices: None,
        topology: PrimitiveTopology::TriangleStrip,
    }
}

/// Full-viewport quad at depth 0.5, drawn as a strip.
pub fn quad() -> MeshData {
    MeshData {
        vertices: vec![
            ColorVertex::new(Vec3::new(-1.0, -1.0, 0.5), BLUE),
            ColorVertex::new(Vec3::new(-1.0, 1.0, 0.5), RED),
            ColorVertex::new(Vec3::new(1.0, -1.0, 0.5), GREEN),
            ColorVertex::new(Vec3::new(1.0, 1.0, 0.5), RED),
        ],
        indices: None,
        topology: PrimitiveTopology::TriangleStrip,
    }
}

/// Cube spanning [-1, 1] on every axis, 36 indices as a triangle list.
pub fn cube() -> MeshData {
    #[rustfmt::skip]
    let vertices = vec![
        ColorVertex::new(Vec3::new( 1.0,  1.0,  1.0), RED),
        ColorVertex::new(Vec3::new( 1.0, -1.0,  1.0), GREEN),
        ColorVertex::new(Vec3::new( 1.0,  1.0, -1.0), BLUE),
        ColorVertex::new(Vec3::new( 1.0, -1.0, -1.0), BLUE),
        ColorVertex::new(Vec3::new(-1.0,  1.0,  1.0), RED),
        ColorVertex::new(Vec3::new(-1.0, -1.0,  1.0), GREEN),
        ColorVertex::new(Vec3::new(-1.0,  1.0, -1.0), BLUE),
        ColorVertex::new(Vec3::new(-1.0, -1.0, -1.0), BLUE),
    ];
    #[rustfmt::skip]
    let indices = vec![
        0, 1, 2, 1, 2, 3, // +X
        4, 5, 6, 5, 6, 7, // -X
        0, 2, 4, 2, 4, 6, // +Y
        1, 3, 5, 3, 5, 7, // -Y
        0, 4, 1, 1, 4, 5, // +Z
        2, 3, 6, 6, 3, 7, // -Z
    ];
    MeshData {
        vertices,
        indices: Some(indices),
        topology: PrimitiveTopology::TriangleList,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_is_seven_floats() {
        assert_eq!(ColorVertex::STRIDE, 28);
        let last = ColorVertex::attributes().pop().unwrap();
        assert_eq!(last.offset + last.format.byte_size(), ColorVertex::STRIDE);
    }

    #[test]
    fn triangle_bytes_match_packed_layout() {
        let mesh = triangle();
        let floats: &[f32] = bytemuck::cast_slice(&mesh.vertices);
        assert_eq!(floats.len(), 21);
        assert_eq!(&floats[..7], &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        assert_eq!(mesh.topology, PrimitiveTopology::TriangleStrip);
    }

    #[test]
    fn quad_is_four_vertex_strip() {
        let mesh = quad();
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.indices.is_none());
        assert!(mesh.vertices.iter().all(|v| v.position[2] == 0.5));
    }

    #[test]
    fn cube_indices_stay_in_range() {
        let mesh = cube();
        let indices = mesh.indices.unwrap();
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        assert_eq!(mesh.topology, PrimitiveTopology::TriangleList);
    }
}
