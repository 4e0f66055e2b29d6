//! Conversions from core types to their wgpu counterparts.

use leapbox_common::ClearColor;
use leapbox_render::{BufferUsage, IndexFormat, PrimitiveTopology, VertexFormat};

/// Local conversion trait; the orphan rule keeps us from using `From` here.
pub trait IntoWgpu<T> {
    fn into_wgpu(self) -> T;
}

impl IntoWgpu<wgpu::Color> for ClearColor {
    fn into_wgpu(self) -> wgpu::Color {
        wgpu::Color {
            r: f64::from(self.r),
            g: f64::from(self.g),
            b: f64::from(self.b),
            a: f64::from(self.a),
        }
    }
}

impl IntoWgpu<wgpu::PrimitiveTopology> for PrimitiveTopology {
    fn into_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

impl IntoWgpu<wgpu::IndexFormat> for IndexFormat {
    fn into_wgpu(self) -> wgpu::IndexFormat {
        match self {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }
}

impl IntoWgpu<wgpu::VertexFormat> for VertexFormat {
    fn into_wgpu(self) -> wgpu::VertexFormat {
        match self {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }
}

impl IntoWgpu<wgpu::BufferUsages> for BufferUsage {
    fn into_wgpu(self) -> wgpu::BufferUsages {
        // COPY_SRC on device-local buffers allows diagnostic read-back.
        match self {
            BufferUsage::VertexOrConstant => {
                wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
            BufferUsage::Index => {
                wgpu::BufferUsages::INDEX
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
            BufferUsage::UploadStaging => {
                wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC
            }
        }
    }
}

/// Rounds `size` up to the copy alignment wgpu requires for buffer copies.
pub fn align_copy_size(size: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    size.div_ceil(align) * align
}

/// Picks a linear (non-sRGB) swap chain format so clear colors are written
/// as given. Falls back to the surface's first format.
pub fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .find(|f| !f.is_srgb())
        .or_else(|| formats.first())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_color_to_wgpu() {
        let c: wgpu::Color = ClearColor::default().into_wgpu();
        assert_eq!(c.r, 0.0);
        assert!((c.g - 0.6).abs() < 1e-6);
        assert!((c.b - 0.8).abs() < 1e-6);
        assert_eq!(c.a, 1.0);
    }

    #[test]
    fn surface_format_prefers_linear() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Rgba8Unorm,
        ];
        assert_eq!(
            pick_surface_format(&formats),
            Some(wgpu::TextureFormat::Bgra8Unorm)
        );
        assert_eq!(
            pick_surface_format(&[wgpu::TextureFormat::Rgba8UnormSrgb]),
            Some(wgpu::TextureFormat::Rgba8UnormSrgb)
        );
        assert_eq!(pick_surface_format(&[]), None);
    }

    #[test]
    fn strip_topology_maps() {
        let t: wgpu::PrimitiveTopology = PrimitiveTopology::TriangleStrip.into_wgpu();
        assert_eq!(t, wgpu::PrimitiveTopology::TriangleStrip);
    }

    #[test]
    fn index_and_vertex_formats_map() {
        let i: wgpu::IndexFormat = IndexFormat::Uint16.into_wgpu();
        assert_eq!(i, wgpu::IndexFormat::Uint16);
        let v: wgpu::VertexFormat = VertexFormat::Float32x4.into_wgpu();
        assert_eq!(v.size(), 16);
    }

    #[test]
    fn staging_is_mappable_and_device_buffers_are_not() {
        let staging: wgpu::BufferUsages = BufferUsage::UploadStaging.into_wgpu();
        assert!(staging.contains(wgpu::BufferUsages::MAP_WRITE));
        let index: wgpu::BufferUsages = BufferUsage::Index.into_wgpu();
        assert!(!index.contains(wgpu::BufferUsages::MAP_WRITE));
        assert!(index.contains(wgpu::BufferUsages::INDEX));
    }

    #[test]
    fn copy_sizes_round_up_to_four() {
        assert_eq!(align_copy_size(1), 4);
        assert_eq!(align_copy_size(4), 4);
        assert_eq!(align_copy_size(6), 8);
        assert_eq!(align_copy_size(144), 144);
    }
}
