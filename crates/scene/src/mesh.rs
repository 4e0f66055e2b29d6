use leapbox_render::{
    Backend, GpuBuffer, IndexBinding, IndexFormat, MaterialView, MeshView, PipelineDescription,
    PipelineState, PrimitiveTopology, RenderError, Renderer, ShaderSource,
};

use crate::geometry::{ColorVertex, MeshData};

/// Vertex (and optional 16-bit index) data resident on the device.
pub struct Mesh<B: Backend> {
    vertices: GpuBuffer<B>,
    indices: Option<GpuBuffer<B>>,
    vertex_count: u32,
    index_count: u32,
    topology: PrimitiveTopology,
}

impl<B: Backend> Mesh<B> {
    pub fn upload(renderer: &mut Renderer<B>, data: &MeshData) -> Result<Self, RenderError> {
        let vertices = renderer.upload_vertices(&data.vertices)?;
        let indices = match &data.indices {
            Some(indices) => Some(renderer.upload_indices(indices)?),
            None => None,
        };
        tracing::debug!(
            vertices = data.vertices.len(),
            indices = data.indices.as_ref().map_or(0, Vec::len),
            topology = ?data.topology,
            "mesh uploaded"
        );
        Ok(Self {
            vertices,
            index_count: data.indices.as_ref().map_or(0, |i| i.len() as u32),
            indices,
            vertex_count: data.vertices.len() as u32,
            topology: data.topology,
        })
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }
}

impl<B: Backend> MeshView<B> for Mesh<B> {
    fn vertex_buffer(&self) -> &GpuBuffer<B> {
        &self.vertices
    }

    fn vertex_stride(&self) -> u32 {
        ColorVertex::STRIDE
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    fn index_buffer(&self) -> Option<IndexBinding<'_, B>> {
        self.indices.as_ref().map(|buffer| IndexBinding {
            buffer,
            format: IndexFormat::Uint16,
        })
    }

    fn index_count(&self) -> u32 {
        self.index_count
    }

    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }
}

/// A pipeline state for [`ColorVertex`] geometry.
pub struct Material<B: Backend> {
    name: String,
    pipeline: PipelineState<B>,
}

impl<B: Backend> Material<B> {
    pub fn new(
        renderer: &mut Renderer<B>,
        name: impl Into<String>,
        shader: ShaderSource,
        topology: PrimitiveTopology,
    ) -> Result<Self, RenderError> {
        let name = name.into();
        let desc = PipelineDescription {
            label: name.clone(),
            shader,
            vertex_entry: "vs_main".into(),
            fragment_entry: "fs_main".into(),
            vertex_stride: ColorVertex::STRIDE,
            attributes: ColorVertex::attributes(),
            topology,
        };
        let pipeline = renderer.build_pipeline_state(&desc)?;
        Ok(Self { name, pipeline })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend> MaterialView<B> for Material<B> {
    fn pipeline_state(&self) -> &PipelineState<B> {
        &self.pipeline
    }
}
