/// WGSL shader for position + color vertices (28-byte stride).
///
/// Positions are passed through untransformed; z is remapped from [-1, 1]
/// to wgpu's [0, 1] clip depth.
pub const COLOR_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(vertex.position.xy, vertex.position.z * 0.5 + 0.5, 1.0);
    out.color = vertex.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

pub const COLOR_SHADER_VERTEX_ENTRY: &str = "vs_main";
pub const COLOR_SHADER_FRAGMENT_ENTRY: &str = "fs_main";
