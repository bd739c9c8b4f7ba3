/// WGSL shader for zone geometry. Colour comes from the material index.
pub const ZONE_SHADER: &str = r#"
struct Uniforms {
    view_proj: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> uniforms: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) material: u32,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) @interpolate(flat) material: u32,
};

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = uniforms.view_proj * vec4<f32>(vertex.position, 1.0);
    out.world_normal = normalize(vertex.normal);
    out.uv = vertex.uv;
    out.material = vertex.material;
    return out;
}

fn material_color(material: u32) -> vec3<f32> {
    let h = material * 2654435761u;
    let r = f32((h >> 16u) & 255u) / 255.0;
    let g = f32((h >> 8u) & 255u) / 255.0;
    let b = f32(h & 255u) / 255.0;
    return mix(vec3<f32>(0.35, 0.35, 0.35), vec3<f32>(r, g, b), 0.6);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let light_dir = normalize(vec3<f32>(0.3, 1.0, 0.5));
    let ambient = 0.3;
    let diffuse = max(dot(in.world_normal, light_dir), 0.0);
    let lighting = ambient + diffuse * 0.7;
    let edge = step(0.02, min(min(in.uv.x, in.uv.y), min(1.0 - in.uv.x, 1.0 - in.uv.y)));
    let base = material_color(in.material) * mix(0.8, 1.0, edge);
    return vec4<f32>(base * lighting, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_declares_entry_points_and_layout() {
        assert!(ZONE_SHADER.contains("fn vs_main"));
        assert!(ZONE_SHADER.contains("fn fs_main"));
        for location in 0..4 {
            assert!(ZONE_SHADER.contains(&format!("@location({location})")));
        }
    }
}
