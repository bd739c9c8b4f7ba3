use std::collections::HashMap;
use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use tilexr_geometry::{Vertex, ZoneBuffer};
use tilexr_render::{
    ContextState, GpuBufferId, GraphicsContext, RenderError, RenderTarget, ViewPass,
};
use wgpu::util::DeviceExt;

use crate::shaders;

/// View passes a single flush can carry (two eyes, a few layers).
pub const MAX_PASSES_PER_FLUSH: usize = 8;

/// Colour format for offscreen targets and swapchain images.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Uniforms {
    view_proj: [[f32; 4]; 4],
}

/// Byte distance between consecutive pass uniforms in the uniform buffer.
pub fn uniform_stride(min_alignment: u32) -> u64 {
    wgpu::util::align_to(
        std::mem::size_of::<Uniforms>() as u64,
        u64::from(min_alignment.max(1)),
    )
}

/// Vertex buffer layout matching [`tilexr_geometry::Vertex`].
pub fn zone_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Uint32,
    ];
    wgpu::VertexBufferLayout {
        array_stride: Vertex::STRIDE as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

struct ZoneGpuBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

struct TargetEntry {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct DepthTexture {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct RecordedPass {
    pass: ViewPass,
    draws: Vec<GpuBufferId>,
}

/// [`GraphicsContext`] backed by a wgpu device.
///
/// Commands are recorded on the CPU between `begin_view` and `flush`; flush
/// encodes one render pass per view and submits them in one go.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_stride: u64,
    color_format: wgpu::TextureFormat,
    targets: HashMap<RenderTarget, TargetEntry>,
    depth: Option<DepthTexture>,
    buffers: HashMap<GpuBufferId, ZoneGpuBuffers>,
    next_id: u64,
    recorded: Vec<RecordedPass>,
    state: ContextState,
}

impl WgpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, color_format: wgpu::TextureFormat) -> Self {
        let uniform_stride = uniform_stride(device.limits().min_uniform_buffer_offset_alignment);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pass_uniforms"),
            size: uniform_stride * MAX_PASSES_PER_FLUSH as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pass_uniform_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<Uniforms>() as u64),
                },
                count: None,
            }],
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass_uniform_bind_group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<Uniforms>() as u64),
                }),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("zone_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("zone_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::ZONE_SHADER.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("zone_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[zone_vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        Self {
            device,
            queue,
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            color_format,
            targets: HashMap::new(),
            depth: None,
            buffers: HashMap::new(),
            next_id: 0,
            recorded: Vec::new(),
            state: ContextState::default(),
        }
    }

    /// Context on the default adapter with no surface, for offscreen use.
    pub fn headless(color_format: wgpu::TextureFormat) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RenderError::Backend("no suitable adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tilexr_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| RenderError::Backend(e.to_string()))?;

        tracing::info!(adapter = ?adapter.get_info().name, "headless wgpu context created");
        Ok(Self::new(device, queue, color_format))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    /// Make a texture view drawable as `target`. Swapchain images are
    /// registered once per image and eye.
    pub fn register_target(
        &mut self,
        target: RenderTarget,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
    ) {
        self.targets.insert(
            target,
            TargetEntry {
                view,
                width,
                height,
            },
        );
    }

    pub fn unregister_target(&mut self, target: RenderTarget) {
        self.targets.remove(&target);
    }

    /// Allocate an offscreen colour texture and register it as `target`.
    pub fn create_offscreen_target(
        &mut self,
        target: RenderTarget,
        width: u32,
        height: u32,
    ) -> wgpu::Texture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.color_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.register_target(target, texture.create_view(&Default::default()), width, height);
        texture
    }

    fn ensure_depth(&mut self, width: u32, height: u32) {
        let fits = self
            .depth
            .as_ref()
            .is_some_and(|d| d.width == width && d.height == height);
        if !fits {
            self.depth = Some(DepthTexture {
                view: create_depth_texture(&self.device, width, height),
                width,
                height,
            });
        }
    }
}

impl GraphicsContext for WgpuContext {
    fn upload(&mut self, buffer: &ZoneBuffer) -> Result<GpuBufferId, RenderError> {
        let vertex = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("zone_vertex_buffer"),
            contents: buffer.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("zone_index_buffer"),
            contents: buffer.index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.next_id += 1;
        let id = GpuBufferId(self.next_id);
        self.buffers.insert(
            id,
            ZoneGpuBuffers {
                vertex,
                index,
                index_count: buffer.index_count(),
            },
        );
        Ok(id)
    }

    fn release(&mut self, id: GpuBufferId) {
        if let Some(buffers) = self.buffers.remove(&id) {
            buffers.vertex.destroy();
            buffers.index.destroy();
        }
        for pass in &mut self.recorded {
            pass.draws.retain(|d| *d != id);
        }
        if self.state.bound_buffer == Some(id) {
            self.state.bound_buffer = None;
        }
    }

    fn begin_view(&mut self, pass: &ViewPass) -> Result<(), RenderError> {
        if !self.targets.contains_key(&pass.target) {
            return Err(RenderError::UnknownTarget(pass.target));
        }
        if self.recorded.len() >= MAX_PASSES_PER_FLUSH {
            return Err(RenderError::Backend(format!(
                "more than {MAX_PASSES_PER_FLUSH} passes in one flush"
            )));
        }
        self.recorded.push(RecordedPass {
            pass: *pass,
            draws: Vec::new(),
        });
        self.state.target = Some(pass.target);
        self.state.viewport = Some(pass.viewport);
        self.state.bound_buffer = None;
        Ok(())
    }

    fn draw(&mut self, id: GpuBufferId) -> Result<(), RenderError> {
        if !self.buffers.contains_key(&id) {
            return Err(RenderError::UnknownBuffer(id));
        }
        let pass = self.recorded.last_mut().ok_or(RenderError::NoActiveView)?;
        pass.draws.push(id);
        self.state.bound_buffer = Some(id);
        Ok(())
    }

    fn flush(&mut self) -> Result<u32, RenderError> {
        let recorded = std::mem::take(&mut self.recorded);
        if recorded.is_empty() {
            return Ok(0);
        }

        for (i, rec) in recorded.iter().enumerate() {
            let uniforms = Uniforms {
                view_proj: rec.pass.view_proj.to_cols_array_2d(),
            };
            self.queue.write_buffer(
                &self.uniform_buffer,
                i as u64 * self.uniform_stride,
                bytemuck::bytes_of(&uniforms),
            );
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("zone_encoder"),
        });
        let mut draws = 0u32;

        for (i, rec) in recorded.iter().enumerate() {
            let (width, height) = match self.targets.get(&rec.pass.target) {
                Some(t) => (t.width, t.height),
                None => return Err(RenderError::UnknownTarget(rec.pass.target)),
            };
            self.ensure_depth(width, height);
            let (Some(target), Some(depth)) = (self.targets.get(&rec.pass.target), self.depth.as_ref())
            else {
                return Err(RenderError::UnknownTarget(rec.pass.target));
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("zone_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.1,
                            g: 0.1,
                            b: 0.15,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            let vp = rec.pass.viewport;
            pass.set_viewport(
                vp.x as f32,
                vp.y as f32,
                vp.width as f32,
                vp.height as f32,
                0.0,
                1.0,
            );
            pass.set_pipeline(&self.pipeline);
            let offset = (i as u64 * self.uniform_stride) as u32;
            pass.set_bind_group(0, &self.uniform_bind_group, &[offset]);

            for id in &rec.draws {
                let Some(buffers) = self.buffers.get(id) else {
                    continue;
                };
                pass.set_vertex_buffer(0, buffers.vertex.slice(..));
                pass.set_index_buffer(buffers.index.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..buffers.index_count, 0, 0..1);
                draws += 1;
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(draws)
    }

    fn reset_state(&mut self) {
        self.recorded.clear();
        self.state = ContextState::default();
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resident_buffers(&self) -> usize {
        self.buffers.len()
    }
}

fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_texture"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&Default::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stride_respects_alignment() {
        assert_eq!(uniform_stride(256), 256);
        assert_eq!(uniform_stride(64), 64);
        assert_eq!(uniform_stride(1), 64);
        assert_eq!(uniform_stride(0), 64);
    }

    #[test]
    fn vertex_layout_matches_zone_vertex() {
        let layout = zone_vertex_layout();
        assert_eq!(layout.array_stride, 36);
        let offsets: Vec<u64> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(
            offsets,
            vec![
                Vertex::POSITION_OFFSET as u64,
                Vertex::NORMAL_OFFSET as u64,
                Vertex::UV_OFFSET as u64,
                Vertex::MATERIAL_OFFSET as u64,
            ]
        );
    }
}
