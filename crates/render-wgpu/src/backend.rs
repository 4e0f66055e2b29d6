use std::sync::Arc;
use std::time::Duration;

use leapbox_common::Extent2D;
use leapbox_render::backend::{
    BarrierTarget, Command, CommandList, ResourceState, ScissorRect, Viewport,
};
use leapbox_render::{
    Backend, BackendError, BufferUsage, PipelineDescription, PrimitiveTopology, RendererConfig,
};
use winit::window::{Fullscreen, Window};

use crate::conversions::{IntoWgpu, align_copy_size, pick_surface_format};
use crate::fence::WgpuFence;

pub struct WgpuBuffer {
    raw: wgpu::Buffer,
    size: u64,
    usage: BufferUsage,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.raw
    }
}

pub struct WgpuPipeline {
    raw: wgpu::RenderPipeline,
    topology: PrimitiveTopology,
}

/// The global binding layout every pipeline is built against. Empty for now.
pub struct WgpuRootSignature {
    pipeline_layout: wgpu::PipelineLayout,
    bind_group: wgpu::BindGroup,
}

/// Encoders are transient in wgpu; the allocator only counts what it recorded.
#[derive(Debug, Default)]
pub struct WgpuAllocator {
    executed: u64,
}

pub struct WgpuRenderTarget {
    index: usize,
    generation: u64,
}

pub struct WgpuBackend {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    adapter_info: wgpu::AdapterInfo,
    /// Surface texture acquired by the frame being recorded, presented in `present`.
    frame: Option<wgpu::SurfaceTexture>,
    buffer_count: usize,
    presented: u64,
    generation: u64,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, renderer_config: &RendererConfig) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|e| BackendError::creation("surface", e))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: renderer_config.use_warp_device,
        }))
        .ok_or_else(|| BackendError::creation("adapter", "no compatible adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("leapbox_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| BackendError::creation("device", e))?;

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let format = pick_surface_format(&caps.formats)
            .ok_or_else(|| BackendError::creation("swap chain", "surface reports no formats"))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if renderer_config.vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: leapbox_render::FRAME_COUNT as u32,
        };
        surface.configure(&device, &config);

        let adapter_info = adapter.get_info();
        tracing::info!(
            backend = adapter_info.backend.to_str(),
            adapter = %adapter_info.name,
            format = ?format,
            "GPU initialized"
        );

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            adapter_info,
            frame: None,
            buffer_count: leapbox_render::FRAME_COUNT,
            presented: 0,
            generation: 0,
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn check_target(&self, target: &WgpuRenderTarget) -> Result<(), BackendError> {
        if target.generation != self.generation {
            return Err(BackendError::InvalidUsage(format!(
                "render target {} predates the last resize",
                target.index
            )));
        }
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<wgpu::SurfaceTexture, BackendError> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost or outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|e| BackendError::Presentation(e.to_string()))
            }
            Err(e) => Err(BackendError::Presentation(e.to_string())),
        }
    }

    fn acquire_view(&mut self) -> Result<wgpu::TextureView, BackendError> {
        let frame = match self.frame.take() {
            Some(frame) => frame,
            None => self.acquire_frame()?,
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(frame);
        Ok(view)
    }
}

fn begin_pass(
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPass<'static> {
    encoder
        .begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("frame_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            ..Default::default()
        })
        .forget_lifetime()
}

fn apply_viewport(pass: &mut wgpu::RenderPass<'_>, v: &Viewport) {
    pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
}

fn apply_scissor(pass: &mut wgpu::RenderPass<'_>, s: &ScissorRect) {
    pass.set_scissor_rect(
        s.left,
        s.top,
        s.right.saturating_sub(s.left),
        s.bottom.saturating_sub(s.top),
    );
}

fn in_pass<'p>(
    pass: &'p mut Option<wgpu::RenderPass<'static>>,
    what: &str,
) -> Result<&'p mut wgpu::RenderPass<'static>, BackendError> {
    pass.as_mut()
        .ok_or_else(|| BackendError::InvalidUsage(format!("{what} outside a render pass")))
}

impl Backend for WgpuBackend {
    type Buffer = WgpuBuffer;
    type Pipeline = WgpuPipeline;
    type RootSignature = WgpuRootSignature;
    type Allocator = WgpuAllocator;
    type Fence = WgpuFence;
    type RenderTarget = WgpuRenderTarget;

    fn create_root_signature(&mut self) -> Result<WgpuRootSignature, BackendError> {
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("global_bind_group_layout"),
                entries: &[],
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("global_pipeline_layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("global_bind_group"),
            layout: &layout,
            entries: &[],
        });
        Ok(WgpuRootSignature {
            pipeline_layout,
            bind_group,
        })
    }

    fn create_pipeline_state(
        &mut self,
        desc: &PipelineDescription,
        root: &WgpuRootSignature,
    ) -> Result<WgpuPipeline, BackendError> {
        desc.validate()?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.shader.label),
                source: wgpu::ShaderSource::Wgsl(desc.shader.source.as_str().into()),
            });
        let attributes: Vec<wgpu::VertexAttribute> = desc
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: a.format.into_wgpu(),
                offset: u64::from(a.offset),
                shader_location: a.location,
            })
            .collect();

        let raw = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(&root.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some(&desc.vertex_entry),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: u64::from(desc.vertex_stride),
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(&desc.fragment_entry),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.config.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: desc.topology.into_wgpu(),
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: Default::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::creation("pipeline state", err));
        }

        Ok(WgpuPipeline {
            raw,
            topology: desc.topology,
        })
    }

    fn create_command_allocator(&mut self) -> Result<WgpuAllocator, BackendError> {
        Ok(WgpuAllocator::default())
    }

    fn create_fence(&mut self, initial_value: u64) -> Result<WgpuFence, BackendError> {
        Ok(WgpuFence::new(initial_value))
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> Result<WgpuBuffer, BackendError> {
        if size == 0 {
            return Err(BackendError::InvalidUsage("zero-sized buffer".into()));
        }
        let raw = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match usage {
                BufferUsage::VertexOrConstant => "vertex_buffer",
                BufferUsage::Index => "index_buffer",
                BufferUsage::UploadStaging => "staging_buffer",
            }),
            size: align_copy_size(size),
            usage: usage.into_wgpu(),
            mapped_at_creation: usage == BufferUsage::UploadStaging,
        });
        Ok(WgpuBuffer { raw, size, usage })
    }

    fn write_staging(&mut self, staging: &WgpuBuffer, bytes: &[u8]) -> Result<(), BackendError> {
        if staging.usage != BufferUsage::UploadStaging {
            return Err(BackendError::InvalidUsage("write to a device-local buffer".into()));
        }
        if bytes.len() as u64 > staging.size {
            return Err(BackendError::InvalidUsage(format!(
                "{} bytes do not fit staging buffer of {}",
                bytes.len(),
                staging.size
            )));
        }
        {
            let mut mapped = staging.raw.slice(..).get_mapped_range_mut();
            mapped[..bytes.len()].copy_from_slice(bytes);
        }
        staging.raw.unmap();
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &WgpuBuffer, size: u64) -> Result<Vec<u8>, BackendError> {
        let size = size.min(buffer.size);
        let padded = align_copy_size(size);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(&buffer.raw, 0, &readback, 0, padded);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| BackendError::FenceWait(e.to_string()))?
            .map_err(|e| BackendError::FenceWait(e.to_string()))?;

        let bytes = slice.get_mapped_range()[..size as usize].to_vec();
        readback.unmap();
        Ok(bytes)
    }

    fn reset_allocator(&mut self, _allocator: &mut WgpuAllocator) -> Result<(), BackendError> {
        Ok(())
    }

    fn execute(
        &mut self,
        allocator: &mut WgpuAllocator,
        list: &CommandList<'_, Self>,
    ) -> Result<(), BackendError> {
        if !list.is_closed() {
            return Err(BackendError::InvalidUsage(format!(
                "command list '{}' executed before it was closed",
                list.label()
            )));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(list.label()),
            });
        let mut pass: Option<wgpu::RenderPass<'static>> = None;
        let mut view: Option<wgpu::TextureView> = None;
        let mut bind_group: Option<&wgpu::BindGroup> = None;
        let mut viewport: Option<Viewport> = None;
        let mut scissor: Option<ScissorRect> = None;
        let mut bound_topology: Option<PrimitiveTopology> = None;

        for command in list.commands() {
            match command {
                Command::SetRootSignature(_) => {}
                Command::SetDescriptorTable(root) => {
                    bind_group = Some(&root.bind_group);
                    if let Some(p) = pass.as_mut() {
                        p.set_bind_group(0, &root.bind_group, &[]);
                    }
                }
                Command::SetViewport(v) => {
                    viewport = Some(*v);
                    if let Some(p) = pass.as_mut() {
                        apply_viewport(p, v);
                    }
                }
                Command::SetScissorRect(s) => {
                    scissor = Some(*s);
                    if let Some(p) = pass.as_mut() {
                        apply_scissor(p, s);
                    }
                }
                // wgpu tracks resource states itself; leaving RenderTarget closes the pass.
                Command::Transition {
                    target: BarrierTarget::BackBuffer(_),
                    after: ResourceState::Present,
                    ..
                } => {
                    drop(pass.take());
                }
                Command::Transition { .. } => {}
                Command::SetRenderTarget(target) => {
                    self.check_target(target)?;
                    if view.is_none() {
                        view = Some(self.acquire_view()?);
                    }
                }
                Command::ClearRenderTarget { target, color } => {
                    self.check_target(target)?;
                    let target_view = match view.take() {
                        Some(v) => v,
                        None => self.acquire_view()?,
                    };
                    drop(pass.take());
                    let mut p = begin_pass(
                        &mut encoder,
                        &target_view,
                        wgpu::LoadOp::Clear(color.into_wgpu()),
                    );
                    if let Some(bg) = bind_group {
                        p.set_bind_group(0, bg, &[]);
                    }
                    if let Some(v) = &viewport {
                        apply_viewport(&mut p, v);
                    }
                    if let Some(s) = &scissor {
                        apply_scissor(&mut p, s);
                    }
                    pass = Some(p);
                    view = Some(target_view);
                }
                Command::SetPipelineState(pipeline) => {
                    in_pass(&mut pass, "SetPipelineState")?.set_pipeline(&pipeline.raw);
                    bound_topology = Some(pipeline.topology);
                }
                Command::SetPrimitiveTopology(topology) => {
                    // Topology is baked into the pipeline.
                    if bound_topology.is_some_and(|t| t != *topology) {
                        tracing::warn!(?topology, pipeline = ?bound_topology, "topology differs from pipeline");
                    }
                }
                Command::SetVertexBuffer { buffer, size, .. } => {
                    in_pass(&mut pass, "SetVertexBuffer")?
                        .set_vertex_buffer(0, buffer.raw.slice(..*size));
                }
                Command::SetIndexBuffer {
                    buffer,
                    format,
                    size,
                } => {
                    in_pass(&mut pass, "SetIndexBuffer")?
                        .set_index_buffer(buffer.raw.slice(..*size), format.into_wgpu());
                }
                Command::Draw { vertex_count } => {
                    in_pass(&mut pass, "Draw")?.draw(0..*vertex_count, 0..1);
                }
                Command::DrawIndexed { index_count } => {
                    in_pass(&mut pass, "DrawIndexed")?.draw_indexed(0..*index_count, 0, 0..1);
                }
                Command::CopyBuffer { src, dst, size } => {
                    if *size > src.size || *size > dst.size {
                        return Err(BackendError::InvalidUsage(format!(
                            "copy of {size} bytes overruns its buffers"
                        )));
                    }
                    drop(pass.take());
                    encoder.copy_buffer_to_buffer(&src.raw, 0, &dst.raw, 0, align_copy_size(*size));
                }
            }
        }
        drop(pass);

        self.queue.submit(std::iter::once(encoder.finish()));
        allocator.executed += 1;
        tracing::trace!(
            label = list.label(),
            executed = allocator.executed,
            "command list submitted"
        );
        Ok(())
    }

    fn signal(&mut self, fence: &WgpuFence, value: u64) -> Result<(), BackendError> {
        fence.signal(&self.queue, value);
        Ok(())
    }

    fn completed_value(&mut self, fence: &WgpuFence) -> u64 {
        let _ = self.device.poll(wgpu::Maintain::Poll);
        fence.completed()
    }

    fn wait_for_value(
        &mut self,
        fence: &WgpuFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), BackendError> {
        fence.wait(&self.device, value, timeout)
    }

    fn swap_chain_extent(&self) -> Extent2D {
        Extent2D::new(self.config.width, self.config.height)
    }

    fn current_back_buffer_index(&self) -> usize {
        (self.presented % self.buffer_count as u64) as usize
    }

    fn resize_swap_chain(
        &mut self,
        buffer_count: usize,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        // An acquired but unpresented texture would pin the old surface size.
        self.frame = None;
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
        self.buffer_count = buffer_count.max(1);
        self.presented = 0;
        self.generation += 1;
        Ok(())
    }

    fn create_render_target(&mut self, index: usize) -> Result<WgpuRenderTarget, BackendError> {
        if index >= self.buffer_count {
            return Err(BackendError::InvalidUsage(format!(
                "back buffer {index} does not exist"
            )));
        }
        Ok(WgpuRenderTarget {
            index,
            generation: self.generation,
        })
    }

    fn present(&mut self) -> Result<(), BackendError> {
        if let Some(frame) = self.frame.take() {
            self.window.pre_present_notify();
            frame.present();
        }
        self.presented += 1;
        Ok(())
    }

    fn fullscreen_state(&self) -> Result<bool, BackendError> {
        Ok(self.window.fullscreen().is_some())
    }

    fn set_fullscreen_state(&mut self, fullscreen: bool) -> Result<(), BackendError> {
        if fullscreen {
            let monitor = self
                .window
                .current_monitor()
                .ok_or_else(|| BackendError::Fullscreen("window has no current monitor".into()))?;
            self.window
                .set_fullscreen(Some(Fullscreen::Borderless(Some(monitor))));
        } else {
            self.window.set_fullscreen(None);
        }
        Ok(())
    }
}
