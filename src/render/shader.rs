use anyhow::Context;
use bytemuck::{Pod, Zeroable};

use super::background::Background;
use super::composite::over_in_place;
use super::geometry::BarGeometry;
use super::text::TextLayer;
use super::{check_levels, segment_palette, FrameProducer, RenderAssets, RenderedFrame};
use crate::audio::BarLevels;
use crate::config::{Layout, VisualizerConfig};
use crate::error::{BarwaveError, BarwaveResult};

const SHADER_SOURCE: &str = include_str!("../../shaders/segments.wgsl");
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SegmentParams {
    resolution: [f32; 2],
    origin_x: f32,
    baseline_y: f32,
    bar_width: f32,
    bar_gap: f32,
    segment_height: f32,
    segment_gap: f32,
    corner_radius: f32,
    bar_count: u32,
    segments: u32,
    static_bottom: u32,
    has_peaks: u32,
    _padding: [u32; 3],
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    fn new() -> anyhow::Result<Self> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::METAL | wgpu::Backends::VULKAN | wgpu::Backends::DX12,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to find a suitable GPU adapter")?;

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("barwave_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    ..Default::default()
                },
                None,
            )
            .await
            .context("Failed to create GPU device")?;

        Ok(Self { device, queue })
    }
}

/// GPU backend: one fullscreen pass evaluates every segment per pixel, the
/// result is read back and composited over the background and text on the CPU.
/// Linear layout only.
pub struct ShaderRenderer {
    gpu: GpuContext,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    levels_buffer: wgpu::Buffer,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    geometry: BarGeometry,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
    background: Background,
    text: TextLayer,
}

impl ShaderRenderer {
    pub fn new(
        cfg: &VisualizerConfig,
        geometry: BarGeometry,
        assets: RenderAssets,
    ) -> BarwaveResult<Self> {
        if geometry.layout != Layout::Linear {
            return Err(BarwaveError::render_config(
                "the shader renderer supports only the linear layout",
            ));
        }
        let gpu = GpuContext::new()?;
        let device = &gpu.device;
        let (width, height) = (cfg.output.width, cfg.output.height);

        let params = SegmentParams {
            resolution: [width as f32, height as f32],
            origin_x: geometry.origin_x,
            baseline_y: geometry.baseline_y,
            bar_width: geometry.bar_width,
            bar_gap: geometry.bar_gap,
            segment_height: geometry.segment_height,
            segment_gap: geometry.segment_gap,
            corner_radius: geometry.corner_radius,
            bar_count: geometry.bar_count as u32,
            segments: geometry.segments_per_bar as u32,
            static_bottom: geometry.static_bottom_segment as u32,
            has_peaks: u32::from(cfg.envelope.peak_hold.enabled),
            _padding: [0; 3],
        };
        let mut colors: Vec<[f32; 4]> = segment_palette(cfg, geometry.segments_per_bar)
            .into_iter()
            .map(unit_color)
            .collect();
        colors.push(unit_color(cfg.colors.peak.to_array()));

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segment_params"),
            size: std::mem::size_of::<SegmentParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let levels_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bar_levels"),
            size: (geometry.bar_count * 2 * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let colors_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segment_colors"),
            size: (colors.len() * std::mem::size_of::<[f32; 4]>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        gpu.queue.write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));
        gpu.queue.write_buffer(&colors_buffer, 0, bytemuck::cast_slice(&colors));

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("segments_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });
        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("segments_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1),
                storage_entry(2),
            ],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("segments_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: levels_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: colors_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("segments_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("segments_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("segments_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = (width * 4).div_ceil(align) * align;
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("segments_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            gpu,
            pipeline,
            bind_group,
            levels_buffer,
            target,
            target_view,
            readback,
            geometry,
            width,
            height,
            padded_bytes_per_row,
            background: assets.background,
            text: assets.text,
        })
    }

    fn draw_segments(&self) -> BarwaveResult<Vec<u8>> {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("segments_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("segments_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BarwaveError::internal(format!("gpu readback channel closed: {e}")))?
            .map_err(|e| BarwaveError::internal(format!("gpu readback failed: {e}")))?;

        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        {
            let data = slice.get_mapped_range();
            for row in 0..self.height as usize {
                let start = row * self.padded_bytes_per_row as usize;
                pixels.extend_from_slice(&data[start..start + row_bytes]);
            }
        }
        self.readback.unmap();
        Ok(pixels)
    }
}

impl FrameProducer for ShaderRenderer {
    fn name(&self) -> &'static str {
        "shader"
    }

    fn render(&mut self, levels: &BarLevels) -> BarwaveResult<RenderedFrame> {
        check_levels(levels, &self.geometry)?;
        let mut packed = levels.heights.clone();
        match &levels.peaks {
            Some(peaks) => packed.extend_from_slice(peaks),
            // A zero peak never draws a marker.
            None => packed.resize(levels.heights.len() * 2, 0.0),
        }
        self.gpu
            .queue
            .write_buffer(&self.levels_buffer, 0, bytemuck::cast_slice(&packed));
        let bars = self.draw_segments()?;
        let mut frame = self.background.frame(self.width, self.height)?;
        over_in_place(&mut frame.data, &bars)?;
        self.text.composite(&mut frame);
        Ok(frame)
    }
}

fn unit_color(c: [u8; 4]) -> [f32; 4] {
    c.map(|v| v as f32 / 255.0)
}
