//! wgpu backend: pipelines per shader permutation and frame encoding.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::buffer::{BufferStorage, RenderBufferPool};
use crate::collector::FramePacket;
use crate::error::{RenderError, RenderResult};
use crate::research::ResearchFramePacket;
use crate::shader::{ShaderPermutation, ShaderSourceMap};

/// Vertices of the proxy box drawn per volume.
const BOX_VERTEX_COUNT: u32 = 36;

/// Attachments one view of a frame is drawn into.
#[derive(Debug, Clone, Copy)]
pub struct ViewTarget<'a> {
    /// Color attachment, loaded and blended over.
    pub color: &'a wgpu::TextureView,
    /// Scene depth with `TEXTURE_BINDING` usage, sampled to stop the march.
    pub depth: &'a wgpu::TextureView,
}

fn target_for<'a>(targets: &[Option<ViewTarget<'a>>], view_index: usize) -> Option<ViewTarget<'a>> {
    targets.get(view_index).copied().flatten()
}

/// A device and queue.
pub struct GpuContext {
    /// The wgpu device.
    pub device: Arc<wgpu::Device>,
    /// The wgpu queue.
    pub queue: Arc<wgpu::Queue>,
    /// Adapter description for logging.
    pub adapter_info: wgpu::AdapterInfo,
}

/// Requests a device without a surface.
pub async fn request_headless_device() -> RenderResult<GpuContext> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|_| RenderError::AdapterCreationFailed)?;

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("sparse-volume device (headless)"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        })
        .await?;

    let adapter_info = adapter.get_info();
    log::info!(
        "headless device on {} ({:?})",
        adapter_info.name,
        adapter_info.backend
    );
    Ok(GpuContext {
        device: Arc::new(device),
        queue: Arc::new(queue),
        adapter_info,
    })
}

/// Blocking variant of [`request_headless_device`].
pub fn new_headless_device() -> RenderResult<GpuContext> {
    pollster::block_on(request_headless_device())
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn voxel_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Draws volume frames with wgpu.
pub struct VolumeRenderer {
    view_layout: wgpu::BindGroupLayout,
    proxy_layout: wgpu::BindGroupLayout,
    research_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<ShaderPermutation, wgpu::RenderPipeline>,
    color_format: wgpu::TextureFormat,
}

impl VolumeRenderer {
    /// Creates bind group layouts and one pipeline per permutation.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ShaderCompilationFailed`] if a permutation fails
    /// validation.
    pub fn new(
        device: &wgpu::Device,
        shaders: &ShaderSourceMap,
        color_format: wgpu::TextureFormat,
    ) -> RenderResult<Self> {
        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VDB View Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                // Scene depth for compositing against opaque geometry
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let proxy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VDB Proxy Bind Group Layout"),
            entries: &[uniform_entry(0), voxel_entry(1)],
        });
        let research_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VDB Research Bind Group Layout"),
            entries: &[uniform_entry(0), voxel_entry(1)],
        });

        let standard_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VDB Pipeline Layout"),
            bind_group_layouts: &[&view_layout, &proxy_layout],
            push_constant_ranges: &[],
        });
        let research_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("VDB Research Pipeline Layout"),
                bind_group_layouts: &[&research_layout],
                push_constant_ranges: &[],
            });

        let mut pipelines = HashMap::new();
        for permutation in ShaderPermutation::STANDARD {
            let pipeline = Self::create_pipeline(
                device,
                shaders,
                permutation,
                &standard_layout,
                color_format,
            )?;
            pipelines.insert(permutation, pipeline);
        }
        let research = Self::create_pipeline(
            device,
            shaders,
            ShaderPermutation::Research,
            &research_pipeline_layout,
            color_format,
        )?;
        pipelines.insert(ShaderPermutation::Research, research);

        Ok(Self {
            view_layout,
            proxy_layout,
            research_layout,
            pipelines,
            color_format,
        })
    }

    fn create_pipeline(
        device: &wgpu::Device,
        shaders: &ShaderSourceMap,
        permutation: ShaderPermutation,
        layout: &wgpu::PipelineLayout,
        color_format: wgpu::TextureFormat,
    ) -> RenderResult<wgpu::RenderPipeline> {
        let builder = shaders.builder_for(permutation);
        let label = permutation.descriptor().label;

        // Fail on missing stages before opening the error scope
        builder.combined_source()?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = builder.build_module(device)?;
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some(builder.vertex_entry()),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some(builder.fragment_entry()),
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                // Back faces, so the box still rasterizes with the camera inside it
                cull_mode: Some(wgpu::Face::Front),
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::ShaderCompilationFailed(format!("{label}: {err}")));
        }
        Ok(pipeline)
    }

    /// Color format the pipelines target.
    #[must_use]
    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    /// Returns the pipeline of a permutation.
    #[must_use]
    pub fn pipeline(&self, permutation: ShaderPermutation) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&permutation)
    }

    /// Encodes one pass per view of a main-extension frame.
    ///
    /// `targets[i]` receives the draws of `frame.views[i]`; views without a
    /// target are not encoded. Elements whose buffer is not device-resident
    /// are skipped. Returns the number of draws encoded.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FramePacket,
        pool: &RenderBufferPool,
        targets: &[Option<ViewTarget<'_>>],
    ) -> usize {
        let mut draws = 0;
        for (view_index, view) in frame.views.iter().enumerate() {
            if view.elements.is_empty() {
                continue;
            }
            let Some(target) = target_for(targets, view_index) else {
                continue;
            };
            let view_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("VDB View Uniforms"),
                contents: bytemuck::bytes_of(&view.uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let view_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("VDB View Bind Group"),
                layout: &self.view_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: view_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(target.depth),
                    },
                ],
            });

            let proxy_groups: Vec<_> = view
                .elements
                .iter()
                .filter_map(|element| {
                    let voxels = device_buffer(pool, element.render_buffer)?;
                    let pipeline = self.pipelines.get(&element.permutation)?;
                    let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("VDB Proxy Uniforms"),
                        contents: bytemuck::bytes_of(&element.uniforms),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                    let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("VDB Proxy Bind Group"),
                        layout: &self.proxy_layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: uniforms.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: voxels.as_entire_binding(),
                            },
                        ],
                    });
                    Some((pipeline, group))
                })
                .collect();

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("VDB Volume Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });
            render_pass.set_bind_group(0, &view_group, &[]);
            for (pipeline, group) in &proxy_groups {
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(1, group, &[]);
                render_pass.draw(0..BOX_VERTEX_COUNT, 0..1);
                draws += 1;
            }
        }
        draws
    }

    /// Encodes one research pass per view that has draws and a target.
    /// Returns the number of draws.
    pub fn encode_research(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        frame: &ResearchFramePacket,
        pool: &RenderBufferPool,
        targets: &[Option<ViewTarget<'_>>],
    ) -> usize {
        let Some(pipeline) = self.pipelines.get(&ShaderPermutation::Research) else {
            return 0;
        };
        let mut draws = 0;
        for view_index in 0..frame.views.len() {
            let Some(target) = target_for(targets, view_index) else {
                continue;
            };
            let groups: Vec<_> = frame
                .elements_for_view(view_index)
                .filter_map(|element| {
                    let voxels = device_buffer(pool, element.render_buffer)?;
                    let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("VDB Research Params"),
                        contents: bytemuck::bytes_of(&element.params),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                    Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("VDB Research Bind Group"),
                        layout: &self.research_layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: params.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: voxels.as_entire_binding(),
                            },
                        ],
                    }))
                })
                .collect();
            if groups.is_empty() {
                continue;
            }

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("VDB Research Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });
            render_pass.set_pipeline(pipeline);
            for group in &groups {
                render_pass.set_bind_group(0, group, &[]);
                render_pass.draw(0..BOX_VERTEX_COUNT, 0..1);
            }
            draws += groups.len();
        }
        draws
    }
}

fn device_buffer(
    pool: &RenderBufferPool,
    id: sparse_volume_core::RenderBufferId,
) -> Option<&wgpu::Buffer> {
    pool.get(id)
        .and_then(|buffer| buffer.storage())
        .and_then(BufferStorage::as_wgpu)
}
