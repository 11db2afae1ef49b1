//! Offscreen rendering of volume frames.
//!
//! [`HeadlessVolumeRenderer`] owns a device without a surface, an RGBA color
//! target and a scene depth texture. It draws the [`SceneFrame`]s produced by
//! a [`RenderScene`](crate::RenderScene) and reads the pixels back. Useful for
//! integration tests and batch renders.

use std::sync::Arc;

use sparse_volume_render::{
    new_headless_device, GpuContext, RenderBufferPool, ShaderSourceMap, ViewTarget,
    VolumeRenderer, WgpuAllocator,
};

use crate::scene::SceneFrame;
use crate::{BufferAllocator, Result, VolumeError};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Draws volume frames into an offscreen texture.
pub struct HeadlessVolumeRenderer {
    gpu: GpuContext,
    renderer: VolumeRenderer,
    width: u32,
    height: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    readback: wgpu::Buffer,
}

impl HeadlessVolumeRenderer {
    /// Creates a device and a `width` x `height` target.
    ///
    /// # Errors
    ///
    /// Fails when no adapter is available or a shader permutation does not
    /// compile.
    pub fn new(width: u32, height: u32, shaders: &ShaderSourceMap) -> Result<Self> {
        let gpu = new_headless_device()?;
        let renderer = VolumeRenderer::new(&gpu.device, shaders, COLOR_FORMAT)?;
        let width = width.max(1);
        let height = height.max(1);

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("headless volume color"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("headless scene depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("headless volume readback"),
            size: u64::from(aligned_bytes_per_row(width) * height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            gpu,
            renderer,
            width,
            height,
            color,
            color_view,
            depth_view,
            readback,
        })
    }

    /// Allocator placing render buffers on this renderer's device.
    #[must_use]
    pub fn allocator(&self) -> Arc<dyn BufferAllocator> {
        Arc::new(WgpuAllocator::new(
            Arc::clone(&self.gpu.device),
            Arc::clone(&self.gpu.queue),
        ))
    }

    /// Target size in pixels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Adapter the device runs on.
    #[must_use]
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.gpu.adapter_info
    }

    /// Draws the first view of `frame`. See [`draw_view`](Self::draw_view).
    ///
    /// # Errors
    ///
    /// Fails if the readback buffer cannot be mapped.
    pub fn draw(&self, frame: &SceneFrame, pool: &RenderBufferPool) -> Result<Vec<u8>> {
        self.draw_view(frame, pool, 0)
    }

    /// Clears the target, draws the view at `view_index` of `frame` and
    /// returns tightly packed RGBA8 pixels. Draws of other views are ignored.
    ///
    /// The scene depth is cleared to the far plane, so nothing occludes the
    /// volumes.
    ///
    /// # Errors
    ///
    /// Fails if the readback buffer cannot be mapped.
    pub fn draw_view(
        &self,
        frame: &SceneFrame,
        pool: &RenderBufferPool,
        view_index: usize,
    ) -> Result<Vec<u8>> {
        let device = &self.gpu.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("headless volume encoder"),
        });

        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("headless clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
        }

        let view_count = frame.main.views.len().max(frame.research.views.len());
        let mut targets = vec![None; view_count];
        if let Some(target) = targets.get_mut(view_index) {
            *target = Some(ViewTarget {
                color: &self.color_view,
                depth: &self.depth_view,
            });
        }
        let draws = self
            .renderer
            .encode(device, &mut encoder, &frame.main, pool, &targets)
            + self
                .renderer
                .encode_research(device, &mut encoder, &frame.research, pool, &targets);
        log::debug!(
            "frame {} view {view_index}: encoded {draws} volume draws",
            frame.frame
        );

        let bytes_per_row = aligned_bytes_per_row(self.width);
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
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
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::PollType::wait_indefinitely());
        rx.recv()
            .map_err(|_| VolumeError::RenderError("readback callback dropped".to_string()))?
            .map_err(|e| VolumeError::RenderError(format!("readback map failed: {e}")))?;

        // Strip row padding
        let data = slice.get_mapped_range();
        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height {
            let start = (row * bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }
        drop(data);
        self.readback.unmap();

        Ok(pixels)
    }
}

impl std::fmt::Debug for HeadlessVolumeRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessVolumeRenderer")
            .field("adapter", &self.gpu.adapter_info.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

fn aligned_bytes_per_row(width: u32) -> u32 {
    let unaligned = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}
