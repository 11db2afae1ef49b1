//! Demo: an animated fog volume driven by a render thread.
//!
//! Builds a short sequence of spherical density grids, plays it through the
//! volume track handler and prints the per-frame draw statistics. With a GPU
//! available the last frame is also rendered offscreen.

use sparse_volume::*;

const DIMS: UVec3 = UVec3::splat(16);

fn sphere_density(radius: f32) -> Vec<f32> {
    let center = DIMS.as_vec3() * 0.5;
    let mut values = Vec::with_capacity(voxel_len());
    for z in 0..DIMS.z {
        for y in 0..DIMS.y {
            for x in 0..DIMS.x {
                let p = UVec3::new(x, y, z).as_vec3() + 0.5;
                let d = (p - center).length();
                values.push((1.0 - d / radius).clamp(0.0, 1.0));
            }
        }
    }
    values
}

fn voxel_len() -> usize {
    (DIMS.x * DIMS.y * DIMS.z) as usize
}

fn main() -> Result<()> {
    init_logging();
    startup_module(VolumeRenderOptions::default())?;

    let (sender, receiver) = command_queue();
    let scene = RenderScene::from_module(receiver, host_allocator(64 << 20))?;
    let thread = RenderThread::spawn(scene)?;

    let frames = (0..8)
        .map(|i| pack_half_payload(DIMS, &sphere_density(3.0 + i as f32)))
        .collect::<Result<Vec<_>>>()?;
    let desc = ProxyDesc {
        transform: VolumeTransform::from_dims(DIMS),
        params: RenderParameters::new(1.0, 0.5, ShadingMode::FogVolume, MaterialDesc::default())?,
        ..Default::default()
    };
    let mut sequence = VolumeSequence::new("pulse", sender, desc, frames, 8.0)?;
    let track = SequenceTrackHandler;

    let view = SceneView::new(
        ViewId(0),
        Mat4::look_at_rh(Vec3::new(8.0, 30.0, -8.0), Vec3::new(8.0, 8.0, -8.0), Vec3::Z),
        Mat4::perspective_rh(50f32.to_radians(), 16.0 / 9.0, 0.1, 200.0),
    )
    .with_viewport(1280, 720);

    for step in 0..16 {
        let time = step as f32 / 16.0;
        let changed = track.evaluate(&mut sequence, time)?;
        let frame = thread.render_blocking(vec![view.clone()])?;
        println!(
            "t={time:.3}s frame {} (grid {:?}{}): {} draws, {} visible, {} skipped",
            frame.frame,
            sequence.current_frame(),
            if changed { ", uploaded" } else { "" },
            frame.draw_count(),
            frame.main.stats.visible_proxies,
            frame.skipped_missing_buffer(),
        );
    }

    let scene = thread.shutdown()?;
    println!(
        "{} buffers live, {} destroyed after {} frames",
        scene.pool().len(),
        scene.pool().destroyed_count(),
        scene.frame()
    );
    drop(scene);
    drop(sequence);

    render_offscreen(&view)?;
    shutdown_module();
    Ok(())
}

/// Renders one frame on the GPU, if there is one.
fn render_offscreen(view: &SceneView) -> Result<()> {
    let shaders = module::try_with_module(|m| m.shader_sources().clone())?;
    let renderer = match HeadlessVolumeRenderer::new(320, 180, &shaders) {
        Ok(renderer) => renderer,
        Err(e) => {
            println!("no GPU adapter, skipping offscreen render ({e})");
            return Ok(());
        }
    };

    let (sender, receiver) = command_queue();
    let mut scene = RenderScene::from_module(receiver, renderer.allocator())?;
    let mut volume = VolumeComponent::new(
        sender,
        ProxyDesc {
            transform: VolumeTransform::from_dims(DIMS),
            local_to_world: sequence_default_transform(),
            ..Default::default()
        },
    );
    volume.register()?;
    volume.upload_grid(pack_half_payload(DIMS, &sphere_density(7.0))?)?;

    scene.begin_frame();
    let frame = scene.render(std::slice::from_ref(view))?;
    let pixels = renderer.draw(&frame, scene.pool())?;
    scene.end_frame();

    let covered = pixels.chunks(4).filter(|px| px[3] > 0).count();
    println!(
        "offscreen on {}: {covered} of {} pixels covered",
        renderer.adapter_info().name,
        pixels.len() / 4
    );
    Ok(())
}
