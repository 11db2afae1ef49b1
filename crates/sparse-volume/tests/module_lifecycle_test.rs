//! Process-wide module lifecycle.
//!
//! All checks live in one test function because the module is process-wide
//! state shared by every test in this binary.

use std::sync::Arc;

use sparse_volume::*;

#[test]
fn test_module_lifecycle() {
    init_logging();

    // Before startup: try_* report the misuse, plain accessors panic
    {
        assert!(!module::is_module_started());
        assert!(matches!(
            try_render_extension(),
            Err(VolumeError::NotInitialized)
        ));
        assert!(matches!(
            try_research_render_extension(),
            Err(VolumeError::NotInitialized)
        ));
        assert!(std::panic::catch_unwind(render_extension).is_err());
        assert!(std::panic::catch_unwind(research_render_extension).is_err());

        let (_sender, receiver) = command_queue();
        assert!(matches!(
            RenderScene::from_module(receiver, host_allocator(1024)),
            Err(VolumeError::NotInitialized)
        ));

        // Shutdown before startup is harmless
        shutdown_module();
    }

    // Startup, then a shutdown that never created an extension
    {
        startup_module(VolumeRenderOptions::default()).unwrap();
        assert!(matches!(
            startup_module(VolumeRenderOptions::default()),
            Err(VolumeError::AlreadyInitialized)
        ));
        let has_handler = module::try_with_module(|m| {
            m.track_handlers().contains(SequenceTrackHandler::TRACK_NAME)
        })
        .unwrap();
        assert!(has_handler);
        assert!(!module::try_with_module(|m| m.has_render_extension()).unwrap());
        shutdown_module();
        assert!(!module::is_module_started());
    }

    // Lazy creation is idempotent and init runs once
    {
        startup_module(VolumeRenderOptions {
            max_ray_steps: 128,
            ..Default::default()
        })
        .unwrap();
        let first = render_extension();
        let second = render_extension();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.read().unwrap().init_count(), 1);
        assert_eq!(first.read().unwrap().max_ray_steps(), 128);
        assert_eq!(first.read().unwrap().state(), ExtensionState::Initialized);

        let research = research_render_extension();
        assert!(Arc::ptr_eq(&research, &try_research_render_extension().unwrap()));
        assert_eq!(research.read().unwrap().init_count(), 1);

        // A scene built from the module draws through the shared extensions
        let (sender, receiver) = command_queue();
        let mut scene = RenderScene::from_module(receiver, host_allocator(1 << 20)).unwrap();
        assert!(Arc::ptr_eq(scene.extension(), &first));
        let mut volume = VolumeComponent::new(
            sender,
            ProxyDesc {
                transform: VolumeTransform::from_dims(UVec3::splat(2)),
                ..Default::default()
            },
        );
        volume.register().unwrap();
        volume
            .upload_grid(VoxelPayload::from_f32(UVec3::splat(2), &[1.0; 8]).unwrap())
            .unwrap();
        let view = SceneView::new(
            ViewId(0),
            Mat4::look_at_rh(Vec3::new(1.0, 1.0, 6.0), Vec3::ONE, Vec3::Y),
            Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0),
        );
        let frame = scene.render_frame(&[view.clone()]).unwrap();
        assert_eq!(frame.main.element_count(), 1);
        assert_eq!(first.read().unwrap().frames_rendered(), 1);

        // Shutdown releases both; the scene can no longer render
        shutdown_module();
        assert_eq!(first.read().unwrap().state(), ExtensionState::Released);
        assert_eq!(research.read().unwrap().state(), ExtensionState::Released);
        assert!(scene.render_frame(&[view]).is_err());
        drop(volume);
        drop(scene);
    }

    // The module can be started again with fresh extensions
    {
        startup_module(VolumeRenderOptions::default()).unwrap();
        let fresh = render_extension();
        assert_eq!(fresh.read().unwrap().state(), ExtensionState::Initialized);
        assert_eq!(fresh.read().unwrap().init_count(), 1);
        shutdown_module();
        shutdown_module();
    }
}
