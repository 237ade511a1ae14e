//! Integration tests for the frame pipeline on the headless backend.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::{Mat4, Vec3, Vec4};

use inflight_core::RendererConfig;
use inflight_renderer::{
    FrameRenderer, InstanceData, MaterialConstants, PipelineSet, SlotState,
};
use inflight_rhi::{CommandList, RhiError};
use inflight_rhi::headless::{
    self, CompletionPolicy, HeadlessDevice, HeadlessMesh, HeadlessPipeline, RecordedCommand,
};
use inflight_scene::{
    DrawArgs, Instance, ItemId, MaterialDesc, PassInput, RenderItemDesc, RenderItemRegistry,
    RenderLayer,
};

fn config() -> RendererConfig {
    RendererConfig {
        frames_in_flight: 3,
        max_objects: 16,
        max_materials: 8,
        max_instances: 64,
        ..Default::default()
    }
}

fn pipelines() -> PipelineSet<HeadlessPipeline> {
    PipelineSet {
        opaque: HeadlessPipeline::new("opaque"),
        opaque_wireframe: HeadlessPipeline::new("opaque_wireframe"),
        transparent: HeadlessPipeline::new("transparent"),
    }
}

fn box_draw() -> DrawArgs {
    DrawArgs {
        index_count: 36,
        start_index: 0,
        base_vertex: 0,
    }
}

/// Renderer with one mesh and a registry holding a single opaque box.
fn scene(
    policy: CompletionPolicy,
    config: &RendererConfig,
) -> (FrameRenderer<HeadlessDevice>, RenderItemRegistry, ItemId) {
    let context = headless::context(policy);
    let mut renderer = FrameRenderer::new(context, config, Some(pipelines())).unwrap();
    let mesh = renderer.register_mesh(HeadlessMesh::new("box", 24, 36));

    let mut registry = renderer.create_registry();
    let material = registry.add_material(MaterialDesc::default()).unwrap();
    let item = registry
        .add_item(RenderItemDesc::new(mesh, material, box_draw()))
        .unwrap();
    (renderer, registry, item)
}

fn run_frame(
    renderer: &mut FrameRenderer<HeadlessDevice>,
    registry: &mut RenderItemRegistry,
) -> u64 {
    let token = renderer
        .prepare_frame(registry, &PassInput::default())
        .unwrap();
    renderer.submit_frame(token, registry).unwrap()
}

/// World matrix of `item` as stored in every frame resource.
fn uploaded_worlds(
    renderer: &FrameRenderer<HeadlessDevice>,
    registry: &RenderItemRegistry,
    item: ItemId,
) -> Vec<Mat4> {
    let slot = registry.item(item).object_slot();
    renderer
        .ring()
        .slots()
        .map(|frame| frame.buffers().objects.read(slot).world)
        .collect()
}

#[test]
fn test_slot_not_reused_before_fence() {
    let (mut renderer, mut registry, _) = scene(CompletionPolicy::Manual, &config());
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    let queue = Arc::clone(renderer.context().queue());
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        queue.complete_through(1);
    });

    let start = Instant::now();
    let token = renderer
        .prepare_frame(&mut registry, &PassInput::default())
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(25));
    assert_eq!(token.slot(), 0);
    assert!(renderer.fence().completed_value().unwrap() >= 1);
    renderer.submit_frame(token, &registry).unwrap();
    completer.join().unwrap();

    renderer.context().queue().complete_all();
}

#[test]
fn test_acquired_slot_fence_always_complete() {
    let (mut renderer, mut registry, item) = scene(
        CompletionPolicy::Worker {
            latency: Duration::from_millis(2),
        },
        &config(),
    );

    for frame in 0..30 {
        registry.set_world(item, Mat4::from_rotation_y(frame as f32 * 0.1));
        let token = renderer
            .prepare_frame(&mut registry, &PassInput::default())
            .unwrap();
        let stamped = renderer.ring().slot(token.slot()).fence();
        assert!(renderer.fence().completed_value().unwrap() >= stamped);
        renderer.submit_frame(token, &registry).unwrap();
    }
    renderer.wait_for_gpu_idle().unwrap();
}

#[test]
fn test_change_reaches_every_frame_resource() {
    let (mut renderer, mut registry, item) = scene(CompletionPolicy::Immediate, &config());
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }
    assert!(registry.is_settled());

    let moved = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
    registry.set_world(item, moved);

    run_frame(&mut renderer, &mut registry);
    let worlds = uploaded_worlds(&renderer, &registry, item);
    assert_eq!(worlds.iter().filter(|w| **w == moved).count(), 1);
    assert_eq!(registry.item(item).window().remaining(), 2);

    run_frame(&mut renderer, &mut registry);
    run_frame(&mut renderer, &mut registry);
    assert!(
        uploaded_worlds(&renderer, &registry, item)
            .iter()
            .all(|w| *w == moved)
    );
    assert_eq!(registry.item(item).window().remaining(), 0);
}

#[test]
fn test_redirty_restarts_window() {
    let (mut renderer, mut registry, item) = scene(CompletionPolicy::Immediate, &config());
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    let first = Mat4::from_translation(Vec3::X);
    let second = Mat4::from_translation(Vec3::Z);

    registry.set_world(item, first);
    run_frame(&mut renderer, &mut registry);
    assert_eq!(registry.item(item).window().remaining(), 2);

    registry.set_world(item, second);
    assert_eq!(registry.item(item).window().remaining(), 3);

    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }
    let worlds = uploaded_worlds(&renderer, &registry, item);
    assert!(worlds.iter().all(|w| *w == second));
    assert!(worlds.iter().all(|w| *w != first));
    assert!(registry.is_settled());
}

#[test]
fn test_upload_bytes_match_records() {
    let (mut renderer, mut registry, first) = scene(CompletionPolicy::Immediate, &config());
    let mesh = registry.item(first).mesh();
    let material = registry
        .add_material(MaterialDesc {
            name: "glass".to_string(),
            diffuse_albedo: Vec4::new(0.2, 0.4, 0.8, 0.5),
            fresnel_r0: Vec3::splat(0.1),
            roughness: 0.05,
            ..Default::default()
        })
        .unwrap();
    let instances = vec![
        Instance::new(Mat4::from_translation(Vec3::new(-2.0, 0.0, 0.0)), material),
        Instance::new(Mat4::from_scale(Vec3::splat(3.0)), material),
    ];
    let item = registry
        .add_item(RenderItemDesc::new(mesh, material, box_draw()).with_instances(instances))
        .unwrap();

    let token = renderer
        .prepare_frame(&mut registry, &PassInput::default())
        .unwrap();
    let buffers = renderer.ring().slot(token.slot()).buffers();

    // Constant-buffer layout: 256-byte stride, record at the start of the slot.
    let expected = MaterialConstants::from(registry.material(material));
    let slot = registry.material(material).slot();
    assert_eq!(
        buffers.materials.element_bytes(slot),
        bytemuck::bytes_of(&expected)
    );
    assert_eq!(
        buffers.materials.slot(slot).address().get() - buffers.materials.base_address().get(),
        slot as u64 * 256
    );

    // Structured layout: tightly packed records.
    let base = registry.item(item).instance_base();
    for (offset, instance) in registry.item(item).instances().iter().enumerate() {
        let expected = InstanceData::from(instance);
        assert_eq!(
            buffers.instances.element_bytes(base + offset),
            bytemuck::bytes_of(&expected)
        );
    }

    renderer.submit_frame(token, &registry).unwrap();
}

#[test]
fn test_wait_for_gpu_idle_twice() {
    let (mut renderer, mut registry, _) = scene(
        CompletionPolicy::Worker {
            latency: Duration::from_millis(10),
        },
        &config(),
    );
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    renderer.wait_for_gpu_idle().unwrap();
    let waits = renderer.context().device().blocking_waits();
    assert_eq!(renderer.ring().in_flight(), 0);

    renderer.wait_for_gpu_idle().unwrap();
    assert_eq!(renderer.context().device().blocking_waits(), waits);
}

#[test]
fn test_three_frames_fill_every_slot() {
    let (mut renderer, mut registry, item) = scene(CompletionPolicy::Immediate, &config());
    let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
    registry.set_world(item, world);

    let fences: Vec<u64> = (0..3)
        .map(|_| run_frame(&mut renderer, &mut registry))
        .collect();
    assert_eq!(fences, vec![1, 2, 3]);

    assert!(
        uploaded_worlds(&renderer, &registry, item)
            .iter()
            .all(|w| *w == world)
    );
    assert_eq!(registry.item(item).window().remaining(), 0);
    assert_eq!(renderer.stats().items_uploaded, 3);
    assert_eq!(renderer.stats().last_draws, 1);

    let executed = renderer.context().queue().last_executed().unwrap();
    assert_eq!(executed.draw_count(), 1);
    assert_eq!(executed.signalled_at, Some(3));
}

#[test]
fn test_hung_fence_times_out() {
    let config = RendererConfig {
        fence_timeout_ms: 50,
        ..config()
    };
    let (mut renderer, mut registry, _) = scene(CompletionPolicy::Manual, &config);
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    let result = renderer.prepare_frame(&mut registry, &PassInput::default());
    assert!(matches!(
        result,
        Err(RhiError::FenceTimeout {
            target: 1,
            completed: 0
        })
    ));
    assert!(renderer.has_failed());
    assert_eq!(renderer.ring().slot(0).state(), SlotState::Submitted);

    // Stopped for good, even once the GPU catches up.
    renderer.context().queue().complete_all();
    assert!(matches!(
        renderer.prepare_frame(&mut registry, &PassInput::default()),
        Err(RhiError::DeviceLost(_))
    ));
}

#[test]
fn test_drop_after_timeout_waits_for_gpu() {
    let config = RendererConfig {
        fence_timeout_ms: 50,
        ..config()
    };
    let (mut renderer, mut registry, _) = scene(CompletionPolicy::Manual, &config);
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }
    assert!(renderer.prepare_frame(&mut registry, &PassInput::default()).is_err());
    assert!(renderer.has_failed());

    let device = Arc::clone(renderer.context().device());
    let waits = device.blocking_waits();
    let start = Instant::now();
    drop(renderer);

    // The drain blocked once and gave up after the fence timeout.
    assert_eq!(device.blocking_waits(), waits + 1);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_drop_after_device_loss_skips_drain() {
    let (mut renderer, mut registry, _) = scene(CompletionPolicy::Manual, &config());
    run_frame(&mut renderer, &mut registry);
    renderer.context().queue().inject_device_loss();
    assert!(renderer.wait_for_gpu_idle().is_err());

    let device = Arc::clone(renderer.context().device());
    let waits = device.blocking_waits();
    drop(renderer);
    assert_eq!(device.blocking_waits(), waits);
}

#[test]
fn test_submission_order() {
    let (mut renderer, mut registry, item) = scene(CompletionPolicy::Immediate, &config());
    let opaque = registry.item(item);
    let desc = RenderItemDesc::new(opaque.mesh(), opaque.material(), box_draw())
        .with_layer(RenderLayer::Transparent);
    registry.add_item(desc).unwrap();

    let overlay = HeadlessPipeline::new("overlay");
    let token = renderer
        .prepare_frame(&mut registry, &PassInput::default())
        .unwrap();
    renderer
        .submit_frame_with(token, &registry, |list| list.set_pipeline(&overlay))
        .unwrap();

    let executed = renderer.context().queue().last_executed().unwrap();
    assert_eq!(
        executed.pipelines(),
        vec!["opaque", "transparent", "overlay"]
    );

    let kinds: Vec<&str> = executed
        .commands
        .iter()
        .map(|command| match command {
            RecordedCommand::SetPipeline(_) => "pipeline",
            RecordedCommand::BindConstants { .. } => "constants",
            RecordedCommand::BindMesh(_) => "mesh",
            RecordedCommand::DrawIndexed(_) => "draw",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "pipeline", "constants", "mesh", "constants", "constants", "draw", // opaque
            "pipeline", "constants", "mesh", "constants", "constants", "draw", // transparent
            "pipeline", // overlay
        ]
    );
}

#[test]
fn test_wireframe_toggle() {
    let (mut renderer, mut registry, _) = scene(CompletionPolicy::Immediate, &config());
    renderer.set_wireframe(true);
    run_frame(&mut renderer, &mut registry);

    let executed = renderer.context().queue().last_executed().unwrap();
    assert_eq!(executed.pipelines(), vec!["opaque_wireframe", "transparent"]);
}

#[test]
fn test_material_edit_propagates() {
    let (mut renderer, mut registry, item) = scene(CompletionPolicy::Immediate, &config());
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    let material = registry.item(item).material();
    registry.material_mut(material).roughness = 0.9;
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    let slot = registry.material(material).slot();
    for frame in renderer.ring().slots() {
        assert_eq!(frame.buffers().materials.read(slot).roughness, 0.9);
    }
    assert_eq!(renderer.stats().materials_uploaded, 6);
}

#[test]
fn test_resize_drains_gpu() {
    let (mut renderer, mut registry, _) = scene(
        CompletionPolicy::Worker {
            latency: Duration::from_millis(5),
        },
        &config(),
    );
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    renderer.resize(1920, 1080).unwrap();
    assert_eq!(renderer.ring().in_flight(), 0);
    assert_eq!(
        renderer.fence().completed_value().unwrap(),
        renderer.fence().last_issued()
    );
}

#[test]
fn test_instance_edit_propagates_without_object_uploads() {
    let (mut renderer, mut registry, _) = scene(CompletionPolicy::Immediate, &config());
    let material = registry.add_material(MaterialDesc::default()).unwrap();
    let mesh = registry.items()[0].mesh();
    let item = registry
        .add_item(RenderItemDesc::new(mesh, material, box_draw()).with_instance_capacity(4))
        .unwrap();
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }
    assert!(registry.is_settled());
    let items_before = renderer.stats().items_uploaded;

    let moved = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0));
    registry
        .set_instances(item, vec![Instance::new(moved, material); 2])
        .unwrap();
    for _ in 0..3 {
        run_frame(&mut renderer, &mut registry);
    }

    let base = registry.item(item).instance_base();
    for slot in renderer.ring().slots() {
        let instances = &slot.buffers().instances;
        assert_eq!(instances.read(base).world, moved);
        assert_eq!(instances.read(base + 1).world, moved);
    }
    assert!(registry.is_settled());
    assert_eq!(renderer.stats().items_uploaded, items_before);
    assert_eq!(renderer.stats().instance_ranges_uploaded, 3 + 3);
}
