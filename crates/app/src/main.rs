//! inflight demo driver.
//!
//! Builds a small scene and pushes it through the frame pipeline for a fixed
//! number of frames, either on the headless backend with a simulated GPU thread
//! or on a Vulkan device (uploads and submissions only, no draws).
//!
//! Usage: `inflight [config.toml]`

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use glam::{Quat, Vec3, Vec4};
use tracing::{error, info};

use inflight_core::{Backend, RendererConfig, Timer};
use inflight_renderer::{FrameRenderer, PipelineSet};
use inflight_rhi::headless::{self, CompletionPolicy, HeadlessMesh, HeadlessPipeline};
use inflight_rhi::{GpuDevice, RhiError, vulkan};
use inflight_scene::{
    DrawArgs, Instance, ItemId, Light, MaterialDesc, MaterialId, MeshId, PassInput,
    RenderItemDesc, RenderItemRegistry, RenderLayer, Transform,
};

/// Cells per side of the ground grid.
const GRID_CELLS: u32 = 40;

/// Boxes per side of the instanced field.
const FIELD_SIDE: u32 = 5;

/// Frames between material color changes.
const MATERIAL_PERIOD: u64 = 60;

/// Meshes the demo scene refers to.
struct SceneMeshes {
    grid: MeshId,
    grid_indices: u32,
    cube: MeshId,
}

/// Handles the frame loop animates.
struct DemoScene {
    spinner: ItemId,
    pulsing: MaterialId,
}

fn main() -> Result<()> {
    inflight_core::init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => RendererConfig::load(Path::new(&path))
            .with_context(|| format!("loading configuration from {path}"))?,
        None => RendererConfig::default(),
    };
    info!(
        "Starting inflight demo: {:?} backend, {} frames, {} frames in flight",
        config.demo.backend, config.demo.frames, config.frames_in_flight
    );

    let result = match config.demo.backend {
        Backend::Headless => run_headless(&config),
        Backend::Vulkan => run_vulkan(&config),
    };

    if let Err(e) = &result
        && let Some(gpu_error) = e.downcast_ref::<RhiError>()
        && gpu_error.is_fatal()
    {
        error!("Frame pipeline stopped on a fatal GPU error: {}", gpu_error);
    }
    result?;

    info!("Demo finished");
    Ok(())
}

fn run_headless(config: &RendererConfig) -> Result<()> {
    let context = headless::context(CompletionPolicy::Worker {
        latency: Duration::from_millis(config.demo.gpu_latency_ms),
    });
    let pipelines = PipelineSet {
        opaque: HeadlessPipeline::new("opaque"),
        opaque_wireframe: HeadlessPipeline::new("opaque_wireframe"),
        transparent: HeadlessPipeline::new("transparent"),
    };
    let mut renderer = FrameRenderer::new(context, config, Some(pipelines))?;

    let grid_indices = grid_index_count(GRID_CELLS);
    let meshes = SceneMeshes {
        grid: renderer.register_mesh(HeadlessMesh::new(
            "grid",
            (GRID_CELLS + 1) * (GRID_CELLS + 1),
            grid_indices,
        )),
        grid_indices,
        cube: renderer.register_mesh(HeadlessMesh::new("cube", 8, 36)),
    };

    run_frames(&mut renderer, config, &meshes)
}

fn run_vulkan(config: &RendererConfig) -> Result<()> {
    let context = vulkan::context(cfg!(debug_assertions)).context("creating Vulkan device")?;
    let device = std::sync::Arc::clone(context.device());
    let mut renderer = FrameRenderer::new(context, config, None)?;
    info!("Vulkan mode records no draws; uploads and submissions only");

    let (grid_vertices, grid_indices) = grid_geometry(GRID_CELLS);
    let (cube_vertices, cube_indices) = cube_geometry();
    let meshes = SceneMeshes {
        grid: renderer.register_mesh(device.create_mesh(
            "grid",
            &vertex_bytes(&grid_vertices),
            &grid_indices,
        )?),
        grid_indices: grid_indices.len() as u32,
        cube: renderer.register_mesh(device.create_mesh(
            "cube",
            &vertex_bytes(&cube_vertices),
            &cube_indices,
        )?),
    };

    run_frames(&mut renderer, config, &meshes)
}

fn run_frames<D: GpuDevice>(
    renderer: &mut FrameRenderer<D>,
    config: &RendererConfig,
    meshes: &SceneMeshes,
) -> Result<()> {
    let mut registry = renderer.create_registry();
    let scene = build_scene(&mut registry, meshes)
        .context("demo scene does not fit the configured capacities")?;

    let mut input = PassInput {
        lights: vec![
            Light::directional(Vec3::new(0.57, -0.57, 0.57), Vec3::splat(0.8)),
            Light::point(Vec3::new(0.0, 4.0, 0.0), Vec3::new(1.0, 0.8, 0.6), 1.0, 12.0),
        ],
        ..Default::default()
    };
    input.camera.position = Vec3::new(0.0, 8.0, -18.0);
    input.camera.look_at(Vec3::ZERO);
    input
        .camera
        .set_aspect(config.width as f32 / config.height as f32);

    let mut timer = Timer::new();
    let halfway = config.demo.frames / 2;

    for frame in 0..config.demo.frames {
        input.delta_time = timer.delta_secs();
        input.total_time = timer.elapsed_secs();

        let spin = Transform::new()
            .with_position(Vec3::new(0.0, 2.0, 0.0))
            .with_rotation(Quat::from_rotation_y(input.total_time));
        registry.set_world(scene.spinner, spin.matrix());
        if frame % MATERIAL_PERIOD == 0 {
            let phase = (frame / MATERIAL_PERIOD) as f32;
            registry.material_mut(scene.pulsing).diffuse_albedo =
                Vec4::new(0.5 + 0.5 * phase.sin(), 0.4, 0.5 + 0.5 * phase.cos(), 1.0);
        }
        if frame == halfway && frame > 0 {
            let (width, height) = (config.width * 3 / 4, config.height * 3 / 4);
            renderer.resize(width, height)?;
            input.camera.set_aspect(width as f32 / height as f32);
        }

        let token = renderer.prepare_frame(&mut registry, &input)?;
        renderer.submit_frame(token, &registry)?;

        if let Some(fps) = timer.take_rate(Duration::from_secs(1)) {
            let stats = renderer.stats();
            info!(
                "{:.0} fps, fence {}, {} stalls (longest {:.1} ms), {} draws/frame",
                fps,
                stats.last_fence,
                stats.stalls,
                stats.longest_wait.as_secs_f64() * 1000.0,
                stats.last_draws
            );
        }
    }

    renderer.wait_for_gpu_idle()?;

    let stats = renderer.stats();
    info!(
        "{} frames in {:.2} s; {} item and {} material uploads; waited {:.1} ms total",
        stats.frames_submitted,
        timer.elapsed_secs(),
        stats.items_uploaded,
        stats.materials_uploaded,
        stats.total_wait.as_secs_f64() * 1000.0
    );
    Ok(())
}

fn build_scene(
    registry: &mut RenderItemRegistry,
    meshes: &SceneMeshes,
) -> inflight_scene::SceneResult<DemoScene> {
    let grass = registry.add_material(MaterialDesc {
        name: "grass".to_string(),
        diffuse_albedo: Vec4::new(0.2, 0.6, 0.2, 1.0),
        fresnel_r0: Vec3::splat(0.01),
        roughness: 0.9,
        ..Default::default()
    })?;
    let crate_material = registry.add_material(MaterialDesc {
        name: "crate".to_string(),
        diffuse_albedo: Vec4::new(0.8, 0.6, 0.4, 1.0),
        fresnel_r0: Vec3::splat(0.05),
        roughness: 0.4,
        ..Default::default()
    })?;
    let water = registry.add_material(MaterialDesc {
        name: "water".to_string(),
        diffuse_albedo: Vec4::new(0.2, 0.4, 0.8, 0.5),
        fresnel_r0: Vec3::splat(0.1),
        roughness: 0.05,
        ..Default::default()
    })?;

    let cube = DrawArgs {
        index_count: 36,
        start_index: 0,
        base_vertex: 0,
    };
    let grid = DrawArgs {
        index_count: meshes.grid_indices,
        start_index: 0,
        base_vertex: 0,
    };

    registry.add_item(RenderItemDesc::new(meshes.grid, grass, grid))?;

    let half = FIELD_SIDE as f32 / 2.0;
    let instances = (0..FIELD_SIDE * FIELD_SIDE)
        .map(|i| {
            let x = (i % FIELD_SIDE) as f32 - half;
            let z = (i / FIELD_SIDE) as f32 - half;
            let transform = Transform::new()
                .with_position(Vec3::new(x * 3.0, 0.5, z * 3.0))
                .with_rotation(Quat::from_rotation_y(i as f32 * 0.3));
            Instance::new(
                transform.matrix(),
                if i % 2 == 0 { crate_material } else { grass },
            )
        })
        .collect();
    registry.add_item(
        RenderItemDesc::new(meshes.cube, crate_material, cube).with_instances(instances),
    )?;

    let spinner = registry.add_item(RenderItemDesc::new(meshes.cube, crate_material, cube))?;

    registry.add_item(
        RenderItemDesc::new(meshes.grid, water, grid)
            .with_world(
                Transform::new()
                    .with_position(Vec3::new(0.0, 0.1, 0.0))
                    .with_scale(Vec3::splat(0.5))
                    .into(),
            )
            .with_layer(RenderLayer::Transparent),
    )?;

    info!(
        "Demo scene: {} items, {} materials, {} instance slots",
        registry.items().len(),
        registry.materials().len(),
        registry.instances_reserved()
    );

    Ok(DemoScene {
        spinner,
        pulsing: crate_material,
    })
}

fn grid_index_count(cells: u32) -> u32 {
    cells * cells * 6
}

/// Flat grid in the XZ plane centered on the origin, one unit per cell.
fn grid_geometry(cells: u32) -> (Vec<Vec3>, Vec<u32>) {
    let side = cells + 1;
    let half = cells as f32 / 2.0;
    let vertices = (0..side * side)
        .map(|i| Vec3::new((i % side) as f32 - half, 0.0, (i / side) as f32 - half))
        .collect();

    let mut indices = Vec::with_capacity(grid_index_count(cells) as usize);
    for row in 0..cells {
        for col in 0..cells {
            let i = row * side + col;
            indices.extend_from_slice(&[i, i + side, i + 1, i + 1, i + side, i + side + 1]);
        }
    }
    (vertices, indices)
}

/// Unit cube centered on the origin.
fn cube_geometry() -> (Vec<Vec3>, Vec<u32>) {
    let vertices = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            )
        })
        .collect();
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    (vertices, indices)
}

fn vertex_bytes(vertices: &[Vec3]) -> Vec<u8> {
    vertices
        .iter()
        .flat_map(|v| v.to_array())
        .flat_map(f32::to_ne_bytes)
        .collect()
}
