//! Per-frame upload of scene data into a frame resource.

use tracing::trace;

use inflight_rhi::MappedMemory;
use inflight_scene::{RenderItemRegistry, UploadCounts};

use crate::constants::{InstanceData, MaterialConstants, ObjectConstants, PassConstants};
use crate::frame_resource::FrameBuffers;

/// Writes the pass constants and every record whose propagation window is open.
///
/// Pass constants change every frame and always go to pass slot 0. Object
/// constants, instance ranges and materials are written only while dirty; each
/// visit ticks their window once, so a change reaches all N frame resources
/// after N frames.
///
/// # Panics
///
/// Panics if an object slot, material slot or instance range lies outside the
/// buffers. The renderer checks registry capacity against the buffers up front.
pub fn upload_frame<M: MappedMemory>(
    buffers: &mut FrameBuffers<M>,
    registry: &mut RenderItemRegistry,
    pass: &PassConstants,
) -> UploadCounts {
    buffers.pass.copy_to(0, pass);

    let FrameBuffers {
        objects,
        materials,
        instances,
        ..
    } = buffers;

    let counts = registry.upload_dirty(
        |item| objects.copy_to(item.object_slot(), &ObjectConstants::from(item)),
        |item| {
            let base = item.instance_base();
            for (offset, instance) in item.instances().iter().enumerate() {
                instances.copy_to(base + offset, &InstanceData::from(instance));
            }
        },
        |material| {
            materials.copy_to(material.slot(), &MaterialConstants::from(material));
        },
    );

    trace!(
        "Uploaded {} items, {} instance ranges, {} materials",
        counts.items, counts.instances, counts.materials
    );
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3, Vec4};

    use inflight_rhi::headless::{self, CompletionPolicy, HeadlessDevice};
    use inflight_scene::{
        DrawArgs, Instance, MaterialDesc, MeshId, PassInput, RegistryCapacity, RenderItemDesc,
    };

    use crate::frame_resource::{FrameResource, FrameResourceDesc};

    const FRAMES: u32 = 3;

    fn resources() -> Vec<FrameResource<HeadlessDevice>> {
        let context = headless::context(CompletionPolicy::Immediate);
        let desc = FrameResourceDesc {
            objects: 8,
            materials: 4,
            instances: 16,
        };
        (0..FRAMES as usize)
            .map(|i| FrameResource::new(context.device().as_ref(), i, &desc).unwrap())
            .collect()
    }

    fn registry() -> RenderItemRegistry {
        RenderItemRegistry::new(
            FRAMES,
            RegistryCapacity {
                objects: 8,
                materials: 4,
                instances: 16,
            },
        )
    }

    fn draw() -> DrawArgs {
        DrawArgs {
            index_count: 36,
            start_index: 0,
            base_vertex: 0,
        }
    }

    #[test]
    fn test_pass_constants_written_every_frame() {
        let mut frames = resources();
        let mut registry = registry();
        let pass = PassConstants::new(&PassInput::default(), 640, 480);

        let counts = upload_frame(frames[0].buffers_mut(), &mut registry, &pass);
        assert_eq!(counts, UploadCounts::default());
        assert_eq!(frames[0].buffers().pass.read(0), pass);
    }

    #[test]
    fn test_dirty_item_reaches_every_frame() {
        let mut frames = resources();
        let mut registry = registry();
        let material = registry.add_material(MaterialDesc::default()).unwrap();
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let item = registry
            .add_item(RenderItemDesc::new(MeshId::new(0), material, draw()).with_world(world))
            .unwrap();
        let pass = PassConstants::default();

        for frame in frames.iter_mut() {
            let counts = upload_frame(frame.buffers_mut(), &mut registry, &pass);
            assert_eq!(counts.items, 1);
            assert_eq!(counts.materials, 1);
        }

        let slot = registry.item(item).object_slot();
        for frame in &frames {
            assert_eq!(frame.buffers().objects.read(slot).world, world);
        }
        assert!(registry.is_settled());

        // Settled: nothing more to upload.
        let counts = upload_frame(frames[0].buffers_mut(), &mut registry, &pass);
        assert_eq!(counts, UploadCounts::default());
    }

    #[test]
    fn test_instances_written_to_reserved_range() {
        let mut frames = resources();
        let mut registry = registry();
        let red = registry
            .add_material(MaterialDesc {
                diffuse_albedo: Vec4::new(1.0, 0.0, 0.0, 1.0),
                ..Default::default()
            })
            .unwrap();
        let blue = registry.add_material(MaterialDesc::default()).unwrap();

        // Occupies instance slots 0..2 so the next item starts at 2.
        registry
            .add_item(
                RenderItemDesc::new(MeshId::new(0), red, draw()).with_instance_capacity(2),
            )
            .unwrap();
        let instances = vec![
            Instance::new(Mat4::from_translation(Vec3::X), red),
            Instance::new(Mat4::from_translation(Vec3::Y), blue),
        ];
        let item = registry
            .add_item(
                RenderItemDesc::new(MeshId::new(0), red, draw()).with_instances(instances),
            )
            .unwrap();

        upload_frame(frames[0].buffers_mut(), &mut registry, &PassConstants::default());

        let base = registry.item(item).instance_base();
        assert_eq!(base, 2);
        let buffer = &frames[0].buffers().instances;
        assert_eq!(buffer.read(base).world, Mat4::from_translation(Vec3::X));
        assert_eq!(buffer.read(base + 1).world, Mat4::from_translation(Vec3::Y));
        assert_eq!(buffer.read(base + 1).material_index, blue.index() as u32);
    }

    #[test]
    fn test_material_constants_written_to_slot() {
        let mut frames = resources();
        let mut registry = registry();
        registry.add_material(MaterialDesc::default()).unwrap();
        let material = registry
            .add_material(MaterialDesc {
                roughness: 0.75,
                ..Default::default()
            })
            .unwrap();

        upload_frame(frames[1].buffers_mut(), &mut registry, &PassConstants::default());

        let slot = registry.material(material).slot();
        assert_eq!(slot, 1);
        assert_eq!(frames[1].buffers().materials.read(slot).roughness, 0.75);
    }
}
