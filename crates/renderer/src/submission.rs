//! Command recording for one frame.
//!
//! Draws are recorded layer by layer: opaque items with the opaque (or wireframe)
//! pipeline, then transparent items with the transparent pipeline. Every draw binds
//! the current frame resource's slot handles, so the GPU reads exactly the records
//! the upload pass wrote for this frame.

use std::fmt;

use tracing::trace;

use inflight_rhi::{CommandList, DrawIndexed, GpuDevice, RootSlot};
use inflight_scene::{RenderItem, RenderItemRegistry, RenderLayer};

use crate::frame_resource::FrameBuffers;

/// Pipelines used to draw the scene layers.
pub struct PipelineSet<P> {
    /// Opaque layer, solid fill.
    pub opaque: P,
    /// Opaque layer, wireframe.
    pub opaque_wireframe: P,
    /// Transparent layer.
    pub transparent: P,
}

impl<P: fmt::Debug> fmt::Debug for PipelineSet<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSet")
            .field("opaque", &self.opaque)
            .field("opaque_wireframe", &self.opaque_wireframe)
            .field("transparent", &self.transparent)
            .finish()
    }
}

impl<P> PipelineSet<P> {
    /// Pipeline for `layer`.
    pub fn for_layer(&self, layer: RenderLayer, wireframe: bool) -> &P {
        match layer {
            RenderLayer::Opaque if wireframe => &self.opaque_wireframe,
            RenderLayer::Opaque => &self.opaque,
            RenderLayer::Transparent => &self.transparent,
        }
    }
}

/// Records the scene draws into an open command list.
///
/// Returns the number of draws recorded. Instanced items with no live instances
/// are skipped.
///
/// # Panics
///
/// Panics if an item references a mesh missing from `meshes`.
pub fn record_draws<D: GpuDevice>(
    list: &mut D::CommandList,
    buffers: &FrameBuffers<D::Memory>,
    registry: &RenderItemRegistry,
    meshes: &[D::Mesh],
    pipelines: &PipelineSet<D::Pipeline>,
    wireframe: bool,
) -> usize {
    let mut draws = 0;

    for layer in RenderLayer::ALL {
        list.set_pipeline(pipelines.for_layer(layer, wireframe));
        list.bind_constants(RootSlot::Pass, buffers.pass.slot(0));

        for item in registry.items_in_layer(layer) {
            if record_item::<D>(list, buffers, meshes, item) {
                draws += 1;
            }
        }
    }

    trace!("Recorded {} draws", draws);
    draws
}

fn record_item<D: GpuDevice>(
    list: &mut D::CommandList,
    buffers: &FrameBuffers<D::Memory>,
    meshes: &[D::Mesh],
    item: &RenderItem,
) -> bool {
    if item.is_instanced() && item.instances().is_empty() {
        return false;
    }

    let mesh_index = item.mesh().index();
    let mesh = meshes.get(mesh_index).unwrap_or_else(|| {
        panic!(
            "render item {} uses mesh {} which was never registered",
            item.id().index(),
            mesh_index
        )
    });

    list.bind_mesh(mesh);
    list.bind_constants(RootSlot::Object, buffers.objects.slot(item.object_slot()));
    list.bind_constants(
        RootSlot::Material,
        buffers.materials.slot(item.material().index()),
    );
    if item.is_instanced() {
        list.bind_constants(
            RootSlot::Instances,
            buffers.instances.slot(item.instance_base()),
        );
    }

    let args = item.draw_args();
    list.draw_indexed(DrawIndexed {
        index_count: args.index_count,
        instance_count: item.draw_instance_count(),
        first_index: args.start_index,
        base_vertex: args.base_vertex,
        first_instance: 0,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    use inflight_rhi::headless::{
        self, CompletionPolicy, HeadlessDevice, HeadlessMesh, HeadlessPipeline, RecordedCommand,
    };
    use inflight_scene::{
        DrawArgs, Instance, MaterialDesc, MeshId, RegistryCapacity, RenderItemDesc,
    };

    use crate::frame_resource::{FrameResource, FrameResourceDesc};

    fn pipelines() -> PipelineSet<HeadlessPipeline> {
        PipelineSet {
            opaque: HeadlessPipeline::new("opaque"),
            opaque_wireframe: HeadlessPipeline::new("wireframe"),
            transparent: HeadlessPipeline::new("transparent"),
        }
    }

    fn draw() -> DrawArgs {
        DrawArgs {
            index_count: 6,
            start_index: 0,
            base_vertex: 0,
        }
    }

    fn record(
        registry: &RenderItemRegistry,
        meshes: &[HeadlessMesh],
        wireframe: bool,
    ) -> (usize, Vec<RecordedCommand>) {
        let context = headless::context(CompletionPolicy::Immediate);
        let desc = FrameResourceDesc {
            objects: 4,
            materials: 2,
            instances: 8,
        };
        let mut frame = FrameResource::<HeadlessDevice>::new(context.device().as_ref(), 0, &desc)
            .unwrap();
        frame.begin_recording().unwrap();
        let (list, buffers) = frame.recording_parts();
        let draws = record_draws::<HeadlessDevice>(
            &mut *list,
            buffers,
            registry,
            meshes,
            &pipelines(),
            wireframe,
        );
        (draws, list.commands().to_vec())
    }

    fn registry() -> RenderItemRegistry {
        RenderItemRegistry::new(
            3,
            RegistryCapacity {
                objects: 4,
                materials: 2,
                instances: 8,
            },
        )
    }

    fn pipeline_switches(commands: &[RecordedCommand]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::SetPipeline(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_layers_in_order() {
        let mut registry = registry();
        let material = registry.add_material(MaterialDesc::default()).unwrap();
        registry
            .add_item(
                RenderItemDesc::new(MeshId::new(0), material, draw())
                    .with_layer(RenderLayer::Transparent),
            )
            .unwrap();
        registry
            .add_item(RenderItemDesc::new(MeshId::new(0), material, draw()))
            .unwrap();

        let meshes = [HeadlessMesh::new("quad", 4, 6)];
        let (draws, commands) = record(&registry, &meshes, false);

        assert_eq!(draws, 2);
        assert_eq!(pipeline_switches(&commands), vec!["opaque", "transparent"]);
    }

    #[test]
    fn test_wireframe_pipeline() {
        let registry = registry();
        let (draws, commands) = record(&registry, &[], true);

        assert_eq!(draws, 0);
        assert_eq!(pipeline_switches(&commands), vec!["wireframe", "transparent"]);
    }

    #[test]
    fn test_item_bindings() {
        let mut registry = registry();
        let material = registry.add_material(MaterialDesc::default()).unwrap();
        let second = registry.add_material(MaterialDesc::default()).unwrap();
        registry
            .add_item(RenderItemDesc::new(MeshId::new(0), material, draw()))
            .unwrap();
        registry
            .add_item(RenderItemDesc::new(MeshId::new(0), second, draw()))
            .unwrap();

        let meshes = [HeadlessMesh::new("quad", 4, 6)];
        let (_, commands) = record(&registry, &meshes, false);

        let bound: Vec<(RootSlot, u32)> = commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::BindConstants { slot, handle } => Some((*slot, handle.index())),
                _ => None,
            })
            .collect();

        // Pass slot per layer, then object + material per item.
        assert_eq!(
            bound,
            vec![
                (RootSlot::Pass, 0),
                (RootSlot::Object, 0),
                (RootSlot::Material, 0),
                (RootSlot::Object, 1),
                (RootSlot::Material, 1),
                (RootSlot::Pass, 0),
            ]
        );
    }

    #[test]
    fn test_instanced_draw() {
        let mut registry = registry();
        let material = registry.add_material(MaterialDesc::default()).unwrap();
        let instances = vec![Instance::new(Mat4::IDENTITY, material); 3];
        registry
            .add_item(
                RenderItemDesc::new(MeshId::new(0), material, draw()).with_instances(instances),
            )
            .unwrap();
        // Reserved but empty: skipped.
        registry
            .add_item(
                RenderItemDesc::new(MeshId::new(0), material, draw()).with_instance_capacity(2),
            )
            .unwrap();

        let meshes = [HeadlessMesh::new("box", 24, 36)];
        let (draws, commands) = record(&registry, &meshes, false);

        assert_eq!(draws, 1);
        let instance_counts: Vec<u32> = commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::DrawIndexed(args) => Some(args.instance_count),
                _ => None,
            })
            .collect();
        assert_eq!(instance_counts, vec![3]);
        assert!(commands.iter().any(|command| matches!(
            command,
            RecordedCommand::BindConstants {
                slot: RootSlot::Instances,
                ..
            }
        )));
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_missing_mesh_panics() {
        let mut registry = registry();
        let material = registry.add_material(MaterialDesc::default()).unwrap();
        registry
            .add_item(RenderItemDesc::new(MeshId::new(2), material, draw()))
            .unwrap();
        record(&registry, &[], false);
    }
}
