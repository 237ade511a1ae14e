//! Render items: one draw call and the state it needs.

use glam::Mat4;

use crate::dirty::PropagationWindow;

/// Draw bucket; each layer is drawn with its own pipeline state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderLayer {
    /// Drawn first, depth-tested and depth-written.
    Opaque,
    /// Drawn after every opaque item with blending.
    Transparent,
}

impl RenderLayer {
    /// Layers in draw order.
    pub const ALL: [RenderLayer; 2] = [RenderLayer::Opaque, RenderLayer::Transparent];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            RenderLayer::Opaque => 0,
            RenderLayer::Transparent => 1,
        }
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw index.
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Raw index.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// Handle to a render item; also its object constant slot.
    ItemId
);
define_id!(
    /// Handle to a material; also its material constant slot.
    MaterialId
);
define_id!(
    /// Handle to a mesh registered with the renderer.
    MeshId
);

/// Index range of a mesh drawn by one item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawArgs {
    /// Number of indices
    pub index_count: u32,
    /// First index in the mesh's index buffer
    pub start_index: u32,
    /// Value added to every index
    pub base_vertex: i32,
}

/// Per-instance data of an instanced item.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    /// Instance world matrix
    pub world: Mat4,
    /// Texture coordinate transform
    pub texture_transform: Mat4,
    /// Material used by this instance
    pub material: MaterialId,
}

impl Instance {
    /// Instance at `world` using `material`.
    pub fn new(world: Mat4, material: MaterialId) -> Self {
        Self {
            world,
            texture_transform: Mat4::IDENTITY,
            material,
        }
    }
}

/// Parameters of a new render item.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderItemDesc {
    /// Object-to-world transform
    pub world: Mat4,
    /// Texture coordinate transform
    pub texture_transform: Mat4,
    /// Material
    pub material: MaterialId,
    /// Mesh
    pub mesh: MeshId,
    /// Index range to draw
    pub draw: DrawArgs,
    /// Draw bucket
    pub layer: RenderLayer,
    /// Initial instances
    pub instances: Vec<Instance>,
    /// Instance slots to reserve; at least `instances.len()`
    pub instance_capacity: u32,
}

impl RenderItemDesc {
    /// Opaque, non-instanced item at the origin.
    pub fn new(mesh: MeshId, material: MaterialId, draw: DrawArgs) -> Self {
        Self {
            world: Mat4::IDENTITY,
            texture_transform: Mat4::IDENTITY,
            material,
            mesh,
            draw,
            layer: RenderLayer::Opaque,
            instances: Vec::new(),
            instance_capacity: 0,
        }
    }

    /// Sets the world transform.
    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    /// Sets the texture transform.
    pub fn with_texture_transform(mut self, transform: Mat4) -> Self {
        self.texture_transform = transform;
        self
    }

    /// Sets the layer.
    pub fn with_layer(mut self, layer: RenderLayer) -> Self {
        self.layer = layer;
        self
    }

    /// Makes the item instanced with these initial instances.
    pub fn with_instances(mut self, instances: Vec<Instance>) -> Self {
        self.instance_capacity = self.instance_capacity.max(instances.len() as u32);
        self.instances = instances;
        self
    }

    /// Reserves instance slots beyond the initial instances.
    pub fn with_instance_capacity(mut self, capacity: u32) -> Self {
        self.instance_capacity = capacity.max(self.instances.len() as u32);
        self
    }
}

/// A registered render item.
#[derive(Clone, Debug)]
pub struct RenderItem {
    pub(crate) id: ItemId,
    pub(crate) world: Mat4,
    pub(crate) texture_transform: Mat4,
    pub(crate) material: MaterialId,
    pub(crate) mesh: MeshId,
    pub(crate) draw: DrawArgs,
    pub(crate) layer: RenderLayer,
    pub(crate) instances: Vec<Instance>,
    pub(crate) instance_base: u32,
    pub(crate) instance_capacity: u32,
    pub(crate) window: PropagationWindow,
    pub(crate) instance_window: PropagationWindow,
}

impl RenderItem {
    /// Item ID.
    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Index of the item's element in the object constant buffer.
    #[inline]
    pub fn object_slot(&self) -> usize {
        self.id.index()
    }

    /// Object-to-world transform.
    #[inline]
    pub fn world(&self) -> Mat4 {
        self.world
    }

    /// Texture coordinate transform.
    #[inline]
    pub fn texture_transform(&self) -> Mat4 {
        self.texture_transform
    }

    /// Material.
    #[inline]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    /// Mesh.
    #[inline]
    pub fn mesh(&self) -> MeshId {
        self.mesh
    }

    /// Index range to draw.
    #[inline]
    pub fn draw_args(&self) -> DrawArgs {
        self.draw
    }

    /// Draw bucket.
    #[inline]
    pub fn layer(&self) -> RenderLayer {
        self.layer
    }

    /// Current instances.
    #[inline]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Whether the item reserved instance slots.
    #[inline]
    pub fn is_instanced(&self) -> bool {
        self.instance_capacity > 0
    }

    /// First slot of the item's range in the instance buffer.
    #[inline]
    pub fn instance_base(&self) -> usize {
        self.instance_base as usize
    }

    /// Instance slots reserved for the item.
    #[inline]
    pub fn instance_capacity(&self) -> usize {
        self.instance_capacity as usize
    }

    /// Instances to draw: the instance count when instanced, otherwise 1.
    #[inline]
    pub fn draw_instance_count(&self) -> u32 {
        if self.is_instanced() {
            self.instances.len() as u32
        } else {
            1
        }
    }

    /// Propagation state of the object constants.
    #[inline]
    pub fn window(&self) -> &PropagationWindow {
        &self.window
    }

    /// Propagation state of the instance range, tracked apart from the object
    /// constants. Always settled for items without instance slots.
    #[inline]
    pub fn instance_window(&self) -> &PropagationWindow {
        &self.instance_window
    }
}
