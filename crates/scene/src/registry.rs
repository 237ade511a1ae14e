//! Render item and material registry.
//!
//! The registry owns every render item and material, assigns their constant
//! buffer slots, and tracks which records still have to be propagated to the
//! frame resources. Every mutation goes through the registry, so nothing can
//! change a record without restarting its [`PropagationWindow`].
//!
//! Slots are assigned once, at insertion, and never reused: object slot = item
//! index, material slot = material index, and each item owns the contiguous
//! instance range `[instance_base, instance_base + instance_capacity)` of the
//! shared instance buffer.
//!
//! An item's instance range has its own window: editing instances does not
//! re-upload the object constants, and moving the item does not re-upload its
//! instances.
//!
//! # Example
//!
//! ```
//! use inflight_scene::{
//!     DrawArgs, MaterialDesc, MeshId, RegistryCapacity, RenderItemDesc, RenderItemRegistry,
//! };
//! use glam::Mat4;
//!
//! let mut registry = RenderItemRegistry::new(3, RegistryCapacity::default());
//! let material = registry.add_material(MaterialDesc::default()).unwrap();
//! let item = registry
//!     .add_item(RenderItemDesc::new(MeshId::new(0), material, DrawArgs::default()))
//!     .unwrap();
//!
//! registry.set_world(item, Mat4::from_translation(glam::Vec3::X));
//! assert_eq!(registry.item(item).window().remaining(), 3);
//! ```

use glam::Mat4;
use tracing::debug;

use crate::dirty::PropagationWindow;
use crate::error::{SceneError, SceneResult};
use crate::material::{Material, MaterialDesc};
use crate::render_item::{Instance, ItemId, MaterialId, RenderItem, RenderItemDesc, RenderLayer};

/// Slot counts of the per-frame constant buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryCapacity {
    /// Object constant slots (one per item).
    pub objects: u32,
    /// Material constant slots.
    pub materials: u32,
    /// Instance slots shared by every instanced item.
    pub instances: u32,
}

impl Default for RegistryCapacity {
    fn default() -> Self {
        Self {
            objects: 256,
            materials: 64,
            instances: 4096,
        }
    }
}

/// Records uploaded by one [`RenderItemRegistry::upload_dirty`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadCounts {
    /// Items whose object constants were uploaded.
    pub items: usize,
    /// Items whose instance range was uploaded.
    pub instances: usize,
    /// Materials uploaded.
    pub materials: usize,
}

/// Owner of every render item and material.
pub struct RenderItemRegistry {
    frames: u32,
    capacity: RegistryCapacity,
    items: Vec<RenderItem>,
    materials: Vec<Material>,
    layers: [Vec<ItemId>; 2],
    instances_reserved: u32,
}

impl RenderItemRegistry {
    /// Creates an empty registry for a ring of `frames_in_flight` resources.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(frames_in_flight: u32, capacity: RegistryCapacity) -> Self {
        assert!(frames_in_flight > 0, "registry needs at least one frame in flight");
        Self {
            frames: frames_in_flight,
            capacity,
            items: Vec::new(),
            materials: Vec::new(),
            layers: [Vec::new(), Vec::new()],
            instances_reserved: 0,
        }
    }

    /// Registers a material and assigns its constant slot.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::CapacityExceeded`] when every material slot is taken.
    pub fn add_material(&mut self, desc: MaterialDesc) -> SceneResult<MaterialId> {
        let index = self.materials.len();
        if index >= self.capacity.materials as usize {
            return Err(SceneError::CapacityExceeded {
                what: "material",
                requested: index as u64 + 1,
                capacity: self.capacity.materials,
            });
        }

        let id = MaterialId::new(index as u32);
        debug!("Registered material '{}' in slot {}", desc.name, index);
        self.materials.push(Material::new(id, desc, self.frames));
        Ok(id)
    }

    /// Registers a render item, assigning its object slot and instance range.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::CapacityExceeded`] when the object slots or the
    /// instance buffer are exhausted, or [`SceneError::UnknownMaterial`] when
    /// the item or one of its instances names a material this registry never
    /// issued. Nothing is reserved on error.
    pub fn add_item(&mut self, desc: RenderItemDesc) -> SceneResult<ItemId> {
        let index = self.items.len();
        if index >= self.capacity.objects as usize {
            return Err(SceneError::CapacityExceeded {
                what: "object",
                requested: index as u64 + 1,
                capacity: self.capacity.objects,
            });
        }

        self.check_material(desc.material)?;
        self.check_instances(&desc.instances)?;

        let instance_capacity = desc.instance_capacity.max(desc.instances.len() as u32);
        let reserved = u64::from(self.instances_reserved) + u64::from(instance_capacity);
        if reserved > u64::from(self.capacity.instances) {
            return Err(SceneError::CapacityExceeded {
                what: "instance",
                requested: reserved,
                capacity: self.capacity.instances,
            });
        }

        let id = ItemId::new(index as u32);
        let item = RenderItem {
            id,
            world: desc.world,
            texture_transform: desc.texture_transform,
            material: desc.material,
            mesh: desc.mesh,
            draw: desc.draw,
            layer: desc.layer,
            instances: desc.instances,
            instance_base: self.instances_reserved,
            instance_capacity,
            window: PropagationWindow::new(self.frames),
            instance_window: if instance_capacity > 0 {
                PropagationWindow::new(self.frames)
            } else {
                PropagationWindow::settled(self.frames)
            },
        };

        debug!(
            "Registered item {} ({:?}) in slot {}, instances {}..{}",
            index,
            item.layer,
            index,
            item.instance_base,
            item.instance_base + instance_capacity
        );

        self.instances_reserved += instance_capacity;
        self.layers[item.layer.index()].push(id);
        self.items.push(item);
        Ok(id)
    }

    /// Restarts the item's propagation windows, instances included.
    ///
    /// Use after changing data the registry cannot see; every setter below
    /// already does this.
    pub fn mark_dirty(&mut self, item: ItemId) {
        let item = self.item_mut(item);
        item.window.mark_dirty();
        if item.is_instanced() {
            item.instance_window.mark_dirty();
        }
    }

    /// Replaces the item's world transform.
    pub fn set_world(&mut self, item: ItemId, world: Mat4) {
        let item = self.item_mut(item);
        item.world = world;
        item.window.mark_dirty();
    }

    /// Replaces the item's texture transform.
    pub fn set_texture_transform(&mut self, item: ItemId, transform: Mat4) {
        let item = self.item_mut(item);
        item.texture_transform = transform;
        item.window.mark_dirty();
    }

    /// Points the item at another material.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::UnknownMaterial`] for a foreign material ID.
    pub fn set_material(&mut self, item: ItemId, material: MaterialId) -> SceneResult<()> {
        self.check_material(material)?;
        let item = self.item_mut(item);
        item.material = material;
        item.window.mark_dirty();
        Ok(())
    }

    /// Replaces the item's instances.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::CapacityExceeded`] if the instances do not fit the
    /// range reserved at insertion, or [`SceneError::UnknownMaterial`].
    pub fn set_instances(&mut self, item: ItemId, instances: Vec<Instance>) -> SceneResult<()> {
        self.check_instances(&instances)?;
        let item = self.item_mut(item);
        if instances.len() > item.instance_capacity as usize {
            return Err(SceneError::CapacityExceeded {
                what: "item instance",
                requested: instances.len() as u64,
                capacity: item.instance_capacity,
            });
        }
        item.instances = instances;
        item.instance_window.mark_dirty();
        Ok(())
    }

    /// Restarts the material's propagation window.
    pub fn mark_material_dirty(&mut self, material: MaterialId) {
        self.material_entry(material).window_mut().mark_dirty();
    }

    /// Mutable access to a material. Marks it dirty.
    pub fn material_mut(&mut self, material: MaterialId) -> &mut Material {
        let material = self.material_entry(material);
        material.window_mut().mark_dirty();
        material
    }

    /// Visits every record that still needs uploading, then ticks its window.
    ///
    /// `upload_item` writes an item's object constants and `upload_instances`
    /// its instance range; each is called only while the matching window is
    /// open. Called once per frame by the upload pass with the current frame
    /// resource's buffers captured in the closures.
    pub fn upload_dirty<F, I, G>(
        &mut self,
        mut upload_item: F,
        mut upload_instances: I,
        mut upload_material: G,
    ) -> UploadCounts
    where
        F: FnMut(&RenderItem),
        I: FnMut(&RenderItem),
        G: FnMut(&Material),
    {
        let mut counts = UploadCounts::default();

        for item in &mut self.items {
            if item.window.needs_upload() {
                upload_item(&*item);
                item.window.tick();
                counts.items += 1;
            }
            if item.instance_window.needs_upload() {
                upload_instances(&*item);
                item.instance_window.tick();
                counts.instances += 1;
            }
        }

        for material in self.materials.iter_mut().filter(|m| m.window().needs_upload()) {
            upload_material(&*material);
            material.window_mut().tick();
            counts.materials += 1;
        }

        counts
    }

    /// Returns an item.
    ///
    /// # Panics
    ///
    /// Panics if the ID was not issued by this registry.
    pub fn item(&self, item: ItemId) -> &RenderItem {
        match self.items.get(item.index()) {
            Some(item) => item,
            None => panic!("unknown render item {:?}", item),
        }
    }

    /// Returns a material.
    ///
    /// # Panics
    ///
    /// Panics if the ID was not issued by this registry.
    pub fn material(&self, material: MaterialId) -> &Material {
        match self.materials.get(material.index()) {
            Some(material) => material,
            None => panic!("unknown material {:?}", material),
        }
    }

    /// All items in insertion order.
    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    /// All materials in insertion order.
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Items of one layer in insertion order.
    pub fn items_in_layer(&self, layer: RenderLayer) -> impl Iterator<Item = &RenderItem> {
        self.layers[layer.index()]
            .iter()
            .map(|id| &self.items[id.index()])
    }

    /// Whether every frame resource holds the latest value of every record.
    pub fn is_settled(&self) -> bool {
        self.items
            .iter()
            .all(|i| i.window.is_settled() && i.instance_window.is_settled())
            && self.materials.iter().all(|m| m.window().is_settled())
    }

    /// Ring size the propagation windows were created for.
    #[inline]
    pub fn frames_in_flight(&self) -> u32 {
        self.frames
    }

    /// Configured slot counts.
    #[inline]
    pub fn capacity(&self) -> RegistryCapacity {
        self.capacity
    }

    /// Instance slots reserved so far.
    #[inline]
    pub fn instances_reserved(&self) -> u32 {
        self.instances_reserved
    }

    fn item_mut(&mut self, item: ItemId) -> &mut RenderItem {
        match self.items.get_mut(item.index()) {
            Some(item) => item,
            None => panic!("unknown render item {:?}", item),
        }
    }

    fn material_entry(&mut self, material: MaterialId) -> &mut Material {
        match self.materials.get_mut(material.index()) {
            Some(material) => material,
            None => panic!("unknown material {:?}", material),
        }
    }

    fn check_material(&self, material: MaterialId) -> SceneResult<()> {
        if material.index() < self.materials.len() {
            Ok(())
        } else {
            Err(SceneError::UnknownMaterial(material))
        }
    }

    fn check_instances(&self, instances: &[Instance]) -> SceneResult<()> {
        instances
            .iter()
            .try_for_each(|instance| self.check_material(instance.material))
    }
}
