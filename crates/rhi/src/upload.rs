//! Typed upload buffers.
//!
//! An [`UploadBuffer`] is an array of `Pod` records in persistently mapped
//! memory. The CPU writes elements with [`UploadBuffer::copy_to`]; the GPU reads
//! them through [`SlotHandle`]s bound on a command list.
//!
//! The buffer does no synchronization of its own. Writing an element while the
//! GPU may still read the same allocation is a data race on the GPU side; the
//! owning frame resource's fence gate is what makes writes safe.
//!
//! # Layouts
//!
//! - [`ElementLayout::ConstantBuffer`] rounds every element up to
//!   [`CONSTANT_BUFFER_ALIGNMENT`] bytes so each one can be bound by address.
//! - [`ElementLayout::Structured`] packs elements tightly for array access.
//!
//! # Example
//!
//! ```
//! use inflight_rhi::headless::HeadlessDevice;
//! use inflight_rhi::upload::{ElementLayout, UploadBuffer};
//!
//! # fn example() -> Result<(), inflight_rhi::RhiError> {
//! let device = HeadlessDevice::new();
//! let mut buffer: UploadBuffer<[f32; 4], _> =
//!     UploadBuffer::new(&*device, "tint", 8, ElementLayout::ConstantBuffer)?;
//!
//! buffer.copy_to(3, &[1.0, 0.5, 0.25, 1.0]);
//! assert_eq!(buffer.stride(), 256);
//! assert_eq!(buffer.slot(3).offset(), 768);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;
use tracing::debug;

use crate::backend::{GpuAddress, GpuDevice, MappedMemory};
use crate::error::{RhiError, RhiResult};

/// Required alignment of constant buffer views, in bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Rounds `byte_size` up to the next multiple of 256.
///
/// `constant_buffer_byte_size(300) == 512`, `constant_buffer_byte_size(256) == 256`.
#[inline]
pub const fn constant_buffer_byte_size(byte_size: u64) -> u64 {
    (byte_size + (CONSTANT_BUFFER_ALIGNMENT - 1)) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// How elements are laid out in an [`UploadBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementLayout {
    /// 256-byte aligned elements bound individually by address.
    ConstantBuffer,
    /// Tightly packed elements consumed as an array.
    Structured,
}

impl ElementLayout {
    /// Stride between consecutive elements of `element_size` bytes.
    #[inline]
    pub fn stride_for(self, element_size: usize) -> u64 {
        match self {
            ElementLayout::ConstantBuffer => constant_buffer_byte_size(element_size as u64),
            ElementLayout::Structured => element_size as u64,
        }
    }
}

/// GPU-side reference to one element of an [`UploadBuffer`].
///
/// All address arithmetic for binding goes through this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    base: GpuAddress,
    index: u32,
    offset: u64,
    size: u64,
}

impl SlotHandle {
    /// Address of the buffer's first element.
    #[inline]
    pub fn base(&self) -> GpuAddress {
        self.base
    }

    /// Element index.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Byte offset of the element from the buffer base.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes the element occupies, including padding.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Address of the element: `base + index * stride`.
    #[inline]
    pub fn address(&self) -> GpuAddress {
        self.base.offset(self.offset)
    }
}

/// Fixed-size array of `T` in mapped upload memory.
pub struct UploadBuffer<T: Pod, M: MappedMemory> {
    memory: M,
    len: usize,
    stride: u64,
    layout: ElementLayout,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod, M: MappedMemory> UploadBuffer<T, M> {
    /// Allocates a buffer of `len` elements.
    ///
    /// # Arguments
    ///
    /// * `device` - Device that owns the memory
    /// * `label` - Name used for logging and allocator debugging
    /// * `len` - Number of elements
    /// * `layout` - Element layout
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidCapacity`] if `len` is zero or the byte size
    /// overflows, or an allocation error from the device.
    pub fn new<D>(device: &D, label: &str, len: usize, layout: ElementLayout) -> RhiResult<Self>
    where
        D: GpuDevice<Memory = M>,
    {
        if len == 0 || u32::try_from(len).is_err() {
            return Err(RhiError::InvalidCapacity {
                what: label.to_string(),
                requested: len as u64,
            });
        }

        let stride = layout.stride_for(size_of::<T>());
        let byte_size = stride
            .checked_mul(len as u64)
            .ok_or_else(|| RhiError::InvalidCapacity {
                what: label.to_string(),
                requested: len as u64,
            })?;

        let memory = device.create_upload_memory(label, byte_size)?;
        if (memory.bytes().len() as u64) < byte_size {
            return Err(RhiError::InvalidHandle(format!(
                "{label}: mapped {} bytes, need {byte_size}",
                memory.bytes().len()
            )));
        }

        debug!(
            "Created upload buffer '{}': {} x {} bytes ({:?})",
            label, len, stride, layout
        );

        Ok(Self {
            memory,
            len,
            stride,
            layout,
            _marker: PhantomData,
        })
    }

    /// Copies `value` into element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn copy_to(&mut self, index: usize, value: &T) {
        let range = self.element_range(index);
        self.memory.bytes_mut()[range].copy_from_slice(bytemuck::bytes_of(value));
    }

    /// Reads element `index` back from mapped memory.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn read(&self, index: usize) -> T {
        let range = self.element_range(index);
        bytemuck::pod_read_unaligned(&self.memory.bytes()[range])
    }

    /// Raw bytes of element `index`, without stride padding.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn element_bytes(&self, index: usize) -> &[u8] {
        let range = self.element_range(index);
        &self.memory.bytes()[range]
    }

    /// Returns the GPU handle of element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn slot(&self, index: usize) -> SlotHandle {
        self.check_index(index);
        SlotHandle {
            base: self.memory.gpu_address(),
            index: index as u32,
            offset: index as u64 * self.stride,
            size: self.stride,
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty buffers cannot be created.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes between consecutive elements.
    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Element layout.
    #[inline]
    pub fn layout(&self) -> ElementLayout {
        self.layout
    }

    /// Total bytes covered by the elements.
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.stride * self.len as u64
    }

    /// Address of element 0.
    #[inline]
    pub fn base_address(&self) -> GpuAddress {
        self.memory.gpu_address()
    }

    /// Backing memory.
    #[inline]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    fn check_index(&self, index: usize) {
        assert!(
            index < self.len,
            "upload buffer index {index} out of range (len {})",
            self.len
        );
    }

    fn element_range(&self, index: usize) -> std::ops::Range<usize> {
        self.check_index(index);
        let start = index * self.stride as usize;
        start..start + size_of::<T>()
    }
}
