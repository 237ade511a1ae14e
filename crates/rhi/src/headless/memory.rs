use tracing::debug;

use crate::backend::{GpuAddress, MappedMemory};
use crate::error::{RhiError, RhiResult};

/// Heap-backed upload memory with a synthetic GPU address.
pub struct HeadlessMemory {
    label: String,
    address: GpuAddress,
    bytes: Box<[u8]>,
}

impl HeadlessMemory {
    pub(super) fn new(label: &str, address: GpuAddress, size: u64) -> RhiResult<Self> {
        let invalid = || RhiError::InvalidCapacity {
            what: label.to_string(),
            requested: size,
        };
        let len = usize::try_from(size).map_err(|_| invalid())?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| invalid())?;
        bytes.resize(len, 0u8);
        let bytes = bytes.into_boxed_slice();
        debug!(
            "Allocated headless memory '{}': {} bytes at {:#x}",
            label,
            size,
            address.get()
        );
        Ok(Self {
            label: label.to_string(),
            address,
            bytes,
        })
    }

    /// Allocation label.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl MappedMemory for HeadlessMemory {
    #[inline]
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for HeadlessMemory {
    fn drop(&mut self) {
        debug!("Freed headless memory '{}'", self.label);
    }
}
