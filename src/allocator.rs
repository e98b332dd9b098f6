//! Device-memory allocator façade.
//!
//! Owns, per hardware memory type, a list of chunks. Allocation requests
//! are routed to an existing chunk of the selected type or to a freshly
//! created one; frees are routed back to the owning chunk, which is
//! destroyed as soon as it holds no live region.
//!
//! Locking: one mutex per memory type guards that type's chunk list, one
//! mutex per chunk guards its region list. Both may be held at once, and
//! only in list → chunk order.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{DeviceBlock, MemoryBackend};
use crate::chunk::{Chunk, PlacedRegion};
use crate::error::AllocatorError;
use crate::memory_type::{select_memory_type, MemoryPropertyFlags, MemoryTypeDescriptor};
use crate::types::{Allocation, AllocationRequest, AllocatorConfig, ResourceKind};

/// A chunk and its list-level identity.
///
/// The id lives outside the chunk mutex so handle validation does not have
/// to lock every chunk it walks past.
struct ChunkEntry {
    id: u64,
    chunk: Mutex<Chunk>,
}

/// Usage summary for one memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryTypeReport {
    /// Number of live chunks.
    pub chunk_count: usize,
    /// Bytes reserved from the driver.
    pub reserved_bytes: u64,
    /// Bytes placed in sub-allocations (including alignment padding).
    pub allocated_bytes: u64,
}

/// Usage summary across all memory types.
#[derive(Debug, Clone, Default)]
pub struct AllocatorReport {
    /// One entry per hardware memory type.
    pub memory_types: Vec<MemoryTypeReport>,
}

impl AllocatorReport {
    /// Total bytes reserved from the driver.
    pub fn total_reserved(&self) -> u64 {
        self.memory_types.iter().map(|t| t.reserved_bytes).sum()
    }

    /// Total bytes placed in sub-allocations.
    pub fn total_allocated(&self) -> u64 {
        self.memory_types.iter().map(|t| t.allocated_bytes).sum()
    }
}

/// Type-segregated device-memory sub-allocator.
///
/// Create one per device, share it by `Arc` with whichever subsystems
/// allocate, and tear it down explicitly with [`shutdown`](Self::shutdown)
/// (dropping it does the same).
pub struct DeviceAllocator {
    backend: Arc<dyn MemoryBackend>,
    memory_types: Vec<MemoryTypeDescriptor>,
    granularity: u64,
    config: AllocatorConfig,
    /// Indexed by memory-type index; fixed length after construction.
    pools: Vec<Mutex<Vec<Arc<ChunkEntry>>>>,
    /// Chunk ids are unique for the allocator's lifetime, so a stale
    /// handle can never name a later chunk.
    next_chunk_id: AtomicU64,
}

impl DeviceAllocator {
    /// Create an allocator over the given backend.
    ///
    /// The backend's memory-type table and buffer/image granularity are
    /// queried once here and never again.
    pub fn new(backend: Arc<dyn MemoryBackend>, config: AllocatorConfig) -> Self {
        let memory_types = backend.memory_types();
        let granularity = backend.buffer_image_granularity().max(1);
        debug_assert!(granularity.is_power_of_two());

        log::info!(
            "device allocator over {} backend: {} memory types, granularity {}",
            backend.name(),
            memory_types.len(),
            granularity
        );

        let pools = (0..memory_types.len()).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            backend,
            memory_types,
            granularity,
            config,
            pools,
            next_chunk_id: AtomicU64::new(0),
        }
    }

    /// The device's memory-type table.
    pub fn memory_types(&self) -> &[MemoryTypeDescriptor] {
        &self.memory_types
    }

    /// The buffer/image granularity placements are checked against.
    pub fn buffer_image_granularity(&self) -> u64 {
        self.granularity
    }

    /// Place a sub-allocation.
    ///
    /// Picks the best memory type for the request's usage, then scans that
    /// type's chunks in creation order for room, creating a new chunk when
    /// none fits. Failures are ordinary values; see [`AllocatorError`] for
    /// the kinds callers must handle.
    pub fn alloc(&self, request: &AllocationRequest) -> Result<Allocation, AllocatorError> {
        if request.size == 0 {
            return Err(AllocatorError::InvalidRequest(
                "zero-size allocation".to_string(),
            ));
        }
        if !request.alignment.is_power_of_two() {
            return Err(AllocatorError::InvalidRequest(format!(
                "alignment {} is not a power of two",
                request.alignment
            )));
        }
        if request.kind == ResourceKind::Free {
            return Err(AllocatorError::InvalidRequest(
                "cannot allocate a free region".to_string(),
            ));
        }

        let type_index =
            select_memory_type(&self.memory_types, request.usage, request.memory_type_bits)
                .ok_or(AllocatorError::NoCompatibleMemoryType)?;

        // Snapshot the chunk list so placement attempts do not hold the
        // list lock across region scans.
        let entries: Vec<Arc<ChunkEntry>> = self.pools[type_index as usize].lock().clone();
        for entry in &entries {
            let mut chunk = entry.chunk.lock();
            if let Some(placed) = chunk.try_alloc(
                request.size,
                request.alignment,
                self.granularity,
                request.kind,
                request.label.clone(),
            ) {
                return Ok(self.make_allocation(type_index, entry.id, &chunk, placed, request.size));
            }
        }

        // Every existing chunk rejected the request: create a new one.
        let chunk_size = self.config.chunk_size_for(request.usage);
        if request.size > chunk_size {
            return Err(AllocatorError::OversizedAllocation {
                size: request.size,
                max: chunk_size,
            });
        }

        let block = self.backend.allocate_block(type_index, chunk_size)?;
        let mapped_base = if self.memory_types[type_index as usize]
            .property_flags
            .contains(MemoryPropertyFlags::HOST_VISIBLE)
        {
            match self.backend.map_block(&block) {
                Ok(base) => Some(base),
                Err(e) => {
                    self.backend.free_block(block);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut chunk = Chunk::new(
            type_index,
            request.usage,
            chunk_size,
            block,
            mapped_base,
        );
        let Some(placed) = chunk.try_alloc(
            request.size,
            request.alignment,
            self.granularity,
            request.kind,
            request.label.clone(),
        ) else {
            // A fresh chunk fits any request up to its own size.
            debug_assert!(false, "fresh chunk rejected an in-budget request");
            self.release_chunk(&mut chunk);
            return Err(AllocatorError::Internal(
                "fresh chunk rejected an in-budget request".to_string(),
            ));
        };

        let id = self.next_chunk_id.fetch_add(1, Ordering::Relaxed);
        let allocation = self.make_allocation(type_index, id, &chunk, placed, request.size);
        log::debug!(
            "created {:?} chunk {id} ({chunk_size} bytes) in memory type {type_index}",
            request.usage
        );
        self.pools[type_index as usize].lock().push(Arc::new(ChunkEntry {
            id,
            chunk: Mutex::new(chunk),
        }));
        Ok(allocation)
    }

    /// Free a previously returned allocation.
    ///
    /// The handle's `(memory_type_index, chunk_id)` pair is validated
    /// against the live chunk lists; a stale or duplicated handle fails
    /// with [`AllocatorError::InvalidFree`]. Destroys the owning chunk
    /// when this was its last live region.
    pub fn free(&self, allocation: &Allocation) -> Result<(), AllocatorError> {
        let Some(pool) = self.pools.get(allocation.memory_type_index as usize) else {
            log::error!(
                "invalid free: memory type {} out of range",
                allocation.memory_type_index
            );
            return Err(AllocatorError::InvalidFree);
        };

        let entry = {
            let chunks = pool.lock();
            chunks.iter().find(|e| e.id == allocation.chunk_id).cloned()
        };
        let Some(entry) = entry else {
            log::error!(
                "invalid free: chunk {} is not live in memory type {}",
                allocation.chunk_id,
                allocation.memory_type_index
            );
            return Err(AllocatorError::InvalidFree);
        };

        let now_empty = {
            let mut chunk = entry.chunk.lock();
            if let Err(e) = chunk.free(allocation.region_id) {
                log::error!(
                    "invalid free: region {} not live in chunk {}",
                    allocation.region_id,
                    allocation.chunk_id
                );
                return Err(e);
            }
            chunk.is_empty()
        };

        if now_empty {
            self.try_destroy_chunk(allocation.memory_type_index, allocation.chunk_id);
        }
        Ok(())
    }

    /// Summarize current usage.
    pub fn report(&self) -> AllocatorReport {
        let memory_types = self
            .pools
            .iter()
            .map(|pool| {
                let chunks = pool.lock();
                let mut report = MemoryTypeReport {
                    chunk_count: chunks.len(),
                    ..Default::default()
                };
                for entry in chunks.iter() {
                    let chunk = entry.chunk.lock();
                    report.reserved_bytes += chunk.total_size();
                    report.allocated_bytes += chunk.allocated_bytes();
                }
                report
            })
            .collect();
        AllocatorReport { memory_types }
    }

    /// Tear down the allocator, releasing every chunk.
    ///
    /// All allocations should have been freed; any still live are logged
    /// as leaks (with their labels) and their chunks force-released.
    /// Idempotent; also invoked on drop.
    pub fn shutdown(&self) {
        for (type_index, pool) in self.pools.iter().enumerate() {
            let entries = {
                let mut chunks = pool.lock();
                std::mem::take(&mut *chunks)
            };
            for entry in entries {
                let mut chunk = entry.chunk.lock();
                if !chunk.is_empty() {
                    log::error!(
                        "shutdown with {} live bytes in chunk {} (memory type {type_index})",
                        chunk.allocated_bytes(),
                        entry.id
                    );
                    for region in chunk.live_regions() {
                        log::error!(
                            "  leaked {:?} [{}, {}) label {:?}",
                            region.kind,
                            region.offset,
                            region.offset + region.size,
                            region.label.as_deref().unwrap_or("<unnamed>")
                        );
                    }
                }
                self.release_chunk(&mut chunk);
            }
        }
    }

    /// Build the caller-facing handle for a fresh placement.
    fn make_allocation(
        &self,
        memory_type_index: u32,
        chunk_id: u64,
        chunk: &Chunk,
        placed: PlacedRegion,
        size: u64,
    ) -> Allocation {
        let mapped_ptr = chunk.mapped_base().map(|base| {
            // SAFETY: the placement offset is within the mapped block.
            unsafe { NonNull::new_unchecked(base.as_ptr().add(placed.offset as usize)) }
        });
        Allocation {
            memory_type_index,
            chunk_id,
            region_id: placed.region_id,
            offset: placed.offset,
            size,
            mapped_ptr,
        }
    }

    /// Unmap and return a chunk's block to the backend.
    fn release_chunk(&self, chunk: &mut Chunk) {
        let was_mapped = chunk.mapped_base().is_some();
        if let Some(block) = chunk.take_block() {
            log::trace!(
                "releasing {:?} chunk of {} bytes",
                chunk.usage(),
                chunk.total_size()
            );
            if was_mapped {
                self.backend.unmap_block(&block);
            }
            self.backend.free_block(block);
        }
    }

    /// Destroy the chunk if it is still empty.
    ///
    /// Emptiness is re-checked under both locks: a placement may have
    /// raced in between the free and this call, in which case the chunk
    /// stays. Racing placements that hold a stale list snapshot see a
    /// retired chunk and reject.
    fn try_destroy_chunk(&self, memory_type_index: u32, chunk_id: u64) {
        let mut taken: Option<DeviceBlock> = None;
        let mut was_mapped = false;
        {
            let mut chunks = self.pools[memory_type_index as usize].lock();
            if let Some(pos) = chunks.iter().position(|e| e.id == chunk_id) {
                let entry = chunks[pos].clone();
                let mut chunk = entry.chunk.lock();
                if chunk.is_empty() {
                    was_mapped = chunk.mapped_base().is_some();
                    taken = chunk.take_block();
                    drop(chunk);
                    chunks.remove(pos);
                }
            }
        }
        if let Some(block) = taken {
            if was_mapped {
                self.backend.unmap_block(&block);
            }
            log::debug!("destroyed empty chunk {chunk_id} in memory type {memory_type_index}");
            self.backend.free_block(block);
        }
    }
}

impl Drop for DeviceAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
