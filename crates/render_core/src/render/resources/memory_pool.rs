//! Size-bucketed GPU buffer pools
//!
//! Each [`BufferClass`] gets one [`MemoryPool`]. A pool keeps a stack of
//! freed buffers per bucket and hands them back out before asking the device
//! for new memory, so a steady-state frame performs no device allocations.
//!
//! Buckets come from a sorted table of canonical sizes. A request lands in
//! the smallest bucket that fits it and new buffers are created at that
//! bucket's canonical size. Requests larger than the biggest bucket go to the
//! overflow bucket, which keeps exact sizes and reuses an entry only if it is
//! not more than `overflow_reuse_ratio` times larger than the request.

use ash::vk;

use crate::core::config::MemoryPoolConfig;
use crate::render::api::{BufferClass, GpuBuffer, MemoryDevice, ResourceLifetime, VulkanError, VulkanResult};

/// Sorted table of canonical bucket sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTable {
    sizes: Vec<vk::DeviceSize>,
}

impl BucketTable {
    /// Build a table from strictly increasing, non-zero sizes
    pub fn new(sizes: impl Into<Vec<vk::DeviceSize>>) -> VulkanResult<Self> {
        let sizes = sizes.into();
        if sizes.is_empty() || sizes[0] == 0 || sizes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(VulkanError::invalid(format!(
                "bucket sizes must be non-empty, non-zero and strictly increasing: {sizes:?}"
            )));
        }
        Ok(Self { sizes })
    }

    /// Index of the smallest bucket that holds `size`, or
    /// [`overflow_index`](Self::overflow_index) if none does
    #[must_use]
    pub fn bucket_for(&self, size: vk::DeviceSize) -> usize {
        self.sizes.partition_point(|&bucket| bucket < size)
    }

    /// Index of the overflow bucket
    #[must_use]
    pub fn overflow_index(&self) -> usize {
        self.sizes.len()
    }

    /// Capacity a new allocation in `bucket` is created with
    #[must_use]
    pub fn canonical_size(&self, bucket: usize, requested: vk::DeviceSize) -> vk::DeviceSize {
        self.sizes.get(bucket).copied().unwrap_or(requested)
    }

    /// Canonical sizes, smallest first
    #[must_use]
    pub fn sizes(&self) -> &[vk::DeviceSize] {
        &self.sizes
    }
}

/// Free-list allocator for one buffer class
#[derive(Debug)]
pub struct MemoryPool {
    class: BufferClass,
    table: BucketTable,
    /// One stack per bucket plus the overflow list at the end
    stashes: Vec<Vec<GpuBuffer>>,
    overflow_reuse_ratio: f64,
    allocations_created: usize,
}

impl MemoryPool {
    /// Select the class's memory type and create empty stashes
    pub fn init(device: &mut impl MemoryDevice, class: BufferClass, config: &MemoryPoolConfig) -> VulkanResult<Self> {
        let table = BucketTable::new(config.bucket_sizes.clone())?;
        device.prepare_memory_class(class)?;

        log::debug!(
            "Initialised {:?} memory pool with {} buckets (overflow ratio {})",
            class,
            table.sizes().len(),
            config.overflow_reuse_ratio
        );

        Ok(Self {
            class,
            stashes: vec![Vec::new(); table.overflow_index() + 1],
            table,
            overflow_reuse_ratio: config.overflow_reuse_ratio,
            allocations_created: 0,
        })
    }

    /// Hand out a buffer of at least `size` bytes, optionally filled with `data`
    ///
    /// `data` may only be given for host-visible classes and must fit in `size`.
    pub fn alloc(
        &mut self,
        device: &mut impl MemoryDevice,
        data: Option<&[u8]>,
        size: vk::DeviceSize,
    ) -> VulkanResult<GpuBuffer> {
        if let Some(bytes) = data {
            if !self.class.is_host_visible() {
                return Err(VulkanError::invalid(format!(
                    "{:?} buffers are not host visible; upload through a staging buffer",
                    self.class
                )));
            }
            if bytes.len() as vk::DeviceSize > size {
                return Err(VulkanError::invalid(format!(
                    "{} bytes of data do not fit a {size} byte buffer",
                    bytes.len()
                )));
            }
        }

        let bucket = self.table.bucket_for(size);
        let handle = match self.take_stashed(bucket, size) {
            Some(handle) => handle,
            None => {
                let capacity = self.table.canonical_size(bucket, size);
                let (buffer, allocation) = device.create_buffer(self.class, capacity)?;
                self.allocations_created += 1;
                log::trace!("{:?} pool created {capacity} byte buffer for {size} byte request", self.class);
                GpuBuffer { buffer, allocation, capacity, class: self.class, lifetime: ResourceLifetime::Persistent }
            }
        };

        if let Some(bytes) = data {
            device.write_buffer(handle.allocation, bytes)?;
        }

        Ok(GpuBuffer { lifetime: ResourceLifetime::Persistent, ..handle })
    }

    fn take_stashed(&mut self, bucket: usize, size: vk::DeviceSize) -> Option<GpuBuffer> {
        let ratio = self.overflow_reuse_ratio;
        let stash = &mut self.stashes[bucket];

        if bucket == self.table.overflow_index() {
            #[allow(clippy::cast_precision_loss)]
            let fits = |capacity: vk::DeviceSize| capacity >= size && (capacity as f64) < ratio * size as f64;
            let position = stash.iter().position(|handle| fits(handle.capacity))?;
            Some(stash.swap_remove(position))
        } else {
            stash.pop()
        }
    }

    /// Return a buffer to the stash matching its committed capacity
    ///
    /// The caller guarantees the GPU no longer uses the buffer; frame-local
    /// buffers go through the frame tracker instead of coming here directly.
    pub fn free(&mut self, handle: GpuBuffer) {
        debug_assert!(!handle.is_null(), "freeing a null buffer handle");
        debug_assert_eq!(handle.class, self.class, "buffer freed into the wrong pool");

        let bucket = self.table.bucket_for(handle.capacity);
        let stash = &mut self.stashes[bucket];
        debug_assert!(
            !stash.iter().any(|stashed| stashed.buffer == handle.buffer),
            "buffer {:?} freed twice",
            handle.buffer
        );
        stash.push(handle);
    }

    /// Destroy every stashed buffer; buffers still handed out are not touched
    pub fn destroy(&mut self, device: &mut impl MemoryDevice) {
        let mut destroyed = 0usize;
        for handle in self.stashes.iter_mut().flat_map(|stash| stash.drain(..)) {
            device.destroy_buffer(handle.buffer, handle.allocation);
            destroyed += 1;
        }
        log::debug!("Destroyed {destroyed} stashed {:?} buffers", self.class);
    }

    /// Number of device allocations this pool has created
    #[must_use]
    pub const fn allocations_created(&self) -> usize {
        self.allocations_created
    }

    /// Number of buffers waiting in all stashes
    #[must_use]
    pub fn stashed_count(&self) -> usize {
        self.stashes.iter().map(Vec::len).sum()
    }

    /// Whether a specific buffer is currently stashed
    #[must_use]
    pub fn is_stashed(&self, buffer: vk::Buffer) -> bool {
        self.stashes.iter().flatten().any(|handle| handle.buffer == buffer)
    }

    /// Buffer class served by this pool
    #[must_use]
    pub const fn class(&self) -> BufferClass {
        self.class
    }

    /// Bucket table in use
    #[must_use]
    pub const fn table(&self) -> &BucketTable {
        &self.table
    }
}

/// One pool per buffer class
#[derive(Debug)]
pub struct MemoryPools {
    pools: [MemoryPool; 4],
}

impl MemoryPools {
    /// Initialise a pool for every class
    pub fn init(device: &mut impl MemoryDevice, config: &MemoryPoolConfig) -> VulkanResult<Self> {
        Ok(Self {
            pools: [
                MemoryPool::init(device, BufferClass::Transfer, config)?,
                MemoryPool::init(device, BufferClass::Vertex, config)?,
                MemoryPool::init(device, BufferClass::Index, config)?,
                MemoryPool::init(device, BufferClass::Uniform, config)?,
            ],
        })
    }

    /// Pool for a class
    #[must_use]
    pub fn get(&self, class: BufferClass) -> &MemoryPool {
        &self.pools[class.index()]
    }

    /// Mutable pool for a class
    pub fn get_mut(&mut self, class: BufferClass) -> &mut MemoryPool {
        &mut self.pools[class.index()]
    }

    /// Return a buffer to the pool of its class
    pub fn free(&mut self, handle: GpuBuffer) {
        self.get_mut(handle.class).free(handle);
    }

    /// Whether a buffer is stashed in its class's pool
    #[must_use]
    pub fn is_stashed(&self, handle: &GpuBuffer) -> bool {
        self.get(handle.class).is_stashed(handle.buffer)
    }

    /// Destroy every stashed buffer of every class
    pub fn destroy(&mut self, device: &mut impl MemoryDevice) {
        for pool in &mut self.pools {
            pool.destroy(device);
        }
    }
}
