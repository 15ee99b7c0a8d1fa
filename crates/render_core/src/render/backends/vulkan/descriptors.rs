//! Descriptor pools, layouts and writes
//!
//! Each registered signature gets one fixed-capacity `vk::DescriptorPool`
//! sized for `max_sets_per_signature` sets of that signature. Sets are
//! allocated eagerly in chunks and never freed individually; the cache
//! recycles them through per-slot cursors.

use ash::vk;

use crate::core::config::ResourceGroupConfig;
use crate::render::api::{VulkanError, VulkanResult};
use crate::render::resources::{GroupSignature, GrowthPolicy, ResourceGroupAllocator, SignatureIndex};

/// Create a descriptor set layout for `signature`, bindings in signature order
///
/// Slots flagged with immutable samplers take `count` samplers each from
/// `immutable_samplers`, in slot order. The slice must be used up exactly.
pub fn create_descriptor_set_layout(
    device: &ash::Device,
    signature: &GroupSignature,
    immutable_samplers: &[vk::Sampler],
) -> VulkanResult<vk::DescriptorSetLayout> {
    let bindings = layout_bindings(signature, immutable_samplers)?;
    let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(VulkanError::Api)
}

/// Layout bindings pointing into `immutable_samplers`
fn layout_bindings(
    signature: &GroupSignature,
    immutable_samplers: &[vk::Sampler],
) -> VulkanResult<Vec<vk::DescriptorSetLayoutBinding>> {
    let mut remaining = immutable_samplers;
    let mut bindings = Vec::with_capacity(signature.len());

    for slot in signature.slots() {
        let mut binding = slot.layout_binding();
        if slot.immutable_samplers {
            let count = slot.count as usize;
            if remaining.len() < count {
                return Err(VulkanError::invalid(format!(
                    "binding {} needs {count} immutable samplers, {} left",
                    slot.binding,
                    remaining.len()
                )));
            }
            let (samplers, rest) = remaining.split_at(count);
            binding.p_immutable_samplers = samplers.as_ptr();
            remaining = rest;
        }
        bindings.push(binding);
    }

    if !remaining.is_empty() {
        return Err(VulkanError::invalid(format!("{} immutable samplers not used by any binding", remaining.len())));
    }
    Ok(bindings)
}

#[derive(Debug)]
struct SignaturePool {
    pool: vk::DescriptorPool,
    allocated: u32,
}

/// One fixed descriptor pool per signature
pub struct DescriptorPoolAllocator {
    device: ash::Device,
    policy: GrowthPolicy,
    pools: Vec<SignaturePool>,
}

impl DescriptorPoolAllocator {
    /// Allocator sized by the resource group configuration
    pub fn new(device: ash::Device, config: &ResourceGroupConfig) -> Self {
        Self {
            device,
            policy: GrowthPolicy { chunk: config.growth_chunk, capacity: config.max_sets_per_signature },
            pools: Vec::new(),
        }
    }

    /// Sets handed out so far for a signature
    pub fn allocated(&self, index: SignatureIndex) -> u32 {
        self.pools.get(index.index()).map_or(0, |entry| entry.allocated)
    }
}

/// Pool sizes for `max_sets` sets of `signature`
fn pool_sizes(signature: &GroupSignature, max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let sizes: Vec<_> = signature
        .descriptor_counts()
        .into_iter()
        .map(|(ty, count)| vk::DescriptorPoolSize { ty, descriptor_count: count.saturating_mul(max_sets) })
        .collect();

    // A pool needs at least one size even for sets without bindings
    if sizes.is_empty() {
        return vec![vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 1 }];
    }
    sizes
}

impl ResourceGroupAllocator for DescriptorPoolAllocator {
    fn register(&mut self, index: SignatureIndex, signature: &GroupSignature) -> VulkanResult<()> {
        if index.index() != self.pools.len() {
            return Err(VulkanError::invalid(format!(
                "signature {} registered out of order ({} known)",
                index.index(),
                self.pools.len()
            )));
        }

        let sizes = pool_sizes(signature, self.policy.capacity);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(self.policy.capacity)
            .pool_sizes(&sizes);
        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| VulkanError::InitializationFailed(format!("descriptor pool: {e:?}")))?;

        log::debug!(
            "Descriptor pool for signature {} holds {} sets ({} bindings)",
            index.index(),
            self.policy.capacity,
            signature.len()
        );
        self.pools.push(SignaturePool { pool, allocated: 0 });
        Ok(())
    }

    fn grow(
        &mut self,
        index: SignatureIndex,
        layout: vk::DescriptorSetLayout,
        current_len: usize,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let entry = self
            .pools
            .get_mut(index.index())
            .ok_or_else(|| VulkanError::invalid(format!("signature {} was never registered", index.index())))?;

        let batch = self.policy.next_batch(entry.allocated).map_err(|e| {
            log::error!("Descriptor pool for signature {} exhausted", index.index());
            e
        })?;

        let layouts = vec![layout; batch as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(entry.pool)
            .set_layouts(&layouts);

        let sets = match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                return Err(VulkanError::ResourceExhausted {
                    resource: "descriptor pool",
                    limit: u64::from(self.policy.capacity),
                });
            }
            Err(e) => return Err(VulkanError::Api(e)),
        };

        entry.allocated += batch;
        log::trace!(
            "Signature {} grew by {batch} sets (slot held {current_len}, pool {}/{})",
            index.index(),
            entry.allocated,
            self.policy.capacity
        );
        Ok(sets)
    }
}

impl Drop for DescriptorPoolAllocator {
    fn drop(&mut self) {
        unsafe {
            for entry in &self.pools {
                self.device.destroy_descriptor_pool(entry.pool, None);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingWrite {
    Buffer { set: vk::DescriptorSet, binding: u32, kind: vk::DescriptorType, info: usize },
    Image { set: vk::DescriptorSet, binding: u32, info: usize },
}

/// Batches descriptor updates and applies them in one call
///
/// Infos are stored first and the `vk::WriteDescriptorSet`s pointing into
/// them are built only when the batch is applied.
#[derive(Debug, Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
}

impl DescriptorSetWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a uniform buffer range
    #[must_use]
    pub fn write_buffer(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.push_buffer(set, binding, vk::DescriptorType::UNIFORM_BUFFER, buffer, offset, range)
    }

    /// Write a storage buffer range
    #[must_use]
    pub fn write_storage_buffer(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.push_buffer(set, binding, vk::DescriptorType::STORAGE_BUFFER, buffer, offset, range)
    }

    fn push_buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        kind: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        self.buffer_infos.push(vk::DescriptorBufferInfo { buffer, offset, range });
        self.pending.push(PendingWrite::Buffer { set, binding, kind, info: self.buffer_infos.len() - 1 });
        self
    }

    /// Write a combined image sampler
    #[must_use]
    pub fn write_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.image_infos.push(vk::DescriptorImageInfo { sampler, image_view, image_layout: layout });
        self.pending.push(PendingWrite::Image { set, binding, info: self.image_infos.len() - 1 });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes borrowing this writer's infos
    fn writes(&self) -> Vec<vk::WriteDescriptorSet> {
        self.pending
            .iter()
            .map(|write| match *write {
                PendingWrite::Buffer { set, binding, kind, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .dst_array_element(0)
                    .descriptor_type(kind)
                    .buffer_info(std::slice::from_ref(&self.buffer_infos[info]))
                    .build(),
                PendingWrite::Image { set, binding, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(&self.image_infos[info]))
                    .build(),
            })
            .collect()
    }

    /// Execute all write operations
    pub fn update(self, device: &ash::Device) {
        if self.is_empty() {
            return;
        }
        let writes = self.writes();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}
