//! Bound-resource-group (descriptor set) cache
//!
//! Descriptor sets are grouped by the exact ordered shape of their bindings,
//! the [`GroupSignature`]. Every signature owns, per frame slot, a growing
//! array of sets and a cursor into it. Acquiring a set consumes the set at
//! the cursor; resetting a slot rewinds all of its cursors so the same sets
//! are handed out again once that slot's previous frame has retired.
//!
//! Where the sets come from is behind [`ResourceGroupAllocator`]. The Vulkan
//! backend provides a fixed-capacity descriptor pool per signature.

use ash::vk;

use crate::foundation::collections::FrameSlotId;
use crate::render::api::{VulkanError, VulkanResult};

/// One binding of a resource group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    /// Binding index in the shader
    pub binding: u32,
    /// Resource kind
    pub kind: vk::DescriptorType,
    /// Array length
    pub count: u32,
    /// Shader stages that read the binding
    pub stages: vk::ShaderStageFlags,
    /// Whether the layout bakes in immutable samplers
    pub immutable_samplers: bool,
}

impl BindingSlot {
    /// Single-element binding without immutable samplers
    #[must_use]
    pub const fn new(binding: u32, kind: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self { binding, kind, count: 1, stages, immutable_samplers: false }
    }

    /// Layout binding for this slot
    ///
    /// Immutable samplers are not carried; the Vulkan backend's
    /// `create_descriptor_set_layout` attaches them from a caller slice.
    #[must_use]
    pub fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.kind)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
            .build()
    }
}

impl From<&vk::DescriptorSetLayoutBinding> for BindingSlot {
    fn from(binding: &vk::DescriptorSetLayoutBinding) -> Self {
        Self {
            binding: binding.binding,
            kind: binding.descriptor_type,
            count: binding.descriptor_count,
            stages: binding.stage_flags,
            immutable_samplers: !binding.p_immutable_samplers.is_null(),
        }
    }
}

/// Ordered binding shape of a resource group
///
/// Equality is positional: the same bindings in a different order form a
/// different signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupSignature {
    slots: Vec<BindingSlot>,
}

impl GroupSignature {
    /// Signature from an ordered list of slots
    #[must_use]
    pub fn new(slots: Vec<BindingSlot>) -> Self {
        Self { slots }
    }

    /// Signature of a set of layout bindings, in the given order
    #[must_use]
    pub fn from_bindings(bindings: &[vk::DescriptorSetLayoutBinding]) -> Self {
        Self { slots: bindings.iter().map(BindingSlot::from).collect() }
    }

    /// Start building a signature
    #[must_use]
    pub fn builder() -> GroupSignatureBuilder {
        GroupSignatureBuilder::default()
    }

    /// Slots in order
    #[must_use]
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the group has no bindings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Layout bindings in signature order
    #[must_use]
    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.slots.iter().map(BindingSlot::layout_binding).collect()
    }

    /// Descriptors needed per set, summed by kind, in first-seen order
    #[must_use]
    pub fn descriptor_counts(&self) -> Vec<(vk::DescriptorType, u32)> {
        let mut counts: Vec<(vk::DescriptorType, u32)> = Vec::new();
        for slot in &self.slots {
            match counts.iter_mut().find(|(kind, _)| *kind == slot.kind) {
                Some((_, total)) => *total += slot.count,
                None => counts.push((slot.kind, slot.count)),
            }
        }
        counts
    }
}

/// Builder for [`GroupSignature`]
#[derive(Debug, Default)]
pub struct GroupSignatureBuilder {
    slots: Vec<BindingSlot>,
}

impl GroupSignatureBuilder {
    /// Add a uniform buffer binding
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.slot(BindingSlot::new(binding, vk::DescriptorType::UNIFORM_BUFFER, stages))
    }

    /// Add a combined image sampler binding
    #[must_use]
    pub fn combined_image_sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.slot(BindingSlot::new(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages))
    }

    /// Add a storage buffer binding
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.slot(BindingSlot::new(binding, vk::DescriptorType::STORAGE_BUFFER, stages))
    }

    /// Add an arbitrary slot
    #[must_use]
    pub fn slot(mut self, slot: BindingSlot) -> Self {
        self.slots.push(slot);
        self
    }

    /// Finish the signature
    #[must_use]
    pub fn build(self) -> GroupSignature {
        GroupSignature { slots: self.slots }
    }
}

/// Index of a registered signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureIndex(usize);

impl SignatureIndex {
    /// Raw index, stable for the lifetime of the cache
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Fixed-chunk growth against a fixed capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Sets added per growth step
    pub chunk: u32,
    /// Total sets the backing pool can ever hold
    pub capacity: u32,
}

impl GrowthPolicy {
    /// Number of sets the next growth step allocates when `allocated` sets
    /// already came out of the pool
    pub fn next_batch(&self, allocated: u32) -> VulkanResult<u32> {
        let remaining = self.capacity.saturating_sub(allocated);
        if remaining == 0 {
            return Err(VulkanError::ResourceExhausted {
                resource: "descriptor pool",
                limit: u64::from(self.capacity),
            });
        }
        Ok(self.chunk.min(remaining))
    }
}

/// Source of descriptor sets for the cache
///
/// Implementations decide how sets are backed; the cache only decides when
/// more are needed.
pub trait ResourceGroupAllocator {
    /// Prepare backing storage for a newly seen signature
    fn register(&mut self, index: SignatureIndex, signature: &GroupSignature) -> VulkanResult<()>;

    /// Allocate more sets of `layout` for a slot whose backing array holds
    /// `current_len` sets; must return at least one set or an error
    fn grow(
        &mut self,
        index: SignatureIndex,
        layout: vk::DescriptorSetLayout,
        current_len: usize,
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;
}

#[derive(Debug, Default)]
struct SlotSets {
    sets: Vec<vk::DescriptorSet>,
    start: usize,
}

#[derive(Debug)]
struct SignatureEntry {
    signature: GroupSignature,
    slots: Vec<SlotSets>,
}

/// Signature registry plus per-slot descriptor set cursors
#[derive(Debug)]
pub struct ResourceGroupCache<G> {
    allocator: G,
    entries: Vec<SignatureEntry>,
    slot_count: usize,
}

impl<G: ResourceGroupAllocator> ResourceGroupCache<G> {
    /// Empty cache for `slot_count` frame slots
    pub const fn new(allocator: G, slot_count: usize) -> Self {
        Self { allocator, entries: Vec::new(), slot_count }
    }

    /// Index of `signature`, registering it on first sight
    ///
    /// Linear scan; this runs once per pipeline layout, not per frame.
    pub fn get_or_create_signature_index(&mut self, signature: &GroupSignature) -> VulkanResult<SignatureIndex> {
        if let Some(position) = self.entries.iter().position(|entry| entry.signature == *signature) {
            return Ok(SignatureIndex(position));
        }

        let index = SignatureIndex(self.entries.len());
        self.allocator.register(index, signature)?;
        self.entries.push(SignatureEntry {
            signature: signature.clone(),
            slots: (0..self.slot_count).map(|_| SlotSets::default()).collect(),
        });

        log::debug!("Registered resource group signature {} with {} bindings", index.0, signature.len());
        Ok(index)
    }

    /// Next unused set of a signature in a frame slot, growing the slot's
    /// backing array when it runs out
    pub fn acquire_set(
        &mut self,
        index: SignatureIndex,
        slot: FrameSlotId,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let entry = self
            .entries
            .get_mut(index.0)
            .ok_or_else(|| VulkanError::invalid(format!("unknown resource group signature {}", index.0)))?;
        let sets = entry
            .slots
            .get_mut(slot.index())
            .ok_or_else(|| VulkanError::invalid(format!("{slot} is outside the frame ring")))?;

        if sets.start >= sets.sets.len() {
            let grown = self.allocator.grow(index, layout, sets.sets.len())?;
            if grown.is_empty() {
                return Err(VulkanError::invalid("resource group allocator returned no sets"));
            }
            log::trace!(
                "Signature {} in {slot} grew from {} to {} sets",
                index.0,
                sets.sets.len(),
                sets.sets.len() + grown.len()
            );
            sets.sets.extend(grown);
        }

        let set = sets.sets[sets.start];
        sets.start += 1;
        Ok(set)
    }

    /// Rewind every cursor of a slot to zero
    pub fn reset_slot(&mut self, slot: FrameSlotId) {
        for entry in &mut self.entries {
            if let Some(sets) = entry.slots.get_mut(slot.index()) {
                sets.start = 0;
            }
        }
    }

    /// Cursor of a signature in a slot
    #[must_use]
    pub fn cursor(&self, index: SignatureIndex, slot: FrameSlotId) -> usize {
        self.slot_sets(index, slot).map_or(0, |sets| sets.start)
    }

    /// Backing array length of a signature in a slot
    #[must_use]
    pub fn backing_len(&self, index: SignatureIndex, slot: FrameSlotId) -> usize {
        self.slot_sets(index, slot).map_or(0, |sets| sets.sets.len())
    }

    fn slot_sets(&self, index: SignatureIndex, slot: FrameSlotId) -> Option<&SlotSets> {
        self.entries.get(index.0)?.slots.get(slot.index())
    }

    /// Registered signature by index
    #[must_use]
    pub fn signature(&self, index: SignatureIndex) -> Option<&GroupSignature> {
        self.entries.get(index.0).map(|entry| &entry.signature)
    }

    /// Number of registered signatures
    #[must_use]
    pub fn signature_count(&self) -> usize {
        self.entries.len()
    }

    /// Backing allocator
    pub const fn allocator(&self) -> &G {
        &self.allocator
    }

    /// Mutable backing allocator
    pub fn allocator_mut(&mut self) -> &mut G {
        &mut self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::FrameRing;
    use crate::render::testing::MockGroupAllocator;

    fn slots(count: usize) -> Vec<FrameSlotId> {
        let ring = FrameRing::new(count, |id| id);
        let ids = ring.iter().map(|(id, _)| id).collect();
        ids
    }

    fn camera_signature() -> GroupSignature {
        GroupSignature::builder()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .build()
    }

    #[test]
    fn test_identical_signatures_share_index() {
        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(64, 8), 2);
        let a = cache.get_or_create_signature_index(&camera_signature()).unwrap();
        let b = cache.get_or_create_signature_index(&camera_signature()).unwrap();

        assert_eq!(a, b);
        assert_eq!(cache.signature_count(), 1);
        assert_eq!(cache.allocator().registered.len(), 1);
    }

    #[test]
    fn test_signature_from_layout_bindings_matches_builder() {
        let bindings = camera_signature().layout_bindings();
        assert_eq!(GroupSignature::from_bindings(&bindings), camera_signature());
    }

    #[test]
    fn test_any_differing_tuple_field_gives_new_index() {
        let base = camera_signature();
        let mut variants = Vec::new();
        for change in 0..5 {
            let mut slots = base.slots().to_vec();
            let slot = &mut slots[1];
            match change {
                0 => slot.binding = 2,
                1 => slot.kind = vk::DescriptorType::SAMPLED_IMAGE,
                2 => slot.count = 4,
                3 => slot.stages |= vk::ShaderStageFlags::VERTEX,
                _ => slot.immutable_samplers = true,
            }
            variants.push(GroupSignature::new(slots));
        }

        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(64, 8), 1);
        let base_index = cache.get_or_create_signature_index(&base).unwrap();
        for variant in &variants {
            assert_ne!(cache.get_or_create_signature_index(variant).unwrap(), base_index);
        }
        assert_eq!(cache.signature_count(), 6);
    }

    #[test]
    fn test_signature_equality_is_positional() {
        let forward = camera_signature();
        let mut reversed_slots = forward.slots().to_vec();
        reversed_slots.reverse();
        let reversed = GroupSignature::new(reversed_slots);

        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(64, 8), 1);
        let a = cache.get_or_create_signature_index(&forward).unwrap();
        let b = cache.get_or_create_signature_index(&reversed).unwrap();
        assert_ne!(a, b);

        let prefix = GroupSignature::new(forward.slots()[..1].to_vec());
        assert_ne!(cache.get_or_create_signature_index(&prefix).unwrap(), a);
    }

    #[test]
    fn test_acquire_grows_in_chunks_and_advances_cursor() {
        let slots = slots(2);
        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(64, 4), 2);
        let index = cache.get_or_create_signature_index(&camera_signature()).unwrap();
        let layout = vk::DescriptorSetLayout::null();

        let acquired: Vec<_> = (0..5).map(|_| cache.acquire_set(index, slots[0], layout).unwrap()).collect();
        assert_eq!(cache.cursor(index, slots[0]), 5);
        assert_eq!(cache.backing_len(index, slots[0]), 8);
        assert_eq!(cache.allocator().grow_calls, 2);

        let mut unique = acquired.clone();
        unique.sort_by_key(|set| ash::vk::Handle::as_raw(*set));
        unique.dedup();
        assert_eq!(unique.len(), 5);

        // The other slot is untouched
        assert_eq!(cache.cursor(index, slots[1]), 0);
        assert_eq!(cache.backing_len(index, slots[1]), 0);
    }

    #[test]
    fn test_reset_slot_hands_out_same_sets_again() {
        let slots = slots(2);
        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(64, 4), 2);
        let index = cache.get_or_create_signature_index(&camera_signature()).unwrap();
        let layout = vk::DescriptorSetLayout::null();

        let first = cache.acquire_set(index, slots[0], layout).unwrap();
        let second = cache.acquire_set(index, slots[0], layout).unwrap();
        let other_slot = cache.acquire_set(index, slots[1], layout).unwrap();

        cache.reset_slot(slots[0]);
        assert_eq!(cache.cursor(index, slots[0]), 0);
        assert_eq!(cache.cursor(index, slots[1]), 1);
        assert_eq!(cache.acquire_set(index, slots[0], layout).unwrap(), first);
        assert_eq!(cache.acquire_set(index, slots[0], layout).unwrap(), second);
        assert_ne!(first, other_slot);
        assert_eq!(cache.allocator().grow_calls, 2);
    }

    #[test]
    fn test_exhausted_pool_is_fatal() {
        let slots = slots(1);
        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(3, 2), 1);
        let index = cache.get_or_create_signature_index(&camera_signature()).unwrap();
        let layout = vk::DescriptorSetLayout::null();

        for _ in 0..3 {
            cache.acquire_set(index, slots[0], layout).unwrap();
        }
        let err = cache.acquire_set(index, slots[0], layout).unwrap_err();
        assert!(matches!(err, VulkanError::ResourceExhausted { limit: 3, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unknown_signature_is_rejected() {
        let slots = slots(1);
        let mut cache = ResourceGroupCache::new(MockGroupAllocator::new(3, 2), 1);
        let bogus = SignatureIndex(7);
        assert!(matches!(
            cache.acquire_set(bogus, slots[0], vk::DescriptorSetLayout::null()),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_growth_policy_clips_to_remaining_capacity() {
        let policy = GrowthPolicy { chunk: 128, capacity: 300 };
        assert_eq!(policy.next_batch(0).unwrap(), 128);
        assert_eq!(policy.next_batch(256).unwrap(), 44);
        assert!(matches!(policy.next_batch(300), Err(VulkanError::ResourceExhausted { limit: 300, .. })));
    }

    #[test]
    fn test_descriptor_counts_sum_by_kind() {
        let signature = GroupSignature::builder()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .uniform_buffer(2, vk::ShaderStageFlags::FRAGMENT)
            .slot(BindingSlot { count: 3, ..BindingSlot::new(3, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT) })
            .build();
        assert_eq!(
            signature.descriptor_counts(),
            vec![(vk::DescriptorType::UNIFORM_BUFFER, 2), (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4)]
        );
    }
}
