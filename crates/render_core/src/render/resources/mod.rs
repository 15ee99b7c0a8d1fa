//! GPU resource management: pooled buffers, descriptor caching and
//! per-frame transient tracking

pub mod frame_resources;
pub mod memory_pool;
pub mod resource_groups;

pub use frame_resources::{FrameResources, RetiredCounts};
pub use memory_pool::{BucketTable, MemoryPool, MemoryPools};
pub use resource_groups::{
    BindingSlot, GroupSignature, GroupSignatureBuilder, GrowthPolicy, ResourceGroupAllocator, ResourceGroupCache,
    SignatureIndex,
};
