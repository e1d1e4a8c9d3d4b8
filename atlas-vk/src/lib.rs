/* LIB.rs
 *   by Mika
 *
 * Created:
 *   04 Jul 2022, 09:12:44
 * Last edited:
 *   31 Jul 2022, 15:47:36
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Entrypoint to the Atlas wrapper around Vulkan. This crate hosts the
 *   device-memory allocation subsystem: suballocating coarse driver
 *   blocks of device memory into the fine-grained regions that back
 *   buffers and images.
**/

/// The module for wrapper structs, enums & flags around Vulkan values.
pub mod auxillary;
/// The module for the device-side boundary of the allocators.
pub mod device;
/// The module for the various pools.
pub mod pools;

// Bring some components into the general package namespace
pub use auxillary::enums::MemoryAllocatorKind;
pub use auxillary::flags::{Flags, MemoryPropertyFlags};
pub use auxillary::structs::{DeviceMemoryType, DeviceMemoryTypeFlags, MemoryRequirements, MemoryTypeCriteria};
pub use device::{Device, DeviceMemoryTypeInfo, MemoryDevice};
pub use pools::errors::AllocationError;
pub use pools::memory::{
    Address, BuddyAllocator, ChainAllocator, FallbackAllocator, FreeListAllocator, MemoryAllocator, MemoryBlock, MemoryPool, MultiAllocator,
    NaiveAllocator, PolyAllocator,
};
