/* MOD.rs
 *   by Mika
 *
 * Created:
 *   06 Jul 2022, 15:34:27
 * Last edited:
 *   31 Jul 2022, 15:02:48
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Entrypoint to the device memory module: the driver-block pools, the
 *   suballocations handed out of them and the allocators in between.
**/

/// Contains common definitions for the memory allocators.
pub mod spec;
/// Contains the suballocation view handed out to resource code.
pub mod block;
/// Contains the wrapper around one driver block of device memory.
pub mod pool;
/// Contains the allocators that suballocate a single pool.
pub mod allocators;
/// Contains the composite allocators that build policy around the single-pool ones.
pub mod pools;
/// Contains small helpers for the allocators.
pub(crate) mod utils;


// Bring some stuff into the module scope
pub use spec::{Error, MemoryAllocator, MultiAllocator};
pub use block::{Address, MemoryBlock};
pub use pool::MemoryPool;
pub use allocators::{BuddyAllocator, FreeListAllocator, NaiveAllocator};
pub use pools::{ChainAllocator, FallbackAllocator, PolyAllocator};
