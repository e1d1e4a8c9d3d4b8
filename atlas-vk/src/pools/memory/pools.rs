/* POOLS.rs
 *   by Mika
 *
 * Created:
 *   09 Jul 2022, 11:40:22
 * Last edited:
 *   31 Jul 2022, 16:44:07
 * Auto updated?
 *   Yes
 *
 * Description:
 *   The composite allocators that build policy around the single-pool
 *   ones: an elastic chain that grows by allocating new pools on demand,
 *   a fallback that routes refused requests to a naive backup, and a
 *   poly allocator that dispatches between memory types.
**/

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use log::warn;

pub use crate::pools::errors::AllocationError as Error;
use crate::auxillary::enums::MemoryAllocatorKind;
use crate::auxillary::structs::{DeviceMemoryType, MemoryRequirements, MemoryTypeCriteria};
use crate::device::MemoryDevice;
use crate::pools::memory::allocators::{BuddyAllocator, FreeListAllocator, NaiveAllocator};
use crate::pools::memory::block::{Address, MemoryBlock};
use crate::pools::memory::pool::MemoryPool;
use crate::pools::memory::spec::{MemoryAllocator, MultiAllocator};


/***** UNIT TESTS *****/





/***** AUXILLARY STRUCTS *****/
/// One link of a [`ChainAllocator`]: an allocator over one pool, plus the addresses it has outstanding.
struct ChainLink<T> {
    /// The addresses of the blocks this link has handed out.
    allocations : HashSet<Address>,
    /// The allocator owning this link's pool.
    allocator   : T,
}

/// The per-type state of a [`PolyAllocator`]: a sub-allocator plus the addresses it has outstanding.
struct PolyEntry {
    /// The addresses of the blocks this type has handed out.
    allocations : HashSet<Address>,
    /// The allocator serving this memory type.
    allocator   : Box<dyn MemoryAllocator>,
}





/***** LIBRARY *****/
/// An elastic allocator over a single memory type that chains allocators of fixed-size pools, allocating a new pool whenever the existing ones are full.
pub struct ChainAllocator<T> {
    /// The device where the chain's pools live.
    device    : Rc<dyn MemoryDevice>,
    /// The memory type that all pools in the chain are allocated on.
    mem_type  : DeviceMemoryType,
    /// The size (in bytes) of each pool in the chain.
    pool_size : usize,

    /// The function that wraps a freshly allocated pool in a new link's allocator.
    make_link : Box<dyn FnMut(Rc<MemoryPool>) -> T>,
    /// The links of the chain, in insertion order. Links are never reordered or removed.
    links     : Vec<ChainLink<T>>,
}

impl<T: MemoryAllocator> ChainAllocator<T> {
    /// Constructor for the ChainAllocator.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice to allocate the chain's pools on.
    /// - `mem_type`: The DeviceMemoryType to allocate the chain's pools on.
    /// - `pool_size`: The size (in bytes) of every pool in the chain.
    /// - `make_link`: A function that wraps each freshly allocated pool in the link's allocator.
    ///
    /// # Returns
    /// A new ChainAllocator with its first link already created.
    ///
    /// # Errors
    /// This function errors if the driver could not allocate the first pool.
    pub fn new(device: Rc<dyn MemoryDevice>, mem_type: DeviceMemoryType, pool_size: usize, make_link: impl FnMut(Rc<MemoryPool>) -> T + 'static) -> Result<Self, Error> {
        let mut result: Self = Self {
            device,
            mem_type,
            pool_size,

            make_link : Box::new(make_link),
            links     : Vec::new(),
        };
        result.extend_chain()?;
        Ok(result)
    }



    /// Appends a new link to the chain by allocating a fresh pool.
    ///
    /// # Errors
    /// This function errors if the driver could not allocate the pool.
    fn extend_chain(&mut self) -> Result<(), Error> {
        let pool: Rc<MemoryPool> = MemoryPool::allocate(self.device.clone(), self.mem_type, self.pool_size)?;
        self.links.push(ChainLink {
            allocations : HashSet::new(),
            allocator   : (self.make_link)(pool),
        });
        Ok(())
    }



    /// Returns the number of links currently in the chain.
    #[inline]
    pub fn num_links(&self) -> usize { self.links.len() }

    /// Returns the size (in bytes) of the pools this chain creates.
    #[inline]
    pub fn pool_size(&self) -> usize { self.pool_size }
}

impl ChainAllocator<FreeListAllocator> {
    /// Shortcut constructor for a chain of free-list allocators.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice to allocate the chain's pools on.
    /// - `mem_type`: The DeviceMemoryType to allocate the chain's pools on.
    /// - `pool_size`: The size (in bytes) of every pool in the chain.
    ///
    /// # Errors
    /// This function errors if the driver could not allocate the first pool.
    #[inline]
    pub fn free_list(device: Rc<dyn MemoryDevice>, mem_type: DeviceMemoryType, pool_size: usize) -> Result<Self, Error> {
        Self::new(device, mem_type, pool_size, FreeListAllocator::new)
    }
}

impl ChainAllocator<BuddyAllocator> {
    /// Shortcut constructor for a chain of buddy allocators.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice to allocate the chain's pools on.
    /// - `mem_type`: The DeviceMemoryType to allocate the chain's pools on.
    /// - `pool_size`: The size (in bytes) of every pool in the chain. Must satisfy the buddy allocator's power-of-two constraints.
    /// - `min_granularity`: The smallest block size the buddy allocators will split down to.
    ///
    /// # Errors
    /// This function errors if the driver could not allocate the first pool.
    #[inline]
    pub fn buddy(device: Rc<dyn MemoryDevice>, mem_type: DeviceMemoryType, pool_size: usize, min_granularity: usize) -> Result<Self, Error> {
        Self::new(device, mem_type, pool_size, move |pool| BuddyAllocator::new(pool, min_granularity))
    }
}

impl<T: MemoryAllocator + 'static> MemoryAllocator for ChainAllocator<T> {
    /// Returns a newly allocated block from the first link that can serve it.
    ///
    /// Links are tried in insertion order; if all of them are exhausted, a new link is appended and tried once.
    ///
    /// # Arguments
    /// - `reqs`: The memory requirements of the new memory block.
    ///
    /// # Errors
    /// This function errors with `Error::InsufficientPoolSize` as soon as one link reports it (no later link of the same pool size would succeed), or `Error::OutOfMemory` if the chain could not grow.
    fn allocate(&mut self, reqs: &MemoryRequirements) -> Result<MemoryBlock, Error> {
        // Try every link in insertion order
        for link in &mut self.links {
            match link.allocator.allocate(reqs) {
                Ok(block)                     => { link.allocations.insert(block.address()); return Ok(block); },
                Err(Error::OutOfMemory{ .. }) => { continue; },
                // A request too large for one pool is too large for every pool in this chain
                Err(err)                      => { return Err(err); },
            }
        }

        // All links are full; grow the chain and try once more on the fresh link
        self.extend_chain()?;
        let link: &mut ChainLink<T> = match self.links.last_mut() {
            Some(link) => link,
            None       => { panic!("ChainAllocator has no links after extending the chain"); }
        };
        let block: MemoryBlock = link.allocator.allocate(reqs)?;
        link.allocations.insert(block.address());
        Ok(block)
    }

    /// Frees an allocated memory block by routing it to the link that created it.
    ///
    /// # Arguments
    /// - `block`: The MemoryBlock to free.
    ///
    /// # Panics
    /// This function panics if no link in the chain handed out the block's address.
    fn free(&mut self, block: MemoryBlock) {
        for link in &mut self.links {
            if link.allocations.remove(&block.address()) {
                link.allocator.free(block);
                return;
            }
        }
        panic!("Given MemoryBlock was not allocated with this ChainAllocator");
    }



    /// Returns the type of this allocator.
    #[inline]
    fn kind(&self) -> MemoryAllocatorKind { MemoryAllocatorKind::Chain }

    /// Returns the device that this allocator allocates on.
    #[inline]
    fn device(&self) -> &Rc<dyn MemoryDevice> { &self.device }

    /// Returns the memory type that this allocator allocates on.
    #[inline]
    fn memory_type(&self) -> DeviceMemoryType { self.mem_type }

    /// Returns the number of bytes currently handed out by this allocator.
    #[inline]
    fn size(&self) -> usize { self.links.iter().map(|link| link.allocator.size()).sum() }

    /// Returns the total number of bytes managed by this allocator.
    #[inline]
    fn capacity(&self) -> usize { self.links.iter().map(|link| link.allocator.capacity()).sum() }
}



/// Wraps a main allocator and routes the requests it refuses to a naive backup that sizes its pools to the request.
pub struct FallbackAllocator<T> {
    /// The allocator that serves requests first.
    main                 : T,
    /// The naive backup for the requests the main allocator refuses.
    fallback             : NaiveAllocator,
    /// The addresses of the blocks served by the backup.
    fallback_allocations : HashSet<Address>,
}

impl<T: MemoryAllocator> FallbackAllocator<T> {
    /// Constructor for the FallbackAllocator.
    ///
    /// # Arguments
    /// - `main`: The allocator to serve requests with first. The backup is created on the same device and memory type.
    pub fn new(main: T) -> Self {
        let fallback: NaiveAllocator = NaiveAllocator::new(main.device().clone(), main.memory_type());
        Self {
            main,
            fallback,
            fallback_allocations : HashSet::new(),
        }
    }
}

impl<T: MemoryAllocator + 'static> MemoryAllocator for FallbackAllocator<T> {
    /// Returns a newly allocated block from the main allocator, or from the backup if the main one refuses.
    ///
    /// # Arguments
    /// - `reqs`: The memory requirements of the new memory block.
    ///
    /// # Errors
    /// This function errors only if both allocators refuse the request.
    fn allocate(&mut self, reqs: &MemoryRequirements) -> Result<MemoryBlock, Error> {
        match self.main.allocate(reqs) {
            Ok(block) => Ok(block),

            // Both refusals mean the backup gets a try
            Err(Error::OutOfMemory{ .. }) | Err(Error::InsufficientPoolSize{ .. }) => {
                let block: MemoryBlock = self.fallback.allocate(reqs)?;
                self.fallback_allocations.insert(block.address());
                Ok(block)
            },
        }
    }

    /// Frees an allocated memory block, routing it to whichever of the two allocators created it.
    ///
    /// # Arguments
    /// - `block`: The MemoryBlock to free.
    fn free(&mut self, block: MemoryBlock) {
        if self.fallback_allocations.remove(&block.address()) {
            self.fallback.free(block);
        } else {
            self.main.free(block);
        }
    }



    /// Returns the type of this allocator.
    #[inline]
    fn kind(&self) -> MemoryAllocatorKind { MemoryAllocatorKind::Fallback }

    /// Returns the device that this allocator allocates on.
    #[inline]
    fn device(&self) -> &Rc<dyn MemoryDevice> { self.main.device() }

    /// Returns the memory type that this allocator allocates on.
    #[inline]
    fn memory_type(&self) -> DeviceMemoryType { self.main.memory_type() }

    /// Returns the number of bytes currently handed out by this allocator.
    #[inline]
    fn size(&self) -> usize { self.main.size() + self.fallback.size() }

    /// Returns the total number of bytes managed by this allocator.
    #[inline]
    fn capacity(&self) -> usize { self.main.capacity() + self.fallback.capacity() }
}



/// Dispatches allocations between memory types: each request is routed to a per-type sub-allocator, created lazily for the best type that satisfies the request's criteria.
pub struct PolyAllocator {
    /// The device whose memory types are dispatched over.
    device         : Rc<dyn MemoryDevice>,
    /// The function that creates the sub-allocator for a memory type the first time it is needed.
    make_allocator : Box<dyn FnMut(Rc<dyn MemoryDevice>, DeviceMemoryType) -> Result<Box<dyn MemoryAllocator>, Error>>,
    /// The sub-allocators created so far, by memory type.
    types          : BTreeMap<DeviceMemoryType, PolyEntry>,
}

impl PolyAllocator {
    /// The pool size used by the shortcut constructors unless told otherwise.
    pub const DEFAULT_POOL_SIZE: usize = 4 * 1024 * 1024;


    /// Constructor for the PolyAllocator.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice whose memory types are dispatched over.
    /// - `make_allocator`: A function that creates the sub-allocator for a memory type the first time a request selects it.
    pub fn new(device: Rc<dyn MemoryDevice>, make_allocator: impl FnMut(Rc<dyn MemoryDevice>, DeviceMemoryType) -> Result<Box<dyn MemoryAllocator>, Error> + 'static) -> Self {
        Self {
            device,
            make_allocator : Box::new(make_allocator),
            types          : BTreeMap::new(),
        }
    }

    /// Shortcut constructor that serves every memory type with a chain of free-list allocators.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice whose memory types are dispatched over.
    /// - `pool_size`: The size (in bytes) of the pools behind each type; `Self::DEFAULT_POOL_SIZE` is a reasonable pick.
    pub fn free_list_chains(device: Rc<dyn MemoryDevice>, pool_size: usize) -> Self {
        Self::new(device, move |device, mem_type| {
            Ok(Box::new(ChainAllocator::free_list(device, mem_type, pool_size)?) as Box<dyn MemoryAllocator>)
        })
    }

    /// Shortcut constructor that serves every memory type with a chain of buddy allocators.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice whose memory types are dispatched over.
    /// - `pool_size`: The size (in bytes) of the pools behind each type. Must satisfy the buddy allocator's power-of-two constraints.
    /// - `min_granularity`: The smallest block size the buddy allocators will split down to.
    pub fn buddy_chains(device: Rc<dyn MemoryDevice>, pool_size: usize, min_granularity: usize) -> Self {
        Self::new(device, move |device, mem_type| {
            Ok(Box::new(ChainAllocator::buddy(device, mem_type, pool_size, min_granularity)?) as Box<dyn MemoryAllocator>)
        })
    }



    /// Returns the sub-allocator serving the given memory type, if one has been created.
    ///
    /// # Arguments
    /// - `mem_type`: The DeviceMemoryType whose sub-allocator to return.
    #[inline]
    pub fn allocator(&self, mem_type: DeviceMemoryType) -> Option<&dyn MemoryAllocator> {
        self.types.get(&mem_type).map(|entry| entry.allocator.as_ref())
    }
}

impl MultiAllocator for PolyAllocator {
    /// Returns a newly allocated block on the best-ranked memory type that satisfies the given criteria.
    ///
    /// # Arguments
    /// - `reqs`: The memory requirements of the new memory block.
    /// - `criteria`: The MemoryTypeCriteria that the memory type of the new block must satisfy.
    ///
    /// # Errors
    /// This function errors with `Error::OutOfMemory` if no memory type satisfies both the criteria and the request's type mask, or whatever the selected sub-allocator reports.
    fn allocate(&mut self, reqs: &MemoryRequirements, criteria: &MemoryTypeCriteria) -> Result<MemoryBlock, Error> {
        // Ask the device to rank the candidates, then take the first one the request also admits
        let candidates = self.device.search_memory_types(criteria);
        let mem_type: DeviceMemoryType = match candidates.into_iter().find(|info| reqs.types.check(info.index)) {
            Some(info) => info.index,
            None       => { return Err(Error::OutOfMemory{ req_size: reqs.size }); }
        };

        // Lazily create the sub-allocator for this type
        if !self.types.contains_key(&mem_type) {
            let allocator: Box<dyn MemoryAllocator> = (self.make_allocator)(self.device.clone(), mem_type)?;
            self.types.insert(mem_type, PolyEntry {
                allocations : HashSet::new(),
                allocator,
            });
        }
        let entry: &mut PolyEntry = match self.types.get_mut(&mem_type) {
            Some(entry) => entry,
            None        => { panic!("Sub-allocator for memory type {} disappeared", mem_type); }
        };

        // Forward the request and remember who served it
        let block: MemoryBlock = entry.allocator.allocate(reqs)?;
        entry.allocations.insert(block.address());
        Ok(block)
    }

    /// Frees an allocated memory block by routing it to the sub-allocator that created it.
    ///
    /// # Arguments
    /// - `block`: The MemoryBlock to free.
    ///
    /// # Panics
    /// This function panics if no sub-allocator handed out the block's address.
    fn free(&mut self, block: MemoryBlock) {
        for entry in self.types.values_mut() {
            if entry.allocations.remove(&block.address()) {
                entry.allocator.free(block);
                return;
            }
        }
        panic!("Given MemoryBlock was not allocated with this PolyAllocator");
    }



    /// Returns the device that this allocator allocates on.
    #[inline]
    fn device(&self) -> &Rc<dyn MemoryDevice> { &self.device }

    /// Returns the number of bytes currently handed out by this allocator.
    #[inline]
    fn size(&self) -> usize { self.types.values().map(|entry| entry.allocator.size()).sum() }

    /// Returns the total number of bytes managed by this allocator.
    #[inline]
    fn capacity(&self) -> usize { self.types.values().map(|entry| entry.allocator.capacity()).sum() }
}

impl Drop for PolyAllocator {
    fn drop(&mut self) {
        // Report the leak; the blocks themselves keep their pools alive regardless
        let outstanding: usize = self.types.values().map(|entry| entry.allocations.len()).sum();
        if outstanding > 0 {
            warn!("Dropping PolyAllocator with {} outstanding allocation{}", outstanding, if outstanding == 1 { "" } else { "s" });
        }
    }
}
