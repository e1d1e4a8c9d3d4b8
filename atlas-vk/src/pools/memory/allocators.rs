/* ALLOCATORS.rs
 *   by Mika
 *
 * Created:
 *   08 Jul 2022, 13:21:37
 * Last edited:
 *   31 Jul 2022, 16:10:25
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Defines the allocators that suballocate a single pool of device
 *   memory: a first-fit free-list allocator with coalescing, a buddy
 *   allocator over power-of-two blocks, and a naive allocator that asks
 *   the driver for one fresh pool per request.
**/

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

pub use crate::pools::errors::AllocationError as Error;
use crate::auxillary::enums::MemoryAllocatorKind;
use crate::auxillary::structs::{DeviceMemoryType, MemoryRequirements};
use crate::device::MemoryDevice;
use crate::pools::memory::block::{Address, MemoryBlock};
use crate::pools::memory::pool::MemoryPool;
use crate::pools::memory::spec::MemoryAllocator;
use crate::pools::memory::utils::align_up;


/***** UNIT TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MockDevice;

    /// Creates a host-visible pool of the given size on a fresh mock device.
    fn host_pool(size: usize) -> (Rc<MockDevice>, Rc<MemoryPool>) {
        let device = MockDevice::host_visible();
        let pool = MemoryPool::allocate(device.clone() as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0), size).unwrap();
        (device, pool)
    }

    /// Checks the internal consistency of a buddy allocator's tree.
    fn assert_buddy_invariants(alloc: &BuddyAllocator) {
        for block in &alloc.blocks {
            // Sizes are powers of two within the configured bounds
            assert!(block.size.is_power_of_two());
            assert!(block.size >= alloc.min_granularity && block.size <= alloc.pool.mem_size());

            // Children partition their parent in two equal halves
            if let (Some(left), Some(right)) = (block.left, block.right) {
                let (left, right) = (&alloc.blocks[left], &alloc.blocks[right]);
                assert_eq!(left.size, block.size / 2);
                assert_eq!(right.size, block.size / 2);
                assert_eq!(left.offset, block.offset);
                assert_eq!(right.offset, block.offset + block.size / 2);

                // The descendant flag is exactly the OR over the children
                assert_eq!(block.allocated_children, block.allocated || left.allocated_children || right.allocated_children);
            } else {
                assert_eq!(block.allocated_children, block.allocated);
            }

            // At most one node on any root-to-leaf path is allocated
            if block.allocated {
                let mut cursor = block.parent;
                while let Some(parent) = cursor {
                    assert!(!alloc.blocks[parent].allocated);
                    cursor = alloc.blocks[parent].parent;
                }
            }
        }
    }



    /// Tests that the free-list allocator re-uses freed space first-fit.
    #[test]
    fn test_free_list_reuse() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);

        let a = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let b = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let c = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 256);
        assert_eq!(c.offset(), 512);

        alloc.free(b);
        let d = alloc.allocate(&MemoryRequirements::new(128, 1)).unwrap();
        assert_eq!(d.offset(), 256);

        // B's slot is split: 128 bytes behind D, plus the tail of the pool
        assert_eq!(alloc.regions, BTreeMap::from([ (384, 128), (768, 256) ]));
        assert_eq!(alloc.size(), 640);
    }

    /// Tests that freeing in arbitrary order fuses neighbours back into one region.
    #[test]
    fn test_free_list_coalesce() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);

        let a = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let b = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let c = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();

        alloc.free(b);
        alloc.free(a);
        alloc.free(c);
        assert_eq!(alloc.regions, BTreeMap::from([ (0, 1024) ]));
        assert_eq!(alloc.size(), 0);
    }

    /// Tests that alignment slack in front of an allocation is kept as a free region.
    #[test]
    fn test_free_list_alignment() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);

        let a = alloc.allocate(&MemoryRequirements::new(100, 128)).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(a.size(), 100);

        let b = alloc.allocate(&MemoryRequirements::new(100, 128)).unwrap();
        assert_eq!(b.offset(), 128);

        // The 28 bytes of slack between A's end and B's start stay available
        assert_eq!(alloc.regions, BTreeMap::from([ (100, 28), (228, 796) ]));
    }

    /// Tests the free-list error variants: requests beyond the pool size versus exhaustion.
    #[test]
    fn test_free_list_errors() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);

        match alloc.allocate(&MemoryRequirements::new(2048, 1)) {
            Err(Error::InsufficientPoolSize{ req_size: 2048, pool_size: 1024 }) => {},
            other => { panic!("Expected InsufficientPoolSize, got {:?}", other.map(|_| ())); }
        }

        // Fill the pool, then one more byte must fail
        let _blocks: Vec<MemoryBlock> = (0..4).map(|_| alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap()).collect();
        match alloc.allocate(&MemoryRequirements::new(1, 1)) {
            Err(Error::OutOfMemory{ req_size: 1 }) => {},
            other => { panic!("Expected OutOfMemory, got {:?}", other.map(|_| ())); }
        }
    }

    /// Tests that fragmentation refuses a request that would fit the total free space.
    #[test]
    fn test_free_list_fragmentation() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);

        let a = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let _b = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let c = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        let _d = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();

        // 512 free bytes in total, but no contiguous run of 512
        alloc.free(a);
        alloc.free(c);
        assert!(matches!(alloc.allocate(&MemoryRequirements::new(512, 1)), Err(Error::OutOfMemory{ .. })));
        let e = alloc.allocate(&MemoryRequirements::new(256, 1)).unwrap();
        assert_eq!(e.offset(), 0);
    }

    /// Tests the coverage & coalescing invariants under a mixed workload.
    #[test]
    fn test_free_list_invariants() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);
        let mut live: Vec<MemoryBlock> = Vec::new();

        // Interleave allocations and frees of various shapes
        for round in 0..8 {
            for (size, align) in [ (96, 32), (17, 1), (64, 64), (200, 8) ] {
                if let Ok(block) = alloc.allocate(&MemoryRequirements::new(size, align)) {
                    live.push(block);
                }
            }
            if round % 2 == 0 && !live.is_empty() {
                alloc.free(live.remove(round % live.len().max(1)));
            }

            // Disjointness of the outstanding blocks
            for (i, a) in live.iter().enumerate() {
                for b in live.iter().skip(i + 1) {
                    assert!(a.offset() + a.size() <= b.offset() || b.offset() + b.size() <= a.offset());
                }
            }

            // The free regions and live blocks tile the pool exactly
            let free: usize = alloc.regions.values().sum();
            let used: usize = live.iter().map(|b| b.size()).sum();
            assert_eq!(free + used, 1024);
            assert_eq!(alloc.size(), used);

            // No two stored regions share a boundary
            let mut prev: Option<(usize, usize)> = None;
            for (&offset, &size) in &alloc.regions {
                if let Some((prev_offset, prev_size)) = prev {
                    assert!(prev_offset + prev_size < offset);
                }
                prev = Some((offset, size));
            }
        }

        // Freeing everything restores the initial state
        for block in live.drain(..) {
            alloc.free(block);
        }
        assert_eq!(alloc.regions, BTreeMap::from([ (0, 1024) ]));
    }

    /// Tests that repeated allocate/free of the same request neither fails nor grows state.
    #[test]
    fn test_free_list_idempotence() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);

        for _ in 0..256 {
            let block = alloc.allocate(&MemoryRequirements::new(96, 32)).unwrap();
            assert_eq!(block.offset(), 0);
            alloc.free(block);
        }
        assert_eq!(alloc.regions, BTreeMap::from([ (0, 1024) ]));
    }

    /// Tests that a request whose type mask excludes the allocator's type is a programmer error.
    #[test]
    #[should_panic]
    fn test_free_list_type_mismatch() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = FreeListAllocator::new(pool);
        let _ = alloc.allocate(&MemoryRequirements::new(64, 1).with_types(DeviceMemoryType::from(3).into()));
    }



    /// Tests buddy allocation of four granularity-sized blocks filling the leftmost leaves.
    #[test]
    fn test_buddy_basic() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = BuddyAllocator::new(pool, 64);

        let blocks: Vec<MemoryBlock> = (0..4).map(|_| alloc.allocate(&MemoryRequirements::new(64, 1)).unwrap()).collect();
        let offsets: Vec<usize> = blocks.iter().map(|b| b.offset()).collect();
        assert_eq!(offsets, vec![ 0, 64, 128, 192 ]);
        assert!(blocks.iter().all(|b| b.size() == 64));
        assert_buddy_invariants(&alloc);
        assert_eq!(alloc.size(), 256);

        // Freeing everything clears every flag in the tree
        for block in blocks {
            alloc.free(block);
        }
        assert!(alloc.blocks.iter().all(|b| !b.allocated && !b.allocated_children));
        assert_eq!(alloc.size(), 0);
    }

    /// Tests allocating the entire pool at the root, exhaustion, and recovery after the free.
    #[test]
    fn test_buddy_whole_pool() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = BuddyAllocator::new(pool, 64);

        let root = alloc.allocate(&MemoryRequirements::new(1024, 1)).unwrap();
        assert_eq!(root.offset(), 0);
        assert_eq!(root.size(), 1024);

        assert!(matches!(alloc.allocate(&MemoryRequirements::new(1, 1)), Err(Error::OutOfMemory{ .. })));

        alloc.free(root);
        let small = alloc.allocate(&MemoryRequirements::new(1, 1)).unwrap();
        assert_eq!(small.offset(), 0);
        assert!(small.size() >= 64);
        assert_buddy_invariants(&alloc);
    }

    /// Tests that misaligned subtrees are skipped rather than aborting the search.
    #[test]
    fn test_buddy_alignment() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = BuddyAllocator::new(pool, 64);

        let a = alloc.allocate(&MemoryRequirements::new(64, 1)).unwrap();
        assert_eq!(a.offset(), 0);

        // Offset 64 is free but misaligned; the search must move on to offset 256
        let b = alloc.allocate(&MemoryRequirements::new(64, 256)).unwrap();
        assert_eq!(b.offset(), 256);
        assert_buddy_invariants(&alloc);
    }

    /// Tests that a request larger than the pool reports the pool as insufficient.
    #[test]
    fn test_buddy_insufficient_pool() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = BuddyAllocator::new(pool, 64);
        assert!(matches!(alloc.allocate(&MemoryRequirements::new(2048, 1)), Err(Error::InsufficientPoolSize{ req_size: 2048, pool_size: 1024 })));
    }

    /// Tests that repeated allocate/free of the same request neither fails nor grows the arena without bound.
    #[test]
    fn test_buddy_idempotence() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = BuddyAllocator::new(pool, 64);

        // The arena only grows on splits, which happen on the first round
        let block = alloc.allocate(&MemoryRequirements::new(64, 1)).unwrap();
        let arena_size = alloc.blocks.len();
        alloc.free(block);

        for _ in 0..256 {
            let block = alloc.allocate(&MemoryRequirements::new(64, 1)).unwrap();
            assert_eq!(block.offset(), 0);
            alloc.free(block);
        }
        assert_eq!(alloc.blocks.len(), arena_size);
        assert!(alloc.blocks.iter().all(|b| !b.allocated && !b.allocated_children));
    }

    /// Tests that the buddy constructor refuses non-power-of-two shapes.
    #[test]
    #[should_panic]
    fn test_buddy_pool_not_power_of_two() {
        let (_device, pool) = host_pool(1000);
        let _ = BuddyAllocator::new(pool, 64);
    }

    /// Tests that the buddy constructor refuses a non-power-of-two granularity.
    #[test]
    #[should_panic]
    fn test_buddy_granularity_not_power_of_two() {
        let (_device, pool) = host_pool(1024);
        let _ = BuddyAllocator::new(pool, 100);
    }

    /// Tests that freeing an offset that is not a live allocation is a programmer error.
    #[test]
    #[should_panic]
    fn test_buddy_free_unknown_offset() {
        let (_device, pool) = host_pool(1024);
        let mut alloc = BuddyAllocator::new(pool.clone(), 64);
        let _block = alloc.allocate(&MemoryRequirements::new(64, 1)).unwrap();

        // Forge a view that was never allocated
        alloc.free(MemoryPool::allocate_view(&pool, 512, 64));
    }



    /// Tests that the naive allocator creates and destroys one driver block per allocation.
    #[test]
    fn test_naive_pool_per_request() {
        let device = MockDevice::host_visible();
        let mut alloc = NaiveAllocator::new(device.clone() as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0));

        let a = alloc.allocate(&MemoryRequirements::new(100, 1)).unwrap();
        let b = alloc.allocate(&MemoryRequirements::new(5000, 256)).unwrap();
        assert_eq!(device.live(), 2);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 0);
        assert_eq!(alloc.size(), 5100);

        alloc.free(a);
        assert_eq!(device.live(), 1);
        alloc.free(b);
        assert_eq!(device.live(), 0);
        assert_eq!(alloc.size(), 0);
    }

    /// Tests that freeing a block the naive allocator never handed out is a programmer error.
    #[test]
    #[should_panic]
    fn test_naive_free_unknown_block() {
        let device = MockDevice::host_visible();
        let mut alloc = NaiveAllocator::new(device.clone() as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0));
        let pool = MemoryPool::allocate(device as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0), 64).unwrap();
        alloc.free(MemoryPool::allocate_view(&pool, 0, 64));
    }
}





/***** LIBRARY *****/
/// A first-fit allocator over one pool, tracking the free space as a sorted map of regions that is kept maximally coalesced.
pub struct FreeListAllocator {
    /// The pool that this allocator suballocates.
    pool    : Rc<MemoryPool>,
    /// The free regions of the pool, sorted by offset. Maps each region's offset to its size.
    regions : BTreeMap<usize, usize>,
    /// The number of bytes currently handed out.
    size    : usize,
}

impl FreeListAllocator {
    /// Constructor for the FreeListAllocator.
    ///
    /// # Arguments
    /// - `pool`: The (already allocated) MemoryPool to suballocate. If you have yet to allocate one, check `MemoryPool::allocate()`.
    ///
    /// # Returns
    /// A new FreeListAllocator whose entire pool is one free region.
    pub fn new(pool: Rc<MemoryPool>) -> Self {
        let mut regions: BTreeMap<usize, usize> = BTreeMap::new();
        regions.insert(0, pool.mem_size());
        Self {
            pool,
            regions,
            size : 0,
        }
    }
}

impl MemoryAllocator for FreeListAllocator {
    /// Returns a newly allocated block of (at least) the requested size.
    ///
    /// The regions are scanned in offset order and the first one with a large enough aligned hole wins; the region is split into an (optional) prefix up to the aligned address, the allocation itself, and an (optional) suffix.
    ///
    /// # Arguments
    /// - `reqs`: The memory requirements of the new memory block.
    ///
    /// # Returns
    /// A MemoryBlock of exactly `reqs.size` bytes at an offset aligned to `reqs.align`.
    ///
    /// # Errors
    /// This function errors with `Error::InsufficientPoolSize` if the request exceeds the pool itself, or `Error::OutOfMemory` if no free region can hold it.
    fn allocate(&mut self, reqs: &MemoryRequirements) -> Result<MemoryBlock, Error> {
        // Make sure that this is one of the valid memory types for this allocation
        if !reqs.types.check(self.pool.mem_type()) { panic!("FreeListAllocator lives on memory type {}, but the allocation only supports types {}", self.pool.mem_type(), reqs.types); }

        // No region will ever fit a request larger than the pool
        if reqs.size > self.pool.mem_size() { return Err(Error::InsufficientPoolSize{ req_size: reqs.size, pool_size: self.pool.mem_size() }); }

        // Find the first region with a large enough aligned hole
        let mut found: Option<(usize, usize, usize)> = None;
        for (&offset, &size) in &self.regions {
            let aligned: usize = align_up(offset, reqs.align);
            if aligned + reqs.size <= offset + size {
                found = Some((offset, size, aligned));
                break;
            }
        }
        let (offset, size, aligned): (usize, usize, usize) = match found {
            Some(found) => found,
            None        => { return Err(Error::OutOfMemory{ req_size: reqs.size }); }
        };

        // Split the region into prefix + allocation + suffix
        self.regions.remove(&offset);
        if aligned > offset {
            self.regions.insert(offset, aligned - offset);
        }
        if offset + size > aligned + reqs.size {
            self.regions.insert(aligned + reqs.size, (offset + size) - (aligned + reqs.size));
        }

        // Done, hand out the view
        self.size += reqs.size;
        Ok(MemoryPool::allocate_view(&self.pool, aligned, reqs.size))
    }

    /// Frees an allocated memory block, fusing its range with any adjacent free regions.
    ///
    /// # Arguments
    /// - `block`: The MemoryBlock to free.
    ///
    /// # Panics
    /// This function panics if the given block does not live in this allocator's pool.
    fn free(&mut self, block: MemoryBlock) {
        if !Rc::ptr_eq(block.pool(), &self.pool) { panic!("Given MemoryBlock was not allocated with this FreeListAllocator"); }
        let mut offset: usize = block.offset();
        let mut size: usize   = block.size();
        self.size -= size;

        // Fuse with the region immediately after, if contiguous
        if let Some(next_size) = self.regions.remove(&(offset + size)) {
            size += next_size;
        }

        // Fuse with the region immediately before, if contiguous
        let prev: Option<(usize, usize)> = self.regions.range(..offset).next_back().map(|(&offset, &size)| (offset, size));
        if let Some((prev_offset, prev_size)) = prev {
            if prev_offset + prev_size == offset {
                self.regions.remove(&prev_offset);
                offset = prev_offset;
                size += prev_size;
            }
        }

        // Insert the fused region; since neighbours were merged away, no two regions touch
        self.regions.insert(offset, size);
    }



    /// Returns the type of this allocator.
    #[inline]
    fn kind(&self) -> MemoryAllocatorKind { MemoryAllocatorKind::FreeList }

    /// Returns the device that this allocator allocates on.
    #[inline]
    fn device(&self) -> &Rc<dyn MemoryDevice> { self.pool.device() }

    /// Returns the memory type that this allocator allocates on.
    #[inline]
    fn memory_type(&self) -> DeviceMemoryType { self.pool.mem_type() }

    /// Returns the number of bytes currently handed out by this allocator.
    #[inline]
    fn size(&self) -> usize { self.size }

    /// Returns the total number of bytes managed by this allocator.
    #[inline]
    fn capacity(&self) -> usize { self.pool.mem_size() }
}



/// A single node in the buddy allocator's block tree.
///
/// Nodes live in a flat arena and refer to each other by index, so the arena can grow without invalidating anything; nodes are never removed for the lifetime of the allocator.
struct BuddyBlock {
    /// The offset (in bytes) of this block within the pool.
    offset : usize,
    /// The size (in bytes) of this block. Always a power of two.
    size   : usize,

    /// Whether this block itself is handed out.
    allocated          : bool,
    /// Whether this block or any block below it is handed out.
    allocated_children : bool,

    /// The index of the parent block, if any.
    parent : Option<usize>,
    /// The index of the left child block, if split.
    left   : Option<usize>,
    /// The index of the right child block, if split.
    right  : Option<usize>,
}

impl BuddyBlock {
    /// Convenience constructor for a free, childless BuddyBlock.
    #[inline]
    fn new(offset: usize, size: usize, parent: Option<usize>) -> Self {
        Self {
            offset,
            size,

            allocated          : false,
            allocated_children : false,

            parent,
            left  : None,
            right : None,
        }
    }

    /// Returns whether this block has been split.
    #[inline]
    fn has_children(&self) -> bool { self.left.is_some() }
}



/// An allocator over one pool that splits power-of-two blocks in halves.
///
/// Trades internal fragmentation for logarithmic allocate/free and coalescing that the tree records implicitly. The configured minimum granularity bounds the tree's depth.
pub struct BuddyAllocator {
    /// The pool that this allocator suballocates.
    pool            : Rc<MemoryPool>,
    /// The smallest block size that will ever be handed out or split to.
    min_granularity : usize,
    /// The arena of tree nodes; the root covers the whole pool at index 0.
    blocks          : Vec<BuddyBlock>,
    /// The number of bytes currently handed out (in whole blocks).
    size            : usize,
}

impl BuddyAllocator {
    /// The hard lower bound on block sizes, below any sensible granularity.
    pub const MIN_BLOCK_SIZE: usize = 16;


    /// Constructor for the BuddyAllocator.
    ///
    /// # Arguments
    /// - `pool`: The (already allocated) MemoryPool to suballocate. Its size must be a power of two larger than `2 * Self::MIN_BLOCK_SIZE`.
    /// - `min_granularity`: The smallest block size this allocator will split down to. Must be a power of two larger than `Self::MIN_BLOCK_SIZE` and no larger than the pool.
    ///
    /// # Returns
    /// A new BuddyAllocator whose tree is a single free root covering the pool.
    ///
    /// # Panics
    /// This function panics if the pool size or granularity do not satisfy the constraints above.
    pub fn new(pool: Rc<MemoryPool>, min_granularity: usize) -> Self {
        if !pool.mem_size().is_power_of_two() || pool.mem_size() <= 2 * Self::MIN_BLOCK_SIZE { panic!("BuddyAllocator requires a pool whose size is a power of two larger than {} bytes, got {}", 2 * Self::MIN_BLOCK_SIZE, pool.mem_size()); }
        if !min_granularity.is_power_of_two() || min_granularity <= Self::MIN_BLOCK_SIZE { panic!("BuddyAllocator requires a minimum granularity that is a power of two larger than {} bytes, got {}", Self::MIN_BLOCK_SIZE, min_granularity); }
        if min_granularity > pool.mem_size() { panic!("BuddyAllocator requires a minimum granularity of at most the pool size ({} bytes), got {}", pool.mem_size(), min_granularity); }

        let root: BuddyBlock = BuddyBlock::new(0, pool.mem_size(), None);
        Self {
            pool,
            min_granularity,
            blocks : vec![ root ],
            size   : 0,
        }
    }



    /// Splits the given free, childless block into two buddies of half its size.
    ///
    /// # Arguments
    /// - `index`: The arena index of the block to split.
    fn split_block(&mut self, index: usize) {
        let (offset, size): (usize, usize) = {
            let block: &BuddyBlock = &self.blocks[index];
            debug_assert!(!block.allocated && !block.has_children());
            (block.offset, block.size)
        };
        let half: usize = size / 2;

        // Append the two children and link them up
        let left: usize = self.blocks.len();
        self.blocks.push(BuddyBlock::new(offset, half, Some(index)));
        let right: usize = self.blocks.len();
        self.blocks.push(BuddyBlock::new(offset + half, half, Some(index)));
        self.blocks[index].left  = Some(left);
        self.blocks[index].right = Some(right);
    }
}

impl MemoryAllocator for BuddyAllocator {
    /// Returns a newly allocated block of (at least) the requested size.
    ///
    /// The tree is searched left-first, splitting free blocks on the way down until a block is found that is aligned, free in its entire subtree, and either snug (less than twice the request) or already at the minimum granularity. The returned view spans the whole chosen block, so it may be larger than requested.
    ///
    /// # Arguments
    /// - `reqs`: The memory requirements of the new memory block.
    ///
    /// # Errors
    /// This function errors with `Error::InsufficientPoolSize` if the request exceeds the pool itself, or `Error::OutOfMemory` if no suitable block exists.
    fn allocate(&mut self, reqs: &MemoryRequirements) -> Result<MemoryBlock, Error> {
        // Make sure that this is one of the valid memory types for this allocation
        if !reqs.types.check(self.pool.mem_type()) { panic!("BuddyAllocator lives on memory type {}, but the allocation only supports types {}", self.pool.mem_type(), reqs.types); }

        // Not even the root could hold this
        if reqs.size > self.pool.mem_size() { return Err(Error::InsufficientPoolSize{ req_size: reqs.size, pool_size: self.pool.mem_size() }); }

        // Search the tree, preferring deep & left blocks
        let chosen: Option<usize> = {
            let mut search: VecDeque<usize> = VecDeque::new();
            search.push_back(0);

            let mut chosen: Option<usize> = None;
            while let Some(cursor) = search.pop_front() {
                let (offset, size, allocated, allocated_children, has_children): (usize, usize, bool, bool, bool) = {
                    let block: &BuddyBlock = &self.blocks[cursor];
                    (block.offset, block.size, block.allocated, block.allocated_children, block.has_children())
                };

                // Blocks at unusable offsets are skipped, but their buddies may still do
                if offset % reqs.align != 0 { continue; }
                if allocated || size < reqs.size { continue; }

                // Take the block if it fits snugly (or cannot be split further) and is completely free
                if (size < 2 * reqs.size || size == self.min_granularity) && !allocated_children {
                    chosen = Some(cursor);
                    break;
                }

                // Otherwise descend, left child first
                if size > self.min_granularity {
                    if !has_children { self.split_block(cursor); }
                    let (left, right): (usize, usize) = match (self.blocks[cursor].left, self.blocks[cursor].right) {
                        (Some(left), Some(right)) => (left, right),
                        _                         => { panic!("BuddyBlock of {} bytes has no children after split", size); }
                    };
                    search.push_front(right);
                    search.push_front(left);
                }
            }
            chosen
        };
        let index: usize = match chosen {
            Some(index) => index,
            None        => { return Err(Error::OutOfMemory{ req_size: reqs.size }); }
        };

        // Mark the block and propagate the descendant flag up until it is already set
        let (offset, size): (usize, usize) = {
            let block: &mut BuddyBlock = &mut self.blocks[index];
            block.allocated          = true;
            block.allocated_children = true;
            (block.offset, block.size)
        };
        let mut cursor: Option<usize> = self.blocks[index].parent;
        while let Some(parent) = cursor {
            if self.blocks[parent].allocated_children { break; }
            self.blocks[parent].allocated_children = true;
            cursor = self.blocks[parent].parent;
        }

        // Done, hand out the whole block
        self.size += size;
        Ok(MemoryPool::allocate_view(&self.pool, offset, size))
    }

    /// Frees an allocated memory block.
    ///
    /// Descends from the root along the halves containing the block's offset until the allocated node is found, clears it, and recomputes the ancestors' descendant flags until one is unchanged.
    ///
    /// # Arguments
    /// - `block`: The MemoryBlock to free.
    ///
    /// # Panics
    /// This function panics if the block does not live in this allocator's pool, or if its offset does not correspond to a live allocation.
    fn free(&mut self, block: MemoryBlock) {
        if !Rc::ptr_eq(block.pool(), &self.pool) { panic!("Given MemoryBlock was not allocated with this BuddyAllocator"); }

        // Walk down to the allocated node containing the offset
        let mut cursor: usize = 0;
        let index: usize = loop {
            let current: &BuddyBlock = &self.blocks[cursor];
            if current.allocated {
                if current.offset != block.offset() { panic!("Given MemoryBlock (offset {}) does not match the allocated BuddyBlock at offset {}", block.offset(), current.offset); }
                break cursor;
            }
            cursor = match (current.left, current.right) {
                (Some(left), Some(right)) => if block.offset() >= current.offset + current.size / 2 { right } else { left },
                _                         => { panic!("Given MemoryBlock (offset {}) was not allocated with this BuddyAllocator", block.offset()); }
            };
        };

        // Clear the node itself
        let size: usize = {
            let node: &mut BuddyBlock = &mut self.blocks[index];
            node.allocated          = false;
            node.allocated_children = false;
            node.size
        };
        self.size -= size;

        // Recompute the flags on the way up, stopping as soon as nothing changes
        let mut cursor: Option<usize> = self.blocks[index].parent;
        while let Some(parent) = cursor {
            let flag: bool = {
                let node: &BuddyBlock = &self.blocks[parent];
                let left: bool  = node.left.map(|index| self.blocks[index].allocated_children).unwrap_or(false);
                let right: bool = node.right.map(|index| self.blocks[index].allocated_children).unwrap_or(false);
                left || right
            };
            if self.blocks[parent].allocated_children == flag { break; }
            self.blocks[parent].allocated_children = flag;
            cursor = self.blocks[parent].parent;
        }
    }



    /// Returns the type of this allocator.
    #[inline]
    fn kind(&self) -> MemoryAllocatorKind { MemoryAllocatorKind::Buddy }

    /// Returns the device that this allocator allocates on.
    #[inline]
    fn device(&self) -> &Rc<dyn MemoryDevice> { self.pool.device() }

    /// Returns the memory type that this allocator allocates on.
    #[inline]
    fn memory_type(&self) -> DeviceMemoryType { self.pool.mem_type() }

    /// Returns the number of bytes currently handed out by this allocator.
    #[inline]
    fn size(&self) -> usize { self.size }

    /// Returns the total number of bytes managed by this allocator.
    #[inline]
    fn capacity(&self) -> usize { self.pool.mem_size() }
}



/// An allocator that asks the driver for one fresh pool per request.
///
/// Wasteful against the driver's allocation count limit, but it can serve any request the driver itself can; used as the backstop behind the smarter allocators.
pub struct NaiveAllocator {
    /// The device that the pools are allocated on.
    device   : Rc<dyn MemoryDevice>,
    /// The memory type that the pools are allocated on.
    mem_type : DeviceMemoryType,
    /// The pools created so far, keyed by the address of the allocation they back.
    pools    : HashMap<Address, Rc<MemoryPool>>,
    /// The number of bytes currently handed out.
    size     : usize,
}

impl NaiveAllocator {
    /// Constructor for the NaiveAllocator.
    ///
    /// Note that no memory is allocated until the first request.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice to allocate the pools on.
    /// - `mem_type`: The DeviceMemoryType to allocate the pools on.
    #[inline]
    pub fn new(device: Rc<dyn MemoryDevice>, mem_type: DeviceMemoryType) -> Self {
        Self {
            device,
            mem_type,
            pools : HashMap::new(),
            size  : 0,
        }
    }
}

impl MemoryAllocator for NaiveAllocator {
    /// Returns a newly allocated block by allocating a fresh, exactly-sized pool from the driver.
    ///
    /// # Arguments
    /// - `reqs`: The memory requirements of the new memory block. The alignment is trivially satisfied, since driver blocks start at the type's maximum alignment.
    ///
    /// # Errors
    /// This function errors with `Error::OutOfMemory` if the driver has no memory left.
    fn allocate(&mut self, reqs: &MemoryRequirements) -> Result<MemoryBlock, Error> {
        // Make sure that this is one of the valid memory types for this allocation
        if !reqs.types.check(self.mem_type) { panic!("NaiveAllocator lives on memory type {}, but the allocation only supports types {}", self.mem_type, reqs.types); }

        // One fresh pool per request, used in its entirety
        let pool: Rc<MemoryPool> = MemoryPool::allocate(self.device.clone(), self.mem_type, reqs.size)?;
        let block: MemoryBlock = MemoryPool::allocate_view(&pool, 0, reqs.size);
        self.pools.insert(block.address(), pool);
        self.size += reqs.size;
        Ok(block)
    }

    /// Frees an allocated memory block together with the pool backing it.
    ///
    /// # Arguments
    /// - `block`: The MemoryBlock to free.
    ///
    /// # Panics
    /// This function panics if the block was not allocated by this allocator.
    fn free(&mut self, block: MemoryBlock) {
        match self.pools.remove(&block.address()) {
            Some(_) => { self.size -= block.size(); },
            None    => { panic!("Given MemoryBlock was not allocated with this NaiveAllocator"); }
        }
    }



    /// Returns the type of this allocator.
    #[inline]
    fn kind(&self) -> MemoryAllocatorKind { MemoryAllocatorKind::Naive }

    /// Returns the device that this allocator allocates on.
    #[inline]
    fn device(&self) -> &Rc<dyn MemoryDevice> { &self.device }

    /// Returns the memory type that this allocator allocates on.
    #[inline]
    fn memory_type(&self) -> DeviceMemoryType { self.mem_type }

    /// Returns the number of bytes currently handed out by this allocator.
    #[inline]
    fn size(&self) -> usize { self.size }

    /// Returns the total number of bytes managed by this allocator; for this allocator that is exactly the outstanding size.
    #[inline]
    fn capacity(&self) -> usize { self.size }
}
