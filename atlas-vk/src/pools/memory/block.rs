/* BLOCK.rs
 *   by Mika
 *
 * Created:
 *   07 Jul 2022, 09:26:14
 * Last edited:
 *   31 Jul 2022, 14:48:09
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Defines a single MemoryBlock, i.e., a suballocated view into a pool
 *   of device memory that is handed out to resource code.
**/

use std::ptr;
use std::ptr::NonNull;
use std::rc::Rc;

use ash::vk;

use crate::auxillary::flags::{Flags, MemoryPropertyFlags};
use crate::pools::memory::pool::MemoryPool;


/***** UNIT TESTS *****/
#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ash::vk::Handle;

    use super::*;
    use crate::auxillary::structs::DeviceMemoryType;
    use crate::device::testing::MockDevice;
    use crate::device::MemoryDevice;

    /// Tests that addresses behave as value-identity map keys.
    #[test]
    fn test_address_identity() {
        let a = Address{ memory: vk::DeviceMemory::from_raw(1), offset: 0 };
        let b = Address{ memory: vk::DeviceMemory::from_raw(1), offset: 64 };
        let c = Address{ memory: vk::DeviceMemory::from_raw(2), offset: 0 };
        assert_eq!(a, Address{ memory: vk::DeviceMemory::from_raw(1), offset: 0 });
        assert_ne!(a, b);
        assert_ne!(a, c);

        let mut set: HashSet<Address> = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&Address{ memory: vk::DeviceMemory::from_raw(1), offset: 64 }));
    }

    /// Tests that writing through a block lands at the block's offset and flushes when the type is not coherent.
    #[test]
    fn test_block_overwrite() {
        let device = MockDevice::host_cached();
        let pool = MemoryPool::allocate(device.clone() as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0), 256).unwrap();
        let block = MemoryPool::allocate_view(&pool, 64, 16);

        block.overwrite(&[ 0xAB; 16 ]);
        let bytes = device.contents(block.vk());
        assert!(bytes[..64].iter().all(|b| *b == 0));
        assert!(bytes[64..80].iter().all(|b| *b == 0xAB));
        assert!(bytes[80..].iter().all(|b| *b == 0));

        // The memory type is host-cached but not coherent, so the write must have been flushed
        assert_eq!(device.flushes(), 1);
    }

    /// Tests that writing more bytes than the block holds is refused.
    #[test]
    #[should_panic]
    fn test_block_overwrite_too_large() {
        let device = MockDevice::host_visible();
        let pool = MemoryPool::allocate(device as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0), 256).unwrap();
        let block = MemoryPool::allocate_view(&pool, 0, 16);
        block.overwrite(&[ 0u8; 17 ]);
    }

    /// Tests that mapping device-local memory is refused.
    #[test]
    #[should_panic]
    fn test_block_map_device_local() {
        let device = MockDevice::device_local();
        let pool = MemoryPool::allocate(device as Rc<dyn MemoryDevice>, DeviceMemoryType::from(0), 256).unwrap();
        let block = MemoryPool::allocate_view(&pool, 0, 16);
        block.mapped_ptr();
    }
}





/***** LIBRARY *****/
/// The identity of an allocation: the driver block it lives in and the offset within that block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Address {
    /// The VkDeviceMemory that the allocation lives in.
    pub memory : vk::DeviceMemory,
    /// The offset (in bytes) of the allocation within that memory.
    pub offset : usize,
}



/// Defines a single, continious region of device memory within a [`MemoryPool`], handed out by an allocator.
///
/// The block borrows its storage from the pool and keeps the pool alive for as long as it exists. Its byte range is exclusive to its holder; the allocator that created it guarantees that no other live block overlaps it.
pub struct MemoryBlock {
    /// The pool that the block is carved out of.
    pool   : Rc<MemoryPool>,
    /// The offset (in bytes) of the block within the pool.
    offset : usize,
    /// The size (in bytes) of the block.
    size   : usize,
}

impl MemoryBlock {
    /// Constructor for the MemoryBlock.
    ///
    /// # Arguments
    /// - `pool`: The MemoryPool that the block is carved out of.
    /// - `offset`: The offset (in bytes) of the block within the pool.
    /// - `size`: The size (in bytes) of the block.
    #[inline]
    pub(crate) fn new(pool: Rc<MemoryPool>, offset: usize, size: usize) -> Self {
        Self {
            pool,
            offset,
            size,
        }
    }



    /// Returns the pool that this block lives in.
    #[inline]
    pub(crate) fn pool(&self) -> &Rc<MemoryPool> { &self.pool }

    /// Returns the physical VkDeviceMemory that this block lives in.
    #[inline]
    pub fn vk(&self) -> vk::DeviceMemory { self.pool.vk() }

    /// Returns the offset (in bytes) of this block within its pool.
    #[inline]
    pub fn offset(&self) -> usize { self.offset }

    /// Returns the size (in bytes) of this block.
    #[inline]
    pub fn size(&self) -> usize { self.size }

    /// Returns the identity of this block, usable as a map key.
    #[inline]
    pub fn address(&self) -> Address { Address{ memory: self.pool.vk(), offset: self.offset } }

    /// Returns the properties of the memory type that this block lives on.
    #[inline]
    pub fn properties(&self) -> MemoryPropertyFlags { self.pool.properties() }



    /// Returns a persistent host pointer to the start of this block.
    ///
    /// # Panics
    /// This function panics if the block does not live on a host-visible memory type.
    #[inline]
    pub fn mapped_ptr(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.pool.mapped_ptr().as_ptr().add(self.offset)) }
    }

    /// Flushes the pool that this block lives in.
    #[inline]
    pub fn flush(&self) {
        self.pool.flush();
    }

    /// Copies the given bytes to the start of this block, flushing afterwards if the memory type is not host-coherent.
    ///
    /// # Arguments
    /// - `bytes`: The bytes to write into the block. Must not number more than the block's size.
    ///
    /// # Panics
    /// This function panics if more bytes are given than fit in the block, or if the block does not live on a host-visible memory type.
    pub fn overwrite(&self, bytes: &[u8]) {
        if bytes.len() > self.size { panic!("Cannot overwrite MemoryBlock of {} bytes with {} bytes", self.size, bytes.len()); }

        // Write the bytes to the mapped memory
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped_ptr().as_ptr(), bytes.len()); }

        // Make sure the device sees the write
        if !self.properties().check(MemoryPropertyFlags::HOST_COHERENT) {
            self.flush();
        }
    }
}
