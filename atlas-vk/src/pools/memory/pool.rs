/* POOL.rs
 *   by Mika
 *
 * Created:
 *   07 Jul 2022, 10:12:40
 * Last edited:
 *   31 Jul 2022, 14:52:31
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Contains the MemoryPool implementation, which owns one driver block
 *   of device memory and hands out suballocated views into it.
**/

use std::cell::Cell;
use std::ptr;
use std::ptr::NonNull;
use std::rc::Rc;

use ash::vk;
use log::debug;

pub use crate::pools::errors::AllocationError as Error;
use crate::log_destroy;
use crate::auxillary::flags::{Flags, MemoryPropertyFlags};
use crate::auxillary::structs::DeviceMemoryType;
use crate::device::MemoryDevice;
use crate::pools::memory::block::MemoryBlock;


/***** UNIT TESTS *****/





/***** LIBRARY *****/
/// Represents one block of allocated device memory, from which the allocators hand out suballocated [`MemoryBlock`]s.
///
/// A pool is created `Rc`'d so that every block carved out of it can hold on to it; the driver memory is only returned once the pool's owner _and_ all outstanding blocks are gone.
pub struct MemoryPool {
    /// The device where the memory lives.
    device : Rc<dyn MemoryDevice>,

    /// The VkDeviceMemory that is wrapped by this pool.
    memory    : vk::DeviceMemory,
    /// The memory type that the memory is allocated on.
    mem_type  : DeviceMemoryType,
    /// The properties supported by that memory type.
    mem_props : MemoryPropertyFlags,
    /// The size (in bytes) of the memory.
    mem_size  : usize,

    /// The persistent host mapping of the memory, populated on first use (host-visible types only).
    mapped : Cell<Option<NonNull<u8>>>,
}

impl MemoryPool {
    /// Factory method for the MemoryPool, which allocates a new block of device memory on the given memory type.
    ///
    /// # Arguments
    /// - `device`: The MemoryDevice to allocate the memory on.
    /// - `mem_type`: The DeviceMemoryType to allocate the memory on.
    /// - `size`: The size (in bytes) of the new pool. Must be at least 1.
    ///
    /// # Returns
    /// A new MemoryPool, already wrapped in a reference-counting pointer.
    ///
    /// # Errors
    /// This function errors if the driver has no memory left for the block.
    ///
    /// # Panics
    /// This function panics if `mem_type` does not appear in the device's memory type table.
    pub fn allocate(device: Rc<dyn MemoryDevice>, mem_type: DeviceMemoryType, size: usize) -> Result<Rc<Self>, Error> {
        // Fetch the properties of the requested type
        let mem_props: MemoryPropertyFlags = match device.memory_types().iter().find(|info| info.index == mem_type) {
            Some(info) => info.props,
            None       => { panic!("Memory type {} does not exist on this device", mem_type); }
        };

        // Allocate the actual memory
        let memory: vk::DeviceMemory = device.allocate_memory(mem_type, size)?;
        debug!("Allocated MemoryPool of {} bytes on memory type {}", size, mem_type);

        // Wrap it in ourselves and done
        Ok(Rc::new(Self {
            device,

            memory,
            mem_type,
            mem_props,
            mem_size : size,

            mapped : Cell::new(None),
        }))
    }



    /// Returns a suballocated view into the given pool.
    ///
    /// No bookkeeping happens at this layer; the calling allocator guarantees that live views never overlap.
    ///
    /// # Arguments
    /// - `this`: The pool to create the view into.
    /// - `offset`: The offset (in bytes) of the view within the pool.
    /// - `size`: The size (in bytes) of the view.
    ///
    /// # Returns
    /// A new MemoryBlock that borrows its storage from the pool.
    #[inline]
    pub fn allocate_view(this: &Rc<Self>, offset: usize, size: usize) -> MemoryBlock {
        debug_assert!(offset + size <= this.mem_size, "View of {} bytes at offset {} does not fit in a pool of {} bytes", size, offset, this.mem_size);
        MemoryBlock::new(this.clone(), offset, size)
    }



    /// Returns a persistent host pointer to the start of the pool, mapping the whole pool on the first call.
    ///
    /// The pointer stays valid until the pool is destroyed.
    ///
    /// # Panics
    /// This function panics if the pool does not live on a host-visible memory type.
    pub fn mapped_ptr(&self) -> NonNull<u8> {
        // Re-use the mapping if we have one
        if let Some(pointer) = self.mapped.get() { return pointer; }

        // Sanity check, then ask the driver
        if !self.mem_props.check(MemoryPropertyFlags::HOST_VISIBLE) { panic!("Cannot map a MemoryPool on memory type {} which is not host-visible", self.mem_type); }
        let pointer: NonNull<u8> = self.device.map_memory(self.memory, self.mem_size);
        self.mapped.set(Some(pointer));
        pointer
    }

    /// Flushes the mapped range of this pool.
    #[inline]
    pub fn flush(&self) {
        self.device.flush_memory(self.memory);
    }

    /// Copies the given bytes to the start of the pool, flushing afterwards if the memory type is not host-coherent.
    ///
    /// # Arguments
    /// - `bytes`: The bytes to write into the pool. Must not number more than the pool's size.
    ///
    /// # Panics
    /// This function panics if more bytes are given than fit in the pool, or if the pool does not live on a host-visible memory type.
    pub fn overwrite(&self, bytes: &[u8]) {
        if bytes.len() > self.mem_size { panic!("Cannot overwrite MemoryPool of {} bytes with {} bytes", self.mem_size, bytes.len()); }

        // Write the bytes to the mapped memory
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped_ptr().as_ptr(), bytes.len()); }

        // Make sure the device sees the write
        if !self.mem_props.check(MemoryPropertyFlags::HOST_COHERENT) {
            self.flush();
        }
    }



    /// Returns the device where this pool's memory lives.
    #[inline]
    pub fn device(&self) -> &Rc<dyn MemoryDevice> { &self.device }

    /// Returns the physical VkDeviceMemory which this pool wraps.
    #[inline]
    pub fn vk(&self) -> vk::DeviceMemory { self.memory }

    /// Returns the DeviceMemoryType where this pool lives.
    #[inline]
    pub fn mem_type(&self) -> DeviceMemoryType { self.mem_type }

    /// Returns the MemoryPropertyFlags that describe the properties supported by this pool.
    #[inline]
    pub fn properties(&self) -> MemoryPropertyFlags { self.mem_props }

    /// Returns the size of the allocated pool (in bytes).
    #[inline]
    pub fn mem_size(&self) -> usize { self.mem_size }
}

impl Drop for MemoryPool {
    #[inline]
    fn drop(&mut self) {
        // Deallocate the device memory
        log_destroy!(self, MemoryPool);
        self.device.free_memory(self.memory);
    }
}
