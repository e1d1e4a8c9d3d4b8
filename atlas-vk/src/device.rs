/* DEVICE.rs
 *   by Mika
 *
 * Created:
 *   06 Jul 2022, 14:55:31
 * Last edited:
 *   31 Jul 2022, 10:18:56
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Defines the boundary between the memory pools and the driver: the
 *   handful of driver calls that the allocation subsystem consumes, plus
 *   the implementation of that boundary on top of an ash logical device.
**/

use std::ptr;
use std::ptr::NonNull;
use std::rc::Rc;
use std::slice;

use ash::vk;

pub use crate::pools::errors::AllocationError as Error;
use crate::auxillary::flags::MemoryPropertyFlags;
use crate::auxillary::structs::{DeviceMemoryType, MemoryTypeCriteria};


/***** UNIT TESTS *****/
#[cfg(test)]
mod tests {
    use super::testing::MockDevice;
    use super::*;
    use crate::auxillary::flags::Flags;

    /// Tests that the memory type search filters on required and forbidden properties.
    #[test]
    fn test_search_filters() {
        let device = MockDevice::new(vec![
            (MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT, 1),
            (MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE, 0),
        ]);

        // Only the host-visible types qualify
        let found = device.search_memory_types(&MemoryTypeCriteria::host_visible());
        let indices: Vec<u32> = found.iter().map(|info| info.index.into()).collect();
        assert_eq!(indices, vec![2, 1]);

        // Forbidding device-local memory drops the combined type
        let criteria = MemoryTypeCriteria::new(MemoryPropertyFlags::HOST_VISIBLE, MemoryPropertyFlags::DEVICE_LOCAL);
        let found = device.search_memory_types(&criteria);
        let indices: Vec<u32> = found.iter().map(|info| info.index.into()).collect();
        assert_eq!(indices, vec![1]);

        // Nothing is lazily allocated
        let criteria = MemoryTypeCriteria::new(MemoryPropertyFlags::LAZILY_ALLOCATED, MemoryPropertyFlags::empty());
        assert!(device.search_memory_types(&criteria).is_empty());
    }

    /// Tests that candidates are ranked by ascending heap index first, then by ascending type index.
    #[test]
    fn test_search_ranking() {
        let device = MockDevice::new(vec![
            (MemoryPropertyFlags::DEVICE_LOCAL, 1),
            (MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (MemoryPropertyFlags::DEVICE_LOCAL, 1),
        ]);

        let found = device.search_memory_types(&MemoryTypeCriteria::device_local());
        let indices: Vec<u32> = found.iter().map(|info| info.index.into()).collect();
        assert_eq!(indices, vec![1, 2, 0, 3]);
    }
}





/***** POPULATE FUNCTIONS *****/
/// Populates the alloc info for a new block of device memory (VkMemoryAllocateInfo).
///
/// # Arguments
/// - `size`: The VkDeviceSize number of bytes to allocate.
/// - `mem_type`: The index of the device memory type that we will allocate on.
#[inline]
fn populate_alloc_info(size: vk::DeviceSize, mem_type: u32) -> vk::MemoryAllocateInfo {
    vk::MemoryAllocateInfo {
        // Set the standard stuff
        s_type : vk::StructureType::MEMORY_ALLOCATE_INFO,
        p_next : ptr::null(),

        // Set the size & memory type
        allocation_size   : size,
        memory_type_index : mem_type,
    }
}

/// Populates a mapped memory range covering an entire block (VkMappedMemoryRange).
///
/// # Arguments
/// - `memory`: The VkDeviceMemory whose mapped range to describe.
#[inline]
fn populate_mapped_range(memory: vk::DeviceMemory) -> vk::MappedMemoryRange {
    vk::MappedMemoryRange {
        // Set the standard stuff
        s_type : vk::StructureType::MAPPED_MEMORY_RANGE,
        p_next : ptr::null(),

        // Cover the whole block
        memory,
        offset : 0,
        size   : vk::WHOLE_SIZE,
    }
}





/***** AUXILLARY STRUCTS *****/
/// Describes one entry of a device's memory type table.
#[derive(Clone, Copy, Debug)]
pub struct DeviceMemoryTypeInfo {
    /// The index of this memory type.
    pub index      : DeviceMemoryType,
    /// The properties that this memory type supports.
    pub props      : MemoryPropertyFlags,
    /// The index of the heap that this memory type allocates from.
    pub heap_index : u32,
}





/***** LIBRARY *****/
/// The driver calls that the memory pools consume.
///
/// The pools never talk to the driver in any other way, so anything implementing this trait can back them; the canonical implementation is [`Device`].
pub trait MemoryDevice {
    /// Allocates a new block of device memory on the given memory type.
    ///
    /// # Arguments
    /// - `mem_type`: The DeviceMemoryType to allocate the block on.
    /// - `size`: The size (in bytes) of the block to allocate.
    ///
    /// # Returns
    /// The handle of the newly allocated block.
    ///
    /// # Errors
    /// This function errors with `Error::OutOfMemory` if the driver reports that either host or device memory is exhausted. Any other driver failure is a programmer error.
    fn allocate_memory(&self, mem_type: DeviceMemoryType, size: usize) -> Result<vk::DeviceMemory, Error>;

    /// Frees a block of device memory allocated with `MemoryDevice::allocate_memory()`.
    ///
    /// # Arguments
    /// - `memory`: The handle of the block to free.
    fn free_memory(&self, memory: vk::DeviceMemory);

    /// Maps an entire block of device memory to a persistent host pointer.
    ///
    /// The pointer stays valid until the block is freed.
    ///
    /// # Arguments
    /// - `memory`: The handle of the block to map.
    /// - `size`: The size (in bytes) of the block.
    ///
    /// # Panics
    /// This function may panic if the block does not live on a host-visible memory type.
    fn map_memory(&self, memory: vk::DeviceMemory, size: usize) -> NonNull<u8>;

    /// Flushes the mapped range of the given block of device memory.
    ///
    /// # Arguments
    /// - `memory`: The handle of the (mapped) block to flush.
    fn flush_memory(&self, memory: vk::DeviceMemory);

    /// Returns the memory type table of the physical device behind this device.
    fn memory_types(&self) -> &[DeviceMemoryTypeInfo];



    /// Searches the memory type table for the types satisfying the given criteria.
    ///
    /// # Arguments
    /// - `criteria`: The MemoryTypeCriteria that list the required and forbidden properties.
    ///
    /// # Returns
    /// The matching entries of the table, best candidate first: ascending heap index, ties broken by ascending type index.
    fn search_memory_types(&self, criteria: &MemoryTypeCriteria) -> Vec<DeviceMemoryTypeInfo> {
        // Collect the matching entries
        let mut result: Vec<DeviceMemoryTypeInfo> = self.memory_types().iter().filter(|info| criteria.matches(info.props)).cloned().collect();

        // Order by preference & done
        result.sort_by_key(|info| (info.heap_index, u32::from(info.index)));
        result
    }
}



/// Implements the driver boundary on top of an ash logical device.
///
/// This struct does not create instances or devices; it is handed the already-created handles by whoever owns the Vulkan setup.
pub struct Device {
    /// The logical device that memory is allocated on.
    device          : ash::Device,
    /// The physical device that the logical device runs on.
    physical_device : vk::PhysicalDevice,
    /// The memory type table of the physical device, queried once at construction.
    types           : Vec<DeviceMemoryTypeInfo>,
}

impl Device {
    /// Constructor for the Device.
    ///
    /// # Arguments
    /// - `instance`: The ash Instance that the physical device was enumerated from.
    /// - `physical_device`: The VkPhysicalDevice whose memory will be allocated.
    /// - `device`: The ash logical Device created on that physical device.
    ///
    /// # Returns
    /// A new Device instance, already wrapped in a reference-counting pointer.
    pub fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice, device: ash::Device) -> Rc<Self> {
        // Query the memory type table of this device
        let device_props: vk::PhysicalDeviceMemoryProperties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let device_types: &[vk::MemoryType] = unsafe { slice::from_raw_parts(device_props.memory_types.as_ptr(), device_props.memory_type_count as usize) };

        // Convert it into our own representation
        let types: Vec<DeviceMemoryTypeInfo> = device_types.iter().enumerate().map(|(i, mem_type)| DeviceMemoryTypeInfo {
            index      : DeviceMemoryType::from(i as u32),
            props      : mem_type.property_flags.into(),
            heap_index : mem_type.heap_index,
        }).collect();

        // Done, return as a struct
        Rc::new(Self {
            device,
            physical_device,
            types,
        })
    }



    /// Returns the underlying ash logical device.
    #[inline]
    pub fn vk(&self) -> &ash::Device { &self.device }

    /// Returns the physical device behind the logical device.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice { self.physical_device }
}

impl MemoryDevice for Device {
    /// Allocates a new block of device memory on the given memory type.
    ///
    /// # Arguments
    /// - `mem_type`: The DeviceMemoryType to allocate the block on.
    /// - `size`: The size (in bytes) of the block to allocate.
    ///
    /// # Returns
    /// The handle of the newly allocated block.
    ///
    /// # Errors
    /// This function errors with `Error::OutOfMemory` if the driver reports that either host or device memory is exhausted. Any other driver failure is a programmer error.
    fn allocate_memory(&self, mem_type: DeviceMemoryType, size: usize) -> Result<vk::DeviceMemory, Error> {
        // Populate the memory info
        let alloc_info: vk::MemoryAllocateInfo = populate_alloc_info(size as vk::DeviceSize, mem_type.into());

        // Attempt the allocation on the driver
        unsafe {
            match self.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => Ok(memory),

                // The two out-of-memory statuses are the caller's problem
                Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)   |
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(Error::OutOfMemory{ req_size: size }),

                // Everything else means we called the driver wrongly
                Err(err) => { panic!("Could not allocate {} bytes of device memory on type {}: {}", size, mem_type, err); }
            }
        }
    }

    /// Frees a block of device memory allocated with `MemoryDevice::allocate_memory()`.
    ///
    /// # Arguments
    /// - `memory`: The handle of the block to free.
    #[inline]
    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None); }
    }

    /// Maps an entire block of device memory to a persistent host pointer.
    ///
    /// # Arguments
    /// - `memory`: The handle of the block to map.
    /// - `size`: The size (in bytes) of the block.
    ///
    /// # Panics
    /// This function panics if the driver refuses the mapping; the pools only call it for host-visible types.
    fn map_memory(&self, memory: vk::DeviceMemory, _size: usize) -> NonNull<u8> {
        // Map the whole block persistently
        let pointer: *mut std::ffi::c_void = match unsafe { self.device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) } {
            Ok(pointer) => pointer,
            Err(err)    => { panic!("Could not map device memory {:?}: {}", memory, err); }
        };

        // The driver never hands out NULL mappings on success
        match NonNull::new(pointer as *mut u8) {
            Some(pointer) => pointer,
            None          => { panic!("Driver returned a NULL mapping for device memory {:?}", memory); }
        }
    }

    /// Flushes the mapped range of the given block of device memory.
    ///
    /// # Arguments
    /// - `memory`: The handle of the (mapped) block to flush.
    fn flush_memory(&self, memory: vk::DeviceMemory) {
        let range: vk::MappedMemoryRange = populate_mapped_range(memory);
        if let Err(err) = unsafe { self.device.flush_mapped_memory_ranges(&[range]) } {
            panic!("Could not flush device memory {:?}: {}", memory, err);
        }
    }

    /// Returns the memory type table of the physical device behind this device.
    #[inline]
    fn memory_types(&self) -> &[DeviceMemoryTypeInfo] { &self.types }
}





/***** TEST DOUBLES *****/
/// A stand-in driver for the unit tests, backing "device memory" with plain host allocations.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    use ash::vk::Handle;

    use super::*;


    /// Implements the driver boundary on host memory, with an optional byte budget so out-of-memory paths can be exercised.
    pub(crate) struct MockDevice {
        /// The memory type table this fake device advertises.
        types    : Vec<DeviceMemoryTypeInfo>,
        /// The live backing blocks, keyed by raw handle.
        memories : RefCell<HashMap<u64, Box<[u8]>>>,
        /// The next raw handle to give out.
        next     : Cell<u64>,
        /// The remaining byte budget before allocations start failing.
        budget   : Cell<usize>,
        /// The number of flushes requested so far.
        flushes  : Cell<usize>,
    }

    impl MockDevice {
        /// Constructor for the MockDevice with an unlimited byte budget.
        ///
        /// # Arguments
        /// - `types`: The memory type table to advertise, as `(properties, heap index)` pairs; the type index is the position in the list.
        pub(crate) fn new(types: Vec<(MemoryPropertyFlags, u32)>) -> Rc<Self> {
            Self::with_budget(types, usize::MAX)
        }

        /// Constructor for the MockDevice with a limited byte budget.
        ///
        /// # Arguments
        /// - `types`: The memory type table to advertise, as `(properties, heap index)` pairs.
        /// - `budget`: The total number of bytes this device will hand out before reporting out-of-memory.
        pub(crate) fn with_budget(types: Vec<(MemoryPropertyFlags, u32)>, budget: usize) -> Rc<Self> {
            Rc::new(Self {
                types    : types.into_iter().enumerate().map(|(i, (props, heap_index))| DeviceMemoryTypeInfo {
                    index : DeviceMemoryType::from(i as u32),
                    props,
                    heap_index,
                }).collect(),
                memories : RefCell::new(HashMap::new()),
                next     : Cell::new(1),
                budget   : Cell::new(budget),
                flushes  : Cell::new(0),
            })
        }

        /// Shortcut for a device with a single host-visible, host-coherent memory type.
        pub(crate) fn host_visible() -> Rc<Self> {
            Self::new(vec![ (MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT, 0) ])
        }

        /// Shortcut for a device with a single host-visible but non-coherent memory type.
        pub(crate) fn host_cached() -> Rc<Self> {
            Self::new(vec![ (MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED, 0) ])
        }

        /// Shortcut for a device with a single device-local memory type.
        pub(crate) fn device_local() -> Rc<Self> {
            Self::new(vec![ (MemoryPropertyFlags::DEVICE_LOCAL, 0) ])
        }



        /// Returns the number of blocks currently allocated on this device.
        pub(crate) fn live(&self) -> usize { self.memories.borrow().len() }

        /// Returns the number of flushes requested so far.
        pub(crate) fn flushes(&self) -> usize { self.flushes.get() }

        /// Returns a copy of the bytes backing the given block.
        pub(crate) fn contents(&self, memory: vk::DeviceMemory) -> Vec<u8> {
            self.memories.borrow().get(&memory.as_raw()).unwrap_or_else(|| panic!("Unknown device memory {:?}", memory)).to_vec()
        }
    }

    impl MemoryDevice for MockDevice {
        fn allocate_memory(&self, _mem_type: DeviceMemoryType, size: usize) -> Result<vk::DeviceMemory, Error> {
            // Respect the configured budget
            if size > self.budget.get() { return Err(Error::OutOfMemory{ req_size: size }); }
            self.budget.set(self.budget.get() - size);

            // Back the block with zeroed host memory
            let handle: u64 = self.next.get();
            self.next.set(handle + 1);
            self.memories.borrow_mut().insert(handle, vec![ 0; size ].into_boxed_slice());
            Ok(vk::DeviceMemory::from_raw(handle))
        }

        fn free_memory(&self, memory: vk::DeviceMemory) {
            match self.memories.borrow_mut().remove(&memory.as_raw()) {
                Some(data) => { self.budget.set(self.budget.get().saturating_add(data.len())); },
                None       => { panic!("Freeing unknown device memory {:?}", memory); }
            }
        }

        fn map_memory(&self, memory: vk::DeviceMemory, _size: usize) -> NonNull<u8> {
            // The boxed slice never moves while the entry lives, so the pointer stays valid until the free
            let memories = self.memories.borrow();
            let data: &Box<[u8]> = memories.get(&memory.as_raw()).unwrap_or_else(|| panic!("Mapping unknown device memory {:?}", memory));
            NonNull::new(data.as_ptr() as *mut u8).unwrap()
        }

        fn flush_memory(&self, memory: vk::DeviceMemory) {
            if !self.memories.borrow().contains_key(&memory.as_raw()) { panic!("Flushing unknown device memory {:?}", memory); }
            self.flushes.set(self.flushes.get() + 1);
        }

        fn memory_types(&self) -> &[DeviceMemoryTypeInfo] { &self.types }
    }
}
