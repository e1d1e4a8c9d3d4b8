/* STRUCTS.rs
 *   by Mika
 *
 * Created:
 *   04 Jul 2022, 10:21:55
 * Last edited:
 *   30 Jul 2022, 11:36:12
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Contains auxillary wrapped structs around Vulkan structs, to not
 *   expose any ash to the outside world.
**/

use std::fmt::{Display, Formatter, Result as FResult};

use ash::vk;

use crate::auxillary::flags::{Flags, MemoryPropertyFlags};


/***** UNIT TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    /// Tests the conversion between a memory type and its one-bit mask.
    #[test]
    fn test_memory_type_flags() {
        assert_eq!(DeviceMemoryTypeFlags::from(DeviceMemoryType::from(0)), DeviceMemoryTypeFlags(0x01));
        assert_eq!(DeviceMemoryTypeFlags::from(DeviceMemoryType::from(5)), DeviceMemoryTypeFlags(0x20));
        assert_eq!(DeviceMemoryType::from(DeviceMemoryTypeFlags(0x20)), DeviceMemoryType::from(5));

        // The mask of all types admits every individual type
        assert!(DeviceMemoryTypeFlags::ALL.check(DeviceMemoryType::from(31)));
        assert!(!DeviceMemoryTypeFlags::EMPTY.check(DeviceMemoryType::from(0)));
        assert!(DeviceMemoryTypeFlags(0x06).check(DeviceMemoryType::from(2)));
        assert!(!DeviceMemoryTypeFlags(0x06).check(DeviceMemoryType::from(3)));
    }

    /// Tests that a memory type criteria accepts and rejects the proper property sets.
    #[test]
    fn test_criteria_matches() {
        let criteria = MemoryTypeCriteria::new(MemoryPropertyFlags::HOST_VISIBLE, MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(criteria.matches(MemoryPropertyFlags::HOST_VISIBLE));
        assert!(criteria.matches(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT));
        assert!(!criteria.matches(MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE));
        assert!(!criteria.matches(MemoryPropertyFlags::HOST_COHERENT));
    }

    /// Tests constructing memory requirements from the raw Vulkan struct.
    #[test]
    fn test_requirements_from_vk() {
        let reqs: MemoryRequirements = vk::MemoryRequirements {
            size             : 512,
            alignment        : 64,
            memory_type_bits : 0x0F,
        }.into();
        assert_eq!(reqs.size, 512);
        assert_eq!(reqs.align, 64);
        assert_eq!(reqs.types, DeviceMemoryTypeFlags(0x0F));
    }
}





/***** MEMORY POOLS *****/
/// Define a single type of memory that a device has to offer.
///
/// Note: because the actual list is device-dependent, there are no constants available for this "enum" implementation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceMemoryType(u32);

impl Display for DeviceMemoryType {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceMemoryType {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<DeviceMemoryType> for u32 {
    #[inline]
    fn from(value: DeviceMemoryType) -> Self {
        value.0
    }
}

impl From<DeviceMemoryTypeFlags> for DeviceMemoryType {
    fn from(value: DeviceMemoryTypeFlags) -> Self {
        // Sanity check that it has only one value set
        if value.0.count_ones() != 1 { panic!("Cannot cast a DeviceMemoryTypeFlags to a DeviceMemoryType if it has less or more than one flags set"); }
        Self(value.0.trailing_zeros())
    }
}

impl From<DeviceMemoryType> for DeviceMemoryTypeFlags {
    #[inline]
    fn from(value: DeviceMemoryType) -> Self {
        Self(0x1 << value.0)
    }
}



/// Define multiple types of memory that a device has to offer.
///
/// Note: because the actual list is device-dependent, there are no constants available for this "flags" implementation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DeviceMemoryTypeFlags(pub(crate) u32);

impl DeviceMemoryTypeFlags {
    /// A DeviceMemoryTypeFlags struct with _all_ memory types.
    pub const ALL: Self   = Self(!0);
    /// An empty DeviceMemoryTypeFlags struct.
    pub const EMPTY: Self = Self(0);

    /// Checks if this DeviceMemoryTypeFlags is a superset of the given one.
    #[inline]
    pub fn check<T: Into<DeviceMemoryTypeFlags>>(&self, other: T) -> bool { let other: Self = other.into(); (self.0 & other.0) == other.0 }

    /// Returns the raw bitmask of memory types.
    #[inline]
    pub fn as_raw(&self) -> u32 { self.0 }
}

impl Display for DeviceMemoryTypeFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        // Construct a list of the type indices set in this mask
        let mut first = true;
        for i in 0..u32::BITS {
            // Check if this type is enabled
            if self.0 & (0x1 << i) != 0 {
                // Write the comma if necessary
                if first { first = false; }
                else { write!(f, ", ")?; }

                // Write the index of this type
                write!(f, "{}", i)?;
            }
        }

        // Done
        Ok(())
    }
}

impl From<u32> for DeviceMemoryTypeFlags {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<DeviceMemoryTypeFlags> for u32 {
    #[inline]
    fn from(value: DeviceMemoryTypeFlags) -> Self {
        value.0
    }
}



/// Defines the memory requirements of an allocation, either given directly or taken from a buffer or image.
#[derive(Clone, Debug)]
pub struct MemoryRequirements {
    /// The minimum size of the required memory block.
    pub size  : usize,
    /// The alignment (in bytes) of the start of the required memory block, relative to the start of its driver block. Must be a power of two.
    pub align : usize,
    /// The device memory types that are acceptable for this allocation.
    pub types : DeviceMemoryTypeFlags,
}

impl MemoryRequirements {
    /// Constructor for the MemoryRequirements that accepts any memory type.
    ///
    /// # Arguments
    /// - `size`: The minimum size (in bytes) of the required memory block. Must be at least 1.
    /// - `align`: The alignment (in bytes) of the start of the required memory block. Must be a power of two.
    ///
    /// # Returns
    /// A new MemoryRequirements with all memory types marked as acceptable.
    #[inline]
    pub fn new(size: usize, align: usize) -> Self {
        Self {
            size,
            align,
            types : DeviceMemoryTypeFlags::ALL,
        }
    }

    /// Returns a copy of these requirements restricted to the given set of acceptable memory types.
    ///
    /// # Arguments
    /// - `types`: The DeviceMemoryTypeFlags that list the acceptable memory types.
    #[inline]
    pub fn with_types(self, types: DeviceMemoryTypeFlags) -> Self {
        Self {
            types,
            ..self
        }
    }
}

impl From<vk::MemoryRequirements> for MemoryRequirements {
    #[inline]
    fn from(value: vk::MemoryRequirements) -> Self {
        Self {
            size  : value.size as usize,
            align : value.alignment as usize,
            types : value.memory_type_bits.into(),
        }
    }
}

impl From<MemoryRequirements> for vk::MemoryRequirements {
    #[inline]
    fn from(value: MemoryRequirements) -> Self {
        Self {
            size             : value.size as vk::DeviceSize,
            alignment        : value.align as vk::DeviceSize,
            memory_type_bits : value.types.into(),
        }
    }
}



/// Describes which device memory types are acceptable for an allocation in terms of their properties.
#[derive(Clone, Copy, Debug)]
pub struct MemoryTypeCriteria {
    /// The properties that a memory type must support.
    pub required  : MemoryPropertyFlags,
    /// The properties that a memory type may not support.
    pub forbidden : MemoryPropertyFlags,
}

impl MemoryTypeCriteria {
    /// Constructor for the MemoryTypeCriteria.
    ///
    /// # Arguments
    /// - `required`: The properties that a matching memory type must all support.
    /// - `forbidden`: The properties that a matching memory type may not support at all.
    #[inline]
    pub const fn new(required: MemoryPropertyFlags, forbidden: MemoryPropertyFlags) -> Self {
        Self {
            required,
            forbidden,
        }
    }

    /// Criteria for memory that the host can write to directly.
    #[inline]
    pub fn host_visible() -> Self {
        Self::new(MemoryPropertyFlags::HOST_VISIBLE, MemoryPropertyFlags::empty())
    }

    /// Criteria for memory that lives on the device itself.
    #[inline]
    pub fn device_local() -> Self {
        Self::new(MemoryPropertyFlags::DEVICE_LOCAL, MemoryPropertyFlags::empty())
    }

    /// Criteria for host-writeable memory that does not require explicit flushes.
    #[inline]
    pub fn host_coherent() -> Self {
        Self::new(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT, MemoryPropertyFlags::empty())
    }



    /// Checks whether a memory type with the given properties satisfies these criteria.
    ///
    /// # Arguments
    /// - `props`: The MemoryPropertyFlags of the memory type to check.
    ///
    /// # Returns
    /// `true` if all required properties are present and no forbidden property is, or `false` otherwise.
    #[inline]
    pub fn matches(&self, props: MemoryPropertyFlags) -> bool {
        props.check(self.required) && !props.intersects(self.forbidden)
    }
}
