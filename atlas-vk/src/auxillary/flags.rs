/* FLAGS.rs
 *   by Mika
 *
 * Created:
 *   04 Jul 2022, 10:02:17
 * Last edited:
 *   29 Jul 2022, 10:55:40
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Contains auxillary Flag-structs used as representatives of Vulkan
 *   flags.
**/

use std::cmp::PartialEq;
use std::fmt::{Debug, Display};

use ash::vk;
use num_traits::{NumCast, Unsigned};


/***** UNIT TESTS *****/





/***** HELPER MACROS *****/
/// Wrapper macro to shortcut the Display trait for flags
macro_rules! flags_display {
    ($flag:ident, $($match:path => $code:literal),+ $(,)?) => {
        impl Display for $flag {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Construct a list
                let mut first = true;
                let mut i     = 0x1;
                while i != 0 {
                    // Check if this property is enabled
                    if self.0 & i != 0 {
                        // Write the comma if necessary
                        if first { first = false; }
                        else { write!(f, ", ")?; }

                        // Write the name of this property
                        match $flag(self.0 & i) {
                            $($match => { write!(f, $code)?; }),+
                            val => { panic!(concat!("Encountered illegal ", stringify!($flag), " value '{}'"), val.0); }
                        }
                    }

                    // Increment the i
                    i = i << 1;
                }

                // Done
                Ok(())
            }
        }
    }
}

/// Wrapper macro to shortcut the From trait for flags
macro_rules! flags_from {
    (vk::$from:ident, $to:ident, $($match:path => $target:path),+ $(,)?) => {
        impl From<vk::$from> for $to {
            fn from(value: vk::$from) -> $to {
                // Construct the resulting flag iteratively
                let mut result: $to = $to::empty();
                $(if (value & $match).as_raw() != 0 { result |= $target });+
                result
            }
        }

        impl From<$to> for vk::$from {
            fn from(value: $to) -> vk::$from {
                // Construct the resulting flag iteratively
                let mut result: vk::$from = vk::$from::empty();
                $(if value.check($target) { result |= $match });+
                result
            }
        }
    };
}

/// Wrapper macro to shortcut the bitwise operators for flags
macro_rules! flags_ops {
    ($flag:ident) => {
        impl std::ops::BitOr for $flag {
            type Output = Self;

            #[inline]
            fn bitor(self, other: Self) -> Self::Output { Self(self.0 | other.0) }
        }

        impl std::ops::BitOrAssign for $flag {
            #[inline]
            fn bitor_assign(&mut self, other: Self) { self.0 |= other.0; }
        }
    };
}





/***** HELPER TRAIT *****/
/// Provides a uniform interface to all flags.
pub trait Flags: Clone + Copy + Debug + Eq + PartialEq {
    /// Determines the type of the internal value where the flags are stored.
    type RawType: NumCast + PartialEq + Unsigned + std::ops::BitAnd<Output = Self::RawType> + std::ops::Not<Output = Self::RawType> + Copy;


    /// Constructor for the Flags object that creates it without any flags initialized.
    ///
    /// # Returns
    /// A new instance of Self with no flags set.
    #[inline]
    fn empty() -> Self { Self::from_raw(num_traits::cast::cast::<u8, Self::RawType>(0).unwrap()) }

    /// Constructor for the Flags object that creates it with all flags initialized.
    ///
    /// # Returns
    /// A new instance of Self with all flags set.
    #[inline]
    fn all() -> Self { Self::from_raw(!num_traits::cast::cast::<u8, Self::RawType>(0).unwrap()) }

    /// Constructor for the Flags object that creates it from a raw value.
    ///
    /// Note that this is an _Atlas_ raw flags rather than a _Vulkan_ raw flags; the two might not align! The only guarantee made by this raw value is that it is compatible with that of `Flags::as_raw()`.
    ///
    /// # Arguments
    /// - `value`: The raw value around which to construct this Flags.
    ///
    /// # Returns
    /// A new instance of Self with the flags set as in the raw value.
    fn from_raw(value: Self::RawType) -> Self;

    /// Returns the raw integer with the flags that is at the core of the Flags.
    ///
    /// Note that this is an _Atlas_ raw flags rather than a _Vulkan_ raw flags; the two might not align! The only guarantee made by this raw value is that it is compatible with that of `Flags::from_raw()`.
    ///
    /// # Returns
    /// The raw value at the heart of this Flags.
    fn as_raw(&self) -> Self::RawType;



    /// Returns true iff no flags are set.
    #[inline]
    fn is_empty(&self) -> bool { *self == Self::empty() }

    /// Checks if the given argument is a subset of this set of flags.
    ///
    /// # Arguments
    /// - `other`: The other `Flags` that might be a subset of this Flags.
    ///
    /// # Returns
    /// `true` if the given set is a subset of this one, or `false` otherwise.
    #[inline]
    fn check(&self, other: Self) -> bool { (self.as_raw() & other.as_raw()) == other.as_raw() }

    /// Checks if the given argument has at least one flag in common with this set of flags.
    ///
    /// # Arguments
    /// - `other`: The other `Flags` that might overlap with this Flags.
    ///
    /// # Returns
    /// `true` if at least one flag is set in both sets, or `false` otherwise.
    #[inline]
    fn intersects(&self, other: Self) -> bool { (self.as_raw() & other.as_raw()) != num_traits::cast::cast::<u8, Self::RawType>(0).unwrap() }
}





/***** MEMORY POOLS *****/
/// Lists properties of certain memory areas.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryPropertyFlags(u16);

impl MemoryPropertyFlags {
    /// Memory should be local to the Device (i.e., not some shared memory pool).
    pub const DEVICE_LOCAL: Self = Self(0x0001);
    /// Memory should be writeable/readable by the Host.
    pub const HOST_VISIBLE: Self = Self(0x0002);
    /// Memory should be coherent with the host (not requiring separate flush calls).
    pub const HOST_COHERENT: Self = Self(0x0004);
    /// Memory is cached, which is faster but non-coherent.
    pub const HOST_CACHED: Self = Self(0x0008);
    /// Memory might need to be allocated on first access.
    pub const LAZILY_ALLOCATED: Self = Self(0x0010);
    /// Memory is protected; only Device may access it and some special queue operations.
    pub const PROTECTED: Self = Self(0x0020);
}

impl Flags for MemoryPropertyFlags {
    /// Determines the type of the internal value where the flags are stored.
    type RawType = u16;


    /// Constructor for the Flags object that creates it from a raw value.
    ///
    /// # Arguments
    /// - `value`: The raw value around which to construct this Flags.
    ///
    /// # Returns
    /// A new instance of Self with the flags set as in the raw value.
    #[inline]
    fn from_raw(value: Self::RawType) -> Self { Self(value) }

    /// Returns the raw integer with the flags that is at the core of the Flags.
    ///
    /// # Returns
    /// The raw value at the heart of this Flags.
    #[inline]
    fn as_raw(&self) -> Self::RawType { self.0 }
}

flags_ops!(MemoryPropertyFlags);

flags_display!(MemoryPropertyFlags,
    MemoryPropertyFlags::DEVICE_LOCAL     => "DEVICE_LOCAL",
    MemoryPropertyFlags::HOST_VISIBLE     => "HOST_VISIBLE",
    MemoryPropertyFlags::HOST_COHERENT    => "HOST_COHERENT",
    MemoryPropertyFlags::HOST_CACHED      => "HOST_CACHED",
    MemoryPropertyFlags::LAZILY_ALLOCATED => "LAZILY_ALLOCATED",
    MemoryPropertyFlags::PROTECTED        => "PROTECTED",
);

flags_from!(vk::MemoryPropertyFlags, MemoryPropertyFlags,
    vk::MemoryPropertyFlags::DEVICE_LOCAL     => MemoryPropertyFlags::DEVICE_LOCAL,
    vk::MemoryPropertyFlags::HOST_VISIBLE     => MemoryPropertyFlags::HOST_VISIBLE,
    vk::MemoryPropertyFlags::HOST_COHERENT    => MemoryPropertyFlags::HOST_COHERENT,
    vk::MemoryPropertyFlags::HOST_CACHED      => MemoryPropertyFlags::HOST_CACHED,
    vk::MemoryPropertyFlags::LAZILY_ALLOCATED => MemoryPropertyFlags::LAZILY_ALLOCATED,
    vk::MemoryPropertyFlags::PROTECTED        => MemoryPropertyFlags::PROTECTED,
);
