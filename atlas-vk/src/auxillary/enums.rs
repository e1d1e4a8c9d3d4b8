/* ENUMS.rs
 *   by Mika
 *
 * Created:
 *   04 Jul 2022, 09:58:33
 * Last edited:
 *   27 Jul 2022, 17:12:09
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Contains auxillary enums that are used throughout the crate.
**/

use std::fmt::{Display, Formatter, Result as FResult};


/***** MEMORY POOLS *****/
/// The possible memory allocator strategies, so that allocators may be distinguished in diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemoryAllocatorKind {
    /// A first-fit allocator over a sorted free-region list with coalescing.
    FreeList,
    /// A power-of-two splitting allocator over a binary block tree.
    Buddy,
    /// An allocator that requests one fresh pool from the driver per allocation.
    Naive,
    /// An elastic sequence of same-type allocators, grown on demand.
    Chain,
    /// A main allocator with a backup for the requests it refuses.
    Fallback,
}

impl Display for MemoryAllocatorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use MemoryAllocatorKind::*;
        match self {
            FreeList => write!(f, "FreeList"),
            Buddy    => write!(f, "Buddy"),
            Naive    => write!(f, "Naive"),
            Chain    => write!(f, "Chain"),
            Fallback => write!(f, "Fallback"),
        }
    }
}
