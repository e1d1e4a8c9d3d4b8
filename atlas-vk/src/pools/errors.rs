/* ERRORS.rs
 *   by Mika
 *
 * Created:
 *   06 Jul 2022, 15:31:19
 * Last edited:
 *   30 Jul 2022, 09:44:28
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Contains errors that relate to the pools.
**/

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};


/***** ERRORS *****/
/// Defines errors for the memory pools and their allocators.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AllocationError {
    /// No memory type or no free block could satisfy the request; a fresh or larger pool might.
    OutOfMemory{ req_size: usize },
    /// The request is larger than any single pool this allocator will ever create; only a fallback that sizes pools to the request can help.
    InsufficientPoolSize{ req_size: usize, pool_size: usize },
}

impl Display for AllocationError {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use AllocationError::*;
        match self {
            OutOfMemory{ req_size }                     => write!(f, "Could not allocate new block of {} bytes: out of memory", req_size),
            InsufficientPoolSize{ req_size, pool_size } => write!(f, "Could not allocate new block of {} bytes: pools of this allocator are only {} bytes", req_size, pool_size),
        }
    }
}

impl Error for AllocationError {}
