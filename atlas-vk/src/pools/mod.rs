/* MOD.rs
 *   by Mika
 *
 * Created:
 *   06 Jul 2022, 15:28:40
 * Last edited:
 *   12 Jul 2022, 09:03:11
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Entrypoint to the module that contains the pool implementations.
**/

/// Contains errors for the various pools.
pub mod errors;
/// The module for device memory and its allocators.
pub mod memory;
