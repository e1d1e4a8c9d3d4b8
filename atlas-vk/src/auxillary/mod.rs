/* MOD.rs
 *   by Mika
 *
 * Created:
 *   04 Jul 2022, 09:31:02
 * Last edited:
 *   28 Jul 2022, 13:19:45
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Implements auxillary structs, enums & flags (special kind of structs)
 *   that represent various Vulkan structs and are used throughout the
 *   crate.
**/

/// The module containing enums.
pub mod enums;
/// The module containing flags.
pub mod flags;
/// The module containing (parameter) structs.
pub mod structs;


/***** MACROS *****/
/// Prints a default destroy message for 'self'
#[macro_export]
macro_rules! log_destroy {
    ($self:ident,$type:path) => {
        log::debug!(concat!("Destroying ", stringify!($type), " {:?}..."), $self as *const $type)
    };

    ($self:ident,$type:path,$name:expr) => {
        log::debug!(concat!("Destroying ", stringify!($type), " '{}' ({:?})..."), $name, $self as *const $type)
    }
}
