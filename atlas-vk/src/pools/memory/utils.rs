/* UTILS.rs
 *   by Mika
 *
 * Created:
 *   08 Jul 2022, 11:02:13
 * Last edited:
 *   14 Jul 2022, 16:55:30
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Contains small helpers shared by the memory allocators.
**/


/***** UNIT TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    /// Tests rounding offsets up to alignment boundaries.
    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 1), 0);
        assert_eq!(align_up(17, 1), 17);
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(100, 128), 128);
    }

    /// Tests that non-power-of-two alignments are rejected.
    #[test]
    #[should_panic]
    fn test_align_up_non_power_of_two() {
        align_up(0, 24);
    }
}





/***** LIBRARY *****/
/// Rounds the given offset up to the next multiple of the given alignment.
///
/// # Arguments
/// - `offset`: The offset (in bytes) to align.
/// - `align`: The alignment (in bytes) to round up to. Must be a power of two of at least 1.
///
/// # Returns
/// The smallest multiple of `align` that is at least `offset`.
///
/// # Panics
/// This function panics if `align` is not a power of two.
#[inline]
pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    if !align.is_power_of_two() { panic!("Given alignment '{}' is not a power of two", align); }
    (offset + (align - 1)) & !(align - 1)
}
