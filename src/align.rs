use std::num::Wrapping;

/// Round `ix` up to the next multiple of `alignment`.
///
/// Alignment must be a power of two; every DBus alignment is.
pub(crate) fn align_up(ix: usize, alignment: usize) -> usize {
    debug_assert!(
        alignment.is_power_of_two(),
        "{} is not a power of 2, cannot be used as alignment",
        alignment
    );
    let mask = Wrapping(alignment) - Wrapping(1);
    let old = Wrapping(ix);
    let new = old + ((-old) & mask);
    debug_assert!(new >= old, "align_up overflowed: {} < {}", new, old);
    new.0
}

/// Number of padding bytes needed to bring `ix` to `alignment`.
pub(crate) fn padding(ix: usize, alignment: usize) -> usize {
    align_up(ix, alignment) - ix
}
