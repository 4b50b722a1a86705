/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. Returns `None` on overflow.
pub(crate) const fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(v) => Some(v & !mask),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(1, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(48, 32), Some(64));
        assert_eq!(align_up(13, 1), Some(13));
    }

    #[test]
    fn test_align_up_overflow() {
        assert_eq!(align_up(u64::MAX, 8), None);
        assert_eq!(align_up(u64::MAX - 7, 8), Some(u64::MAX - 7));
    }
}
