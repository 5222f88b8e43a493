//! Part segmentation.
//!
//! [`segment`] splits an object of known size into fixed-size parts,
//! lazily.  Descriptors come out in ascending part-number order, cover
//! every byte exactly once, and only the last part may be short.
//!
//! A zero-byte object yields zero parts; callers route empty objects
//! through a single-shot put instead.

use std::iter::FusedIterator;
use std::num::NonZeroU64;

/// One unit of upload work: which bytes form which part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 1-based, contiguous part number.
    pub part_number: u32,
    /// Byte offset of the part within the object.
    pub offset: u64,
    /// Byte length of the part.
    pub length: u64,
}

impl PartDescriptor {
    /// Offset one past the last byte of this part.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Number of parts needed for `total_size` bytes at `max_part_size` each.
pub fn part_count(total_size: u64, max_part_size: NonZeroU64) -> u64 {
    total_size.div_ceil(max_part_size.get())
}

/// Lazily segment `total_size` bytes into parts of at most `max_part_size`.
///
/// Stateless: calling it again with the same arguments restarts the
/// sequence from part 1.
///
/// Part numbers are `u32`; the sequence ends after part `u32::MAX` even if
/// bytes remain. Check [`part_count`] first when that matters.
pub fn segment(total_size: u64, max_part_size: NonZeroU64) -> PartSegments {
    PartSegments {
        total_size,
        max_part_size: max_part_size.get(),
        next_offset: 0,
        next_part_number: 1,
    }
}

/// Iterator returned by [`segment`].
#[derive(Debug, Clone)]
pub struct PartSegments {
    total_size: u64,
    max_part_size: u64,
    next_offset: u64,
    next_part_number: u32,
}

impl Iterator for PartSegments {
    type Item = PartDescriptor;

    fn next(&mut self) -> Option<PartDescriptor> {
        if self.next_offset >= self.total_size {
            return None;
        }
        let remaining = self.total_size - self.next_offset;
        let descriptor = PartDescriptor {
            part_number: self.next_part_number,
            offset: self.next_offset,
            length: remaining.min(self.max_part_size),
        };
        match self.next_part_number.checked_add(1) {
            Some(next) => {
                self.next_offset = descriptor.end();
                self.next_part_number = next;
            }
            // Out of part numbers.
            None => self.next_offset = self.total_size,
        }
        Some(descriptor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let numbers_left = u64::from(u32::MAX - self.next_part_number) + 1;
        let remaining = (self.total_size - self.next_offset)
            .div_ceil(self.max_part_size)
            .min(numbers_left);
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl ExactSizeIterator for PartSegments {}

impl FusedIterator for PartSegments {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    fn size(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn test_twelve_mib_in_five_mib_parts() {
        let parts: Vec<_> = segment(12 * MIB, size(5 * MIB)).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(|p| p.length).collect::<Vec<_>>(),
            vec![5 * MIB, 5 * MIB, 2 * MIB]
        );
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(parts[2].offset, 10 * MIB);
    }

    #[test]
    fn test_exact_multiple_has_full_last_part() {
        let parts: Vec<_> = segment(10 * MIB, size(5 * MIB)).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].length, 5 * MIB);
    }

    #[test]
    fn test_single_part_when_object_fits() {
        let parts: Vec<_> = segment(5 * MIB, size(5 * MIB)).collect();
        assert_eq!(
            parts,
            vec![PartDescriptor {
                part_number: 1,
                offset: 0,
                length: 5 * MIB,
            }]
        );
    }

    #[test]
    fn test_sequence_ends_at_last_part_number() {
        let mut parts = PartSegments {
            total_size: 10,
            max_part_size: 1,
            next_offset: 5,
            next_part_number: u32::MAX,
        };
        assert_eq!(parts.len(), 1);
        let last = parts.next().unwrap();
        assert_eq!(last.part_number, u32::MAX);
        assert_eq!(last.offset, 5);
        assert_eq!(parts.len(), 0);
        assert!(parts.next().is_none());
    }

    #[test]
    fn test_empty_object_yields_no_parts() {
        let mut parts = segment(0, size(5 * MIB));
        assert_eq!(parts.len(), 0);
        assert!(parts.next().is_none());
        assert_eq!(part_count(0, size(5 * MIB)), 0);
    }

    #[test]
    fn test_restartable_by_reinvoking() {
        let first: Vec<_> = segment(17, size(4)).collect();
        let second: Vec<_> = segment(17, size(4)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fused_after_exhaustion() {
        let mut parts = segment(3, size(2));
        assert!(parts.next().is_some());
        assert!(parts.next().is_some());
        assert!(parts.next().is_none());
        assert!(parts.next().is_none());
    }

    #[test]
    fn test_exact_size_tracks_progress() {
        let mut parts = segment(12 * MIB, size(5 * MIB));
        assert_eq!(parts.len(), 3);
        parts.next();
        assert_eq!(parts.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_parts_cover_object_exactly(total in 0u64..10_000_000, max in 1u64..2_000_000) {
            let parts: Vec<_> = segment(total, size(max)).collect();

            prop_assert_eq!(parts.len() as u64, part_count(total, size(max)));
            prop_assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), total);

            let mut expected_offset = 0;
            for (idx, part) in parts.iter().enumerate() {
                prop_assert_eq!(part.part_number as usize, idx + 1);
                prop_assert_eq!(part.offset, expected_offset);
                prop_assert!(part.length > 0);
                prop_assert!(part.length <= max);
                if idx + 1 < parts.len() {
                    prop_assert_eq!(part.length, max);
                }
                expected_offset = part.end();
            }
        }
    }
}
