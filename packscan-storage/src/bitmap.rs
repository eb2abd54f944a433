//! Match bitmaps.
//!
//! Scan kernels emit one bit per logical value, packed 8 bits per byte
//! in little-endian bit order: value `i` lives in byte `i / 8`, bit `i % 8`.

/// Returns byte length of a match bitmap for n values, including the
/// slack that word-sized flushes may touch.
#[inline]
pub const fn bitmap_size(n: usize) -> usize {
    n.div_ceil(8) + 4
}

/// Returns byte length of an interleaved bitmap for n values and k keys.
/// Byte `g * k + j` holds the 8-value group `g` of key `j`.
#[inline]
pub const fn interleaved_bitmap_size(n: usize, k: usize) -> usize {
    n.div_ceil(8) * k
}

/// Create a new match bitmap with all zeros.
#[inline]
pub fn new_bitmap(n: usize) -> Vec<u8> {
    vec![0u8; bitmap_size(n)]
}

/// Trait to extend u8 slice with bitmap functionalities.
/// To avoid naming conflicts, all methods are prefixed with "bitmap_".
pub trait Bitmap {
    /// Returns bool value at given bit.
    fn bitmap_get(&self, idx: usize) -> bool;

    /// Set bit to true at given position.
    fn bitmap_set(&mut self, idx: usize) -> bool;

    /// Unset given bit to be false.
    fn bitmap_unset(&mut self, idx: usize) -> bool;

    /// Returns number of true bits among the first len bits.
    fn bitmap_count(&self, len: usize) -> usize;

    /// Create index iterator with all true bits, stop at len.
    fn bitmap_true_index_iter(&self, len: usize) -> BitmapTrueIndexIter<'_>;
}

impl Bitmap for [u8] {
    #[inline]
    fn bitmap_get(&self, idx: usize) -> bool {
        self[idx / 8] & (1 << (idx % 8)) != 0
    }

    #[inline]
    fn bitmap_set(&mut self, idx: usize) -> bool {
        let unit_idx = idx / 8;
        let bit_idx = idx % 8;
        if self[unit_idx] & (1 << bit_idx) != 0 {
            return false;
        }
        self[unit_idx] |= 1 << bit_idx;
        true
    }

    #[inline]
    fn bitmap_unset(&mut self, idx: usize) -> bool {
        let unit_idx = idx / 8;
        let bit_idx = idx % 8;
        if self[unit_idx] & (1 << bit_idx) == 0 {
            return false;
        }
        self[unit_idx] &= !(1 << bit_idx);
        true
    }

    #[inline]
    fn bitmap_count(&self, len: usize) -> usize {
        debug_assert!(len <= self.len() * 8);
        let full = len / 8;
        let mut count: usize = self[..full].iter().map(|b| b.count_ones() as usize).sum();
        let rem = len % 8;
        if rem != 0 {
            count += (self[full] & ((1u8 << rem) - 1)).count_ones() as usize;
        }
        count
    }

    #[inline]
    fn bitmap_true_index_iter(&self, len: usize) -> BitmapTrueIndexIter<'_> {
        debug_assert!(len <= self.len() * 8);
        BitmapTrueIndexIter {
            units: self,
            len,
            unit_idx: 0,
            unit: self.first().copied().unwrap_or(0),
        }
    }
}

pub struct BitmapTrueIndexIter<'a> {
    units: &'a [u8],
    len: usize,
    unit_idx: usize,
    unit: u8, // remaining bits of current unit
}

impl Iterator for BitmapTrueIndexIter<'_> {
    type Item = usize;
    #[inline]
    fn next(&mut self) -> Option<usize> {
        loop {
            if self.unit != 0 {
                let idx = self.unit_idx * 8 + self.unit.trailing_zeros() as usize;
                if idx >= self.len {
                    return None;
                }
                // clear lowest set bit.
                self.unit &= self.unit - 1;
                return Some(idx);
            }
            self.unit_idx += 1;
            if self.unit_idx * 8 >= self.len {
                return None;
            }
            self.unit = self.units[self.unit_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_new() {
        let bm = new_bitmap(0);
        assert_eq!(bm.len(), 4);
        let bm = new_bitmap(9);
        assert_eq!(bm.len(), 6);
        assert!(bm.iter().all(|b| *b == 0));
        assert_eq!(interleaved_bitmap_size(9, 3), 6);
    }

    #[test]
    fn test_bitmap_get_set() {
        let mut bm = new_bitmap(64);
        assert!(!bm.bitmap_get(0));
        assert!(!bm.bitmap_get(63));

        assert!(bm.bitmap_set(0));
        assert!(bm.bitmap_set(9));
        assert!(bm.bitmap_set(63));
        assert!(!bm.bitmap_set(63));

        assert!(bm.bitmap_get(0));
        assert!(bm.bitmap_get(9));
        assert!(bm.bitmap_get(63));
        assert_eq!(bm[1], 0b10);

        assert!(bm.bitmap_unset(9));
        assert!(!bm.bitmap_unset(9));
        assert!(!bm.bitmap_get(9));
    }

    #[test]
    fn test_bitmap_count() {
        let mut bm = new_bitmap(20);
        for idx in [1, 7, 8, 15, 19] {
            bm.bitmap_set(idx);
        }
        // stray bit past len is ignored.
        bm[2] |= 0x80;
        assert_eq!(bm.bitmap_count(20), 5);
        assert_eq!(bm.bitmap_count(8), 2);
        assert_eq!(bm.bitmap_count(0), 0);
    }

    #[test]
    fn test_bitmap_true_index_iter() {
        let mut bm = new_bitmap(30);
        let expected = vec![0, 3, 8, 17, 29];
        for idx in &expected {
            bm.bitmap_set(*idx);
        }
        bm[3] |= 0x80; // bit 31, beyond len
        let res: Vec<_> = bm.bitmap_true_index_iter(30).collect();
        assert_eq!(res, expected);

        let empty: Vec<u8> = vec![];
        assert_eq!(empty.bitmap_true_index_iter(0).count(), 0);
    }
}
