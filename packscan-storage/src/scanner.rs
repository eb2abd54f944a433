//! High level entry of decode and scan on packed columns.

use crate::bitmap::{new_bitmap, Bitmap, BitmapTrueIndexIter};
use crate::column::PackedColumn;
use crate::compression::bitpacking::decoded_len;
use crate::decode::DecodeStrategy;
use crate::error::Result;
use crate::scan::ScanStrategy;
use crate::shared::{BitmapLayout, SharedBitmaps, SharedScanStrategy};

/// Result of a single-key scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub count: usize,
    pub bitmap: Vec<u8>,
    len: usize,
}

impl ScanResult {
    #[inline]
    pub fn is_match(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        self.bitmap.bitmap_get(idx)
    }

    /// Iterate positions of matched values.
    #[inline]
    pub fn matches(&self) -> BitmapTrueIndexIter<'_> {
        self.bitmap.bitmap_true_index_iter(self.len)
    }
}

/// Result of a shared scan, one count per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedScanResult {
    pub counts: Vec<usize>,
    pub bitmaps: SharedBitmaps,
}

/// Runs decode and scans on packed columns with configured strategies.
///
/// Created by [`crate::config::ScanConfig::build`], which has checked
/// every strategy against current CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scanner {
    decode: DecodeStrategy,
    scan: ScanStrategy,
    shared: SharedScanStrategy,
    layout: BitmapLayout,
}

impl Scanner {
    #[inline]
    pub(crate) fn new(
        decode: DecodeStrategy,
        scan: ScanStrategy,
        shared: SharedScanStrategy,
        layout: BitmapLayout,
    ) -> Self {
        Scanner {
            decode,
            scan,
            shared,
            layout,
        }
    }

    #[inline]
    pub fn decode_strategy(&self) -> DecodeStrategy {
        self.decode
    }

    #[inline]
    pub fn scan_strategy(&self) -> ScanStrategy {
        self.scan
    }

    #[inline]
    pub fn shared_strategy(&self) -> SharedScanStrategy {
        self.shared
    }

    #[inline]
    pub fn layout(&self) -> BitmapLayout {
        self.layout
    }

    /// Decode all values of the column.
    #[inline]
    pub fn decode(&self, col: &PackedColumn) -> Result<Vec<u32>> {
        let mut res = vec![0u32; decoded_len(col.len())];
        self.decode.decode(col.buf(), col.width(), col.len(), &mut res)?;
        res.truncate(col.len());
        Ok(res)
    }

    /// Find all values equal to key.
    #[inline]
    pub fn scan(&self, col: &PackedColumn, key: u32) -> Result<ScanResult> {
        let mut bitmap = new_bitmap(col.len());
        let count = self
            .scan
            .scan(key, col.buf(), col.width(), col.len(), &mut bitmap)?;
        Ok(ScanResult {
            count,
            bitmap,
            len: col.len(),
        })
    }

    /// Find values equal to each of the keys.
    #[inline]
    pub fn shared_scan(&self, col: &PackedColumn, keys: &[u32]) -> Result<SharedScanResult> {
        let mut bitmaps = SharedBitmaps::new(self.layout, keys.len(), col.len());
        let counts = self
            .shared
            .scan(keys, col.buf(), col.width(), col.len(), &mut bitmaps)?;
        Ok(SharedScanResult { counts, bitmaps })
    }
}
