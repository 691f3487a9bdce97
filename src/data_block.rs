//! Rectangular sample buffers.
//!
//! A `DataBlock` places a `w x h` rectangle at `(ulx, uly)` and stores its samples
//! in a linear buffer addressed as `data[offset + y * scanw + x]`. The `offset` and
//! `scanw` pair lets a block describe a window into a larger buffer, so code-blocks
//! and subbands can be read out of a tile-component buffer without copying.

use crate::error::{J2kError, Result};

/// 2-D buffer with an explicit offset and scan width.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock<T> {
    /// Horizontal coordinate of the upper-left sample.
    pub ulx: u32,
    /// Vertical coordinate of the upper-left sample.
    pub uly: u32,
    /// Width in samples.
    pub w: u32,
    /// Height in samples.
    pub h: u32,
    /// Index of the upper-left sample in `data`.
    pub offset: usize,
    /// Distance between vertically adjacent samples in `data`.
    pub scanw: usize,
    pub data: Vec<T>,
}

impl<T: Copy + Default> DataBlock<T> {
    /// Creates a zero-filled block with a tight layout (`offset = 0`, `scanw = w`).
    pub fn new(ulx: u32, uly: u32, w: u32, h: u32) -> Self {
        Self {
            ulx,
            uly,
            w,
            h,
            offset: 0,
            scanw: w as usize,
            data: vec![T::default(); w as usize * h as usize],
        }
    }

    /// Wraps existing row-major samples.
    pub fn from_vec(ulx: u32, uly: u32, w: u32, h: u32, data: Vec<T>) -> Result<Self> {
        Self::with_layout(ulx, uly, w, h, 0, w as usize, data)
    }

    /// Wraps a buffer whose rows are `scanw` apart, starting at `offset`.
    pub fn with_layout(
        ulx: u32,
        uly: u32,
        w: u32,
        h: u32,
        offset: usize,
        scanw: usize,
        data: Vec<T>,
    ) -> Result<Self> {
        if scanw < w as usize {
            return Err(J2kError::InconsistentGeometry(format!(
                "scan width {} smaller than block width {}",
                scanw, w
            )));
        }
        if h > 0 && w > 0 && offset + (h as usize - 1) * scanw + w as usize > data.len() {
            return Err(J2kError::InconsistentGeometry(format!(
                "{}x{} block at offset {} does not fit a buffer of {} samples",
                w,
                h,
                offset,
                data.len()
            )));
        }
        Ok(Self {
            ulx,
            uly,
            w,
            h,
            offset,
            scanw,
            data,
        })
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        self.offset + y as usize * self.scanw + x as usize
    }

    /// Sample at block-relative coordinates.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    pub fn row(&self, y: u32) -> &[T] {
        let start = self.index(0, y);
        &self.data[start..start + self.w as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [T] {
        let start = self.index(0, y);
        let w = self.w as usize;
        &mut self.data[start..start + w]
    }

    /// Borrowed window of `w x h` samples starting at block-relative `(x, y)`.
    pub fn view(&self, x: u32, y: u32, w: u32, h: u32) -> BlockView<'_, T> {
        debug_assert!(x + w <= self.w && y + h <= self.h);
        BlockView {
            data: &self.data,
            offset: self.index(x, y),
            scanw: self.scanw,
            w,
            h,
        }
    }

    /// Copies the samples into a new tightly packed block.
    pub fn to_packed(&self) -> Self {
        let mut data = Vec::with_capacity(self.w as usize * self.h as usize);
        for y in 0..self.h {
            data.extend_from_slice(self.row(y));
        }
        Self {
            ulx: self.ulx,
            uly: self.uly,
            w: self.w,
            h: self.h,
            offset: 0,
            scanw: self.w as usize,
            data,
        }
    }

    /// Converts every sample with `f`, keeping the geometry.
    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> DataBlock<U> {
        let packed = self.to_packed();
        DataBlock {
            ulx: packed.ulx,
            uly: packed.uly,
            w: packed.w,
            h: packed.h,
            offset: 0,
            scanw: packed.scanw,
            data: packed.data.into_iter().map(f).collect(),
        }
    }
}

/// Read-only window into a `DataBlock`'s storage.
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a, T> {
    data: &'a [T],
    pub offset: usize,
    pub scanw: usize,
    pub w: u32,
    pub h: u32,
}

impl<T: Copy> BlockView<'_, T> {
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[self.offset + y as usize * self.scanw + x as usize]
    }

    pub fn row(&self, y: u32) -> &[T] {
        let start = self.offset + y as usize * self.scanw;
        &self.data[start..start + self.w as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_scan_width() {
        let data: Vec<i32> = (0..20).collect();
        let block = DataBlock::with_layout(0, 0, 3, 2, 6, 5, data).unwrap();
        assert_eq!(block.get(0, 0), 6);
        assert_eq!(block.get(2, 1), 13);
        assert_eq!(block.row(1), &[11, 12, 13]);
    }

    #[test]
    fn test_scan_width_must_cover_width() {
        let err = DataBlock::with_layout(0, 0, 4, 2, 0, 3, vec![0i32; 16]);
        assert!(matches!(err, Err(J2kError::InconsistentGeometry(_))));
    }

    #[test]
    fn test_view_shares_storage() {
        let mut block = DataBlock::<i32>::new(0, 0, 8, 8);
        block.set(5, 6, 42);
        let view = block.view(4, 4, 4, 4);
        assert_eq!(view.get(1, 2), 42);
        assert_eq!(view.row(2)[1], 42);
    }

    #[test]
    fn test_to_packed() {
        let data: Vec<i32> = (0..20).collect();
        let block = DataBlock::with_layout(1, 2, 2, 2, 1, 5, data).unwrap();
        let packed = block.to_packed();
        assert_eq!(packed.data, vec![1, 2, 6, 7]);
        assert_eq!((packed.ulx, packed.uly, packed.scanw), (1, 2, 2));
    }
}
