//! Flat binary matrix store read through a memory map.
//!
//! Layout: a 24-byte header (`magic`, `rows`, `cols`) followed by the matrix
//! in row-major order as native-endian `f64`. Rows are voxels for functional
//! data and candidates for model banks, so a contiguous row range is a
//! contiguous byte range.
//!
//! [`MatrixStoreWriter`] fills a store in column blocks through a writable
//! map, so functional runs can be stored one at a time.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use memmap2::{Mmap, MmapMut};
use nalgebra::DMatrix;

use crate::error::PrfError;

const MAGIC: [u8; 8] = *b"PRFMAT01";

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct StoreHeader {
    magic: [u8; 8],
    rows: u64,
    cols: u64,
}

const HEADER_BYTES: usize = size_of::<StoreHeader>();

/// Total file size for a `rows × cols` store, `None` on overflow.
fn store_bytes(rows: usize, cols: usize) -> Option<usize> {
    rows.checked_mul(cols)?.checked_mul(size_of::<f64>())?.checked_add(HEADER_BYTES)
}

/// Write `matrix` to `path`, replacing any existing file.
pub fn write_matrix_store(path: &Path, matrix: &DMatrix<f64>) -> Result<(), PrfError> {
    let file = File::create(path).map_err(|e| PrfError::io("create store", path, e))?;
    let mut writer = BufWriter::new(file);
    let header = StoreHeader {
        magic: MAGIC,
        rows: matrix.nrows() as u64,
        cols: matrix.ncols() as u64,
    };
    writer
        .write_all(bytemuck::bytes_of(&header))
        .map_err(|e| PrfError::io("write store", path, e))?;

    let mut row_buf = vec![0.0f64; matrix.ncols()];
    for row in matrix.row_iter() {
        for (dst, src) in row_buf.iter_mut().zip(row.iter()) {
            *dst = *src;
        }
        writer
            .write_all(bytemuck::cast_slice(&row_buf))
            .map_err(|e| PrfError::io("write store", path, e))?;
    }
    writer.flush().map_err(|e| PrfError::io("write store", path, e))
}

/// Read-only view of a matrix store.
#[derive(Debug)]
pub struct MatrixStore {
    path: PathBuf,
    mmap: Mmap,
    rows: usize,
    cols: usize,
}

impl MatrixStore {
    pub fn open(path: &Path) -> Result<Self, PrfError> {
        let file = File::open(path).map_err(|e| PrfError::io("open store", path, e))?;
        // SAFETY: the store is written once and treated as immutable afterwards.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| PrfError::io("map store", path, e))?;

        if mmap.len() < HEADER_BYTES {
            return Err(PrfError::format(format!("Store '{}' is truncated.", path.display())));
        }
        let header: StoreHeader = bytemuck::pod_read_unaligned(&mmap[..HEADER_BYTES]);
        if header.magic != MAGIC {
            return Err(PrfError::format(format!("'{}' is not a matrix store.", path.display())));
        }
        let (rows, cols) = (header.rows as usize, header.cols as usize);
        let expected = store_bytes(rows, cols).ok_or_else(|| {
            PrfError::format(format!("Store '{}' declares an impossible size {rows}x{cols}.", path.display()))
        })?;
        if mmap.len() != expected {
            return Err(PrfError::format(format!(
                "Store '{}' has {} bytes, expected {expected} for {rows}x{cols}.",
                path.display(),
                mmap.len()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            rows,
            cols,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn body(&self) -> Result<&[f64], PrfError> {
        bytemuck::try_cast_slice(&self.mmap[HEADER_BYTES..])
            .map_err(|e| PrfError::format(format!("Store '{}' is misaligned: {e}", self.path.display())))
    }

    /// Copy a contiguous range of rows into a matrix.
    pub fn read_rows(&self, rows: Range<usize>) -> Result<DMatrix<f64>, PrfError> {
        if rows.start > rows.end || rows.end > self.rows {
            return Err(PrfError::shape(format!(
                "Rows {rows:?} out of range for store with {} rows.",
                self.rows
            )));
        }
        let body = self.body()?;
        let slice = &body[rows.start * self.cols..rows.end * self.cols];
        Ok(DMatrix::from_row_slice(rows.len(), self.cols, slice))
    }

    pub fn to_matrix(&self) -> Result<DMatrix<f64>, PrfError> {
        self.read_rows(0..self.rows)
    }
}

/// A store of known shape filled in column blocks.
#[derive(Debug)]
pub struct MatrixStoreWriter {
    path: PathBuf,
    mmap: MmapMut,
    rows: usize,
    cols: usize,
}

impl MatrixStoreWriter {
    /// Create a zero-filled `rows × cols` store at `path`, replacing any existing file.
    pub fn create(path: &Path, rows: usize, cols: usize) -> Result<Self, PrfError> {
        let len = store_bytes(rows, cols)
            .ok_or_else(|| PrfError::shape(format!("A {rows}x{cols} store does not fit in memory.")))?;
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PrfError::io("create store", path, e))?;
        file.set_len(len as u64).map_err(|e| PrfError::io("size store", path, e))?;
        // SAFETY: the file was just created by us and is not shared until `finish`.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| PrfError::io("map store", path, e))?;
        let header = StoreHeader {
            magic: MAGIC,
            rows: rows as u64,
            cols: cols as u64,
        };
        mmap[..HEADER_BYTES].copy_from_slice(bytemuck::bytes_of(&header));
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            rows,
            cols,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Copy `block` into columns `col_start..col_start + block.ncols()` of every row.
    pub fn write_columns(&mut self, col_start: usize, block: &DMatrix<f64>) -> Result<(), PrfError> {
        let width = block.ncols();
        if block.nrows() != self.rows || col_start.checked_add(width).is_none_or(|end| end > self.cols) {
            return Err(PrfError::shape(format!(
                "Block {}x{width} at column {col_start} does not fit a {}x{} store.",
                block.nrows(),
                self.rows,
                self.cols
            )));
        }
        let cols = self.cols;
        let body: &mut [f64] = bytemuck::try_cast_slice_mut(&mut self.mmap[HEADER_BYTES..])
            .map_err(|e| PrfError::format(format!("Store '{}' is misaligned: {e}", self.path.display())))?;
        for (r, row) in block.row_iter().enumerate() {
            let dst = &mut body[r * cols + col_start..r * cols + col_start + width];
            for (d, v) in dst.iter_mut().zip(row.iter()) {
                *d = *v;
            }
        }
        Ok(())
    }

    /// Flush to disk and close the writable map.
    pub fn finish(self) -> Result<PathBuf, PrfError> {
        self.mmap.flush().map_err(|e| PrfError::io("flush store", &self.path, e))?;
        Ok(self.path)
    }
}
