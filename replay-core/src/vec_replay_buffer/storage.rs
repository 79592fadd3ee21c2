//! Columns backing the fields of the buffer.
use crate::error::ReplayBufferError;
use anyhow::{Context, Result};
use memmap2::MmapMut;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn, Slice};
use std::{
    fs::OpenOptions,
    mem::size_of,
    path::{Path, PathBuf},
};

const ELEM_SIZE: usize = size_of::<f32>();

enum Storage {
    Memory(Vec<f32>),
    Mapped { mmap: MmapMut, path: PathBuf },
}

/// A contiguous row-major `f32` array of shape `[capacity, n_envs, *feature_shape]`.
pub(super) struct Column {
    shape: Vec<usize>,
    row_len: usize,
    storage: Storage,
}

impl Column {
    fn n_elems(shape: &[usize]) -> usize {
        shape.iter().product()
    }

    /// Allocates a zero-filled column in memory.
    pub fn in_memory(shape: Vec<usize>) -> Self {
        let n = Self::n_elems(&shape);
        Self {
            row_len: Self::n_elems(&shape[2..]),
            storage: Storage::Memory(vec![0.0; n]),
            shape,
        }
    }

    /// Creates (or truncates) the file at `path` and maps it as a zero-filled column.
    pub fn create_mapped(path: &Path, shape: Vec<usize>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        file.set_len((Self::n_elems(&shape) * ELEM_SIZE) as u64)
            .with_context(|| format!("Failed to allocate {:?}", path))?;
        Self::map(file, path, shape)
    }

    /// Maps an existing file written by a previous buffer with the same shape.
    pub fn open_mapped(path: &Path, shape: Vec<usize>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        let expected = (Self::n_elems(&shape) * ELEM_SIZE) as u64;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(ReplayBufferError::InvalidArgument(format!(
                "{:?} has {} bytes, expected {} for shape {:?}",
                path, actual, expected, shape
            ))
            .into());
        }
        Self::map(file, path, shape)
    }

    fn map(file: std::fs::File, path: &Path, shape: Vec<usize>) -> Result<Self> {
        // Safety: the file is owned by this buffer's directory; no other mapping
        // of it is created by this process.
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("Failed to map {:?}", path))?;
        Ok(Self {
            row_len: Self::n_elems(&shape[2..]),
            storage: Storage::Mapped {
                mmap,
                path: path.to_path_buf(),
            },
            shape,
        })
    }

    fn as_slice(&self) -> &[f32] {
        match &self.storage {
            Storage::Memory(v) => v.as_slice(),
            Storage::Mapped { mmap, .. } => {
                let len = mmap.len() / ELEM_SIZE;
                if len == 0 {
                    return &[];
                }
                // Safety: mappings are page aligned and hold exactly `len` f32 values.
                unsafe { std::slice::from_raw_parts(mmap.as_ptr() as *const f32, len) }
            }
        }
    }

    fn as_slice_mut(&mut self) -> &mut [f32] {
        match &mut self.storage {
            Storage::Memory(v) => v.as_mut_slice(),
            Storage::Mapped { mmap, .. } => {
                let len = mmap.len() / ELEM_SIZE;
                if len == 0 {
                    return &mut [];
                }
                // Safety: see `as_slice`.
                unsafe { std::slice::from_raw_parts_mut(mmap.as_mut_ptr() as *mut f32, len) }
            }
        }
    }

    /// Shape of the whole column.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Shape of a single transition of one environment.
    pub fn feature_shape(&self) -> &[usize] {
        &self.shape[2..]
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped { .. })
    }

    /// Read-only view of the whole column.
    pub fn view(&self) -> Result<ArrayViewD<'_, f32>> {
        Ok(ArrayViewD::from_shape(IxDyn(&self.shape), self.as_slice())?)
    }

    fn view_mut(&mut self) -> Result<ArrayViewMutD<'_, f32>> {
        let shape = IxDyn(&self.shape);
        Ok(ArrayViewMutD::from_shape(shape, self.as_slice_mut())?)
    }

    /// Writes `data` of shape `[k, n_envs, *feature_shape]` into slots `slot..slot + k`.
    ///
    /// The caller guarantees `slot + k <= capacity` and consistent shapes.
    pub fn write(&mut self, slot: usize, data: ArrayViewD<'_, f32>) -> Result<()> {
        let k = data.shape()[0];
        let mut dst = self.view_mut()?;
        dst.slice_axis_mut(Axis(0), Slice::from(slot..slot + k))
            .assign(&data);
        Ok(())
    }

    /// Gathers the transitions at `(time_slot, env_slot)` pairs into an array
    /// of shape `[ixs.len(), 1, *feature_shape]`.
    pub fn gather(&self, ixs: &[(usize, usize)]) -> Result<ArrayD<f32>> {
        let data = self.as_slice();
        let n_envs = self.shape[1];
        let mut out = Vec::with_capacity(ixs.len() * self.row_len);
        for &(t, e) in ixs.iter() {
            let start = (t * n_envs + e) * self.row_len;
            out.extend_from_slice(&data[start..start + self.row_len]);
        }

        let mut shape = vec![ixs.len(), 1];
        shape.extend_from_slice(self.feature_shape());
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), out)?)
    }

    /// Flushes outstanding writes of a mapped column to its file.
    pub fn flush(&self) -> Result<()> {
        if let Storage::Mapped { mmap, path } = &self.storage {
            mmap.flush()
                .with_context(|| format!("Failed to flush {:?}", path))?;
        }
        Ok(())
    }
}
