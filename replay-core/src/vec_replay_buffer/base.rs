//! Ring buffer of transitions from vectorized environments.
use super::{config::StorageMode, meta::BufferMeta, storage::Column, VecReplayBufferConfig};
use crate::{
    error::ReplayBufferError, ExperienceBufferBase, ReplayBufferBase, TransitionBatch,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use ndarray::{ArrayViewD, Axis, Slice};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// A fixed-capacity circular buffer of transitions from vectorized environments.
///
/// The buffer has the logical shape `[capacity, n_envs]`: a time slot holds one
/// transition for every environment. Batches pushed with
/// [`add`](VecReplayBuffer::add) are written at the write cursor
/// [`pos`](VecReplayBuffer::pos), wrapping around at `capacity` and
/// overwriting the oldest transitions.
///
/// Columns are allocated on the first `add`, taking the field names and
/// feature shapes of that batch. Later batches must have the same fields
/// with the same shapes.
///
/// [`sample`](VecReplayBuffer::sample) draws `(time_slot, env_slot)` pairs
/// independently and uniformly, so sampled batches have the shape
/// `[batch_size, 1, ...]`.
///
/// The buffer performs no internal locking: `add` takes `&mut self`.
pub struct VecReplayBuffer {
    capacity: usize,
    n_envs: usize,

    /// Next time slot to be written.
    pos: usize,

    /// `true` once every slot has been written.
    full: bool,

    storage: StorageMode,
    obs_keys: Vec<String>,
    sample_next_obs: bool,
    columns: BTreeMap<String, Column>,
    rng: StdRng,
}

fn check_config(config: &VecReplayBufferConfig) -> Result<()> {
    if config.capacity == 0 {
        return Err(ReplayBufferError::InvalidArgument(
            "capacity must be greater than zero".to_string(),
        )
        .into());
    }
    if config.n_envs == 0 {
        return Err(ReplayBufferError::InvalidArgument(
            "n_envs must be greater than zero".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Path of the file backing field `key`.
fn memmap_path(dir: &Path, key: &str) -> Result<PathBuf> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(|c| c == '/' || c == '\\' || c == '\0');
    if !valid {
        return Err(ReplayBufferError::InvalidArgument(format!(
            "`{}` cannot be used as a field name of a memory-mapped buffer",
            key
        ))
        .into());
    }
    Ok(dir.join(format!("{}.memmap", key)))
}

impl VecReplayBuffer {
    /// Creates an empty buffer.
    ///
    /// Fails with [`ReplayBufferError::InvalidArgument`] if `capacity` or
    /// `n_envs` is zero. With [`StorageMode::Memmap`], the directory is
    /// created and metadata left by a previous buffer is removed; use
    /// [`VecReplayBuffer::open`] to resume from it instead.
    pub fn new(config: &VecReplayBufferConfig) -> Result<Self> {
        check_config(config)?;

        if let StorageMode::Memmap { dir } = &config.storage {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
            if BufferMeta::remove(dir)? {
                info!("Discarded the replay buffer previously stored in {:?}", dir);
            }
        }

        Ok(Self::from_parts(config, BTreeMap::new()))
    }

    /// Reopens a memory-mapped buffer flushed with [`VecReplayBuffer::flush`].
    ///
    /// `capacity` and `n_envs` of `config` must agree with the stored buffer;
    /// the write cursor, the full flag and the contents are restored.
    pub fn open(config: &VecReplayBufferConfig) -> Result<Self> {
        check_config(config)?;

        let dir = match &config.storage {
            StorageMode::Memmap { dir } => dir,
            StorageMode::Memory => {
                return Err(ReplayBufferError::InvalidArgument(
                    "only memory-mapped buffers can be reopened".to_string(),
                )
                .into())
            }
        };

        let meta = BufferMeta::load(dir)?;
        if meta.capacity != config.capacity || meta.n_envs != config.n_envs {
            return Err(ReplayBufferError::InvalidArgument(format!(
                "buffer in {:?} has capacity {} and n_envs {}, but the config has {} and {}",
                dir, meta.capacity, meta.n_envs, config.capacity, config.n_envs
            ))
            .into());
        }
        if meta.pos >= meta.capacity {
            return Err(ReplayBufferError::InvalidArgument(format!(
                "write position {} of the buffer in {:?} exceeds its capacity",
                meta.pos, dir
            ))
            .into());
        }

        let mut columns = BTreeMap::new();
        for (key, feature_shape) in meta.fields.iter() {
            let path = memmap_path(dir, key)?;
            let shape = column_shape(config.capacity, config.n_envs, feature_shape);
            columns.insert(key.clone(), Column::open_mapped(&path, shape)?);
        }

        let mut buffer = Self::from_parts(config, columns);
        buffer.pos = meta.pos;
        buffer.full = meta.full;
        info!(
            "Reopened replay buffer in {:?}: {} fields, pos = {}, full = {}",
            dir,
            buffer.columns.len(),
            buffer.pos,
            buffer.full
        );
        Ok(buffer)
    }

    fn from_parts(config: &VecReplayBufferConfig, columns: BTreeMap<String, Column>) -> Self {
        Self {
            capacity: config.capacity,
            n_envs: config.n_envs,
            pos: 0,
            full: false,
            storage: config.storage.clone(),
            obs_keys: config.obs_keys.clone(),
            sample_next_obs: config.sample_next_obs,
            columns,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Checks `batch` against the established columns without touching them.
    fn validate(&self, batch: &TransitionBatch, t: usize, n_envs: usize) -> Result<()> {
        if n_envs != self.n_envs {
            let field = batch.keys().next().unwrap_or_default().to_string();
            return Err(ReplayBufferError::ShapeMismatch {
                field,
                expected: vec![t, self.n_envs],
                actual: vec![t, n_envs],
            }
            .into());
        }

        if self.columns.is_empty() {
            if let StorageMode::Memmap { dir } = &self.storage {
                for key in batch.keys() {
                    memmap_path(dir, key)?;
                }
            }
            return Ok(());
        }

        for (key, value) in batch.iter() {
            match self.columns.get(key) {
                Some(column) if column.feature_shape() == &value.shape()[2..] => {}
                Some(column) => {
                    return Err(ReplayBufferError::ShapeMismatch {
                        field: key.to_string(),
                        expected: column.feature_shape().to_vec(),
                        actual: value.shape()[2..].to_vec(),
                    }
                    .into())
                }
                None => {
                    // No shape has been established for this field.
                    return Err(ReplayBufferError::ShapeMismatch {
                        field: key.to_string(),
                        expected: vec![],
                        actual: value.shape()[2..].to_vec(),
                    }
                    .into());
                }
            }
        }

        // Every established field must be written.
        if let Some((key, column)) = self.columns.iter().find(|(k, _)| !batch.contains_key(k)) {
            return Err(ReplayBufferError::ShapeMismatch {
                field: key.clone(),
                expected: column.feature_shape().to_vec(),
                actual: vec![],
            }
            .into());
        }

        Ok(())
    }

    /// Allocates one column per field of `batch`.
    fn allocate(&mut self, batch: &TransitionBatch) -> Result<()> {
        let mut columns = BTreeMap::new();
        for (key, value) in batch.iter() {
            let shape = column_shape(self.capacity, self.n_envs, &value.shape()[2..]);
            let column = match &self.storage {
                StorageMode::Memory => Column::in_memory(shape),
                StorageMode::Memmap { dir } => {
                    Column::create_mapped(&memmap_path(dir, key)?, shape)?
                }
            };
            info!("Allocated field `{}` with shape {:?}", key, column.shape());
            columns.insert(key.to_string(), column);
        }
        self.columns = columns;
        Ok(())
    }

    /// Adds transitions of shape `[T, n_envs, ...]` to the buffer.
    ///
    /// Transitions are written starting at [`pos`](Self::pos), wrapping around
    /// at `capacity`. If `T > capacity`, only the last `capacity` steps are
    /// kept; they land in the slots they would occupy had all `T` steps been
    /// written one after another. `pos` advances by `T` modulo `capacity`, and
    /// the buffer becomes full once the cursor reaches the end of the ring.
    ///
    /// Fails with [`ReplayBufferError::ShapeMismatch`] if the number of
    /// environments, the set of fields or a feature shape disagrees with the
    /// buffer. Nothing is written in that case.
    pub fn add(&mut self, batch: TransitionBatch) -> Result<()> {
        let (t, n_envs) = match batch.batch_shape() {
            Some(shape) => shape,
            None => return Ok(()),
        };

        self.validate(&batch, t, n_envs)?;
        if t == 0 {
            return Ok(());
        }
        if self.columns.is_empty() {
            self.allocate(&batch)?;
        }

        let capacity = self.capacity;
        let skip = if t > capacity {
            warn!(
                "Batch of {} steps exceeds the capacity {}; the oldest {} steps are dropped",
                t,
                capacity,
                t - capacity
            );
            t - capacity
        } else {
            0
        };
        let n = t - skip;
        let start = (self.pos + skip) % capacity;
        let first = n.min(capacity - start);

        for (key, value) in batch.iter() {
            let column = match self.columns.get_mut(key) {
                Some(column) => column,
                None => unreachable!("field `{}` was validated", key),
            };
            let data = value.slice_axis(Axis(0), Slice::from(skip..t));
            column.write(start, data.slice_axis(Axis(0), Slice::from(0..first)))?;
            if first < n {
                column.write(0, data.slice_axis(Axis(0), Slice::from(first..n)))?;
            }
        }

        if self.pos + t >= capacity {
            self.full = true;
        }
        self.pos = (self.pos + t) % capacity;
        debug!("Added {} steps, pos = {}, full = {}", t, self.pos, self.full);

        Ok(())
    }

    /// Returns `(first slot, number of slots)` of the time slots that can be sampled.
    ///
    /// With `sample_next_obs`, a slot is eligible only if its successor holds
    /// the step that followed it. That excludes the most recently written slot:
    /// its successor is either unwritten or holds the oldest data.
    fn valid_slots(&self, sample_next_obs: bool) -> (usize, usize) {
        match (self.full, sample_next_obs) {
            (false, false) => (0, self.pos),
            (false, true) => (0, self.pos.saturating_sub(1)),
            (true, false) => (0, self.capacity),
            (true, true) => (self.pos, self.capacity - 1),
        }
    }

    /// Samples `batch_size` transitions uniformly at random.
    ///
    /// Time slots and environment slots are drawn independently for each
    /// sample, with replacement. The returned batch has the shape
    /// `[batch_size, 1, ...]` and the fields of the buffer.
    ///
    /// If `sample_next_obs` is `true`, `next_<key>` is built for every
    /// observation key from the slot following the sampled one, in the same
    /// environment, replacing a stored `next_<key>` field if any.
    ///
    /// Fails with [`ReplayBufferError::InsufficientData`] if no slot can be
    /// sampled, e.g. the buffer is empty or `sample_next_obs` is requested
    /// while a single slot has been written. This error is recoverable.
    pub fn sample(&mut self, batch_size: usize, sample_next_obs: bool) -> Result<TransitionBatch> {
        let (start, n_valid) = self.valid_slots(sample_next_obs);
        if n_valid == 0 || self.columns.is_empty() {
            let msg = if sample_next_obs && (self.full || self.pos > 0) {
                "next observations requested, but no slot has a successor yet; add at least two steps"
            } else {
                "the buffer is empty"
            };
            return Err(ReplayBufferError::InsufficientData(msg.to_string()).into());
        }

        if sample_next_obs {
            if let Some(key) = self.obs_keys.iter().find(|k| !self.columns.contains_key(*k)) {
                return Err(ReplayBufferError::InvalidArgument(format!(
                    "observation key `{}` is not stored in the buffer",
                    key
                ))
                .into());
            }
        }

        let capacity = self.capacity;
        let n_envs = self.n_envs;
        let rng = &mut self.rng;
        let ixs = (0..batch_size)
            .map(|_| {
                let t = (start + rng.gen_range(0..n_valid)) % capacity;
                let e = rng.gen_range(0..n_envs);
                (t, e)
            })
            .collect::<Vec<_>>();

        let mut batch = TransitionBatch::new();
        for (key, column) in self.columns.iter() {
            batch.insert_unchecked(key.clone(), column.gather(&ixs)?);
        }

        if sample_next_obs {
            let next_ixs = ixs
                .iter()
                .map(|&(t, e)| ((t + 1) % capacity, e))
                .collect::<Vec<_>>();
            for key in self.obs_keys.iter() {
                let column = &self.columns[key];
                batch.insert_unchecked(format!("next_{}", key), column.gather(&next_ixs)?);
            }
        }

        Ok(batch)
    }

    /// Read-only view of field `key`, shape `[capacity, n_envs, *feature_shape]`.
    ///
    /// Slots that have not been written hold zeros. Fails with
    /// [`ReplayBufferError::InvalidArgument`] if the field is not stored.
    pub fn field(&self, key: &str) -> Result<ArrayViewD<'_, f32>> {
        match self.columns.get(key) {
            Some(column) => column.view(),
            None => Err(ReplayBufferError::InvalidArgument(format!(
                "no field `{}` in the buffer",
                key
            ))
            .into()),
        }
    }

    /// Read-only view of field `key` at time slot `t`, shape `[n_envs, *feature_shape]`.
    ///
    /// Fails with [`ReplayBufferError::InvalidArgument`] if the field is not
    /// stored or `t >= capacity`.
    pub fn slot(&self, key: &str, t: usize) -> Result<ArrayViewD<'_, f32>> {
        if t >= self.capacity {
            return Err(ReplayBufferError::InvalidArgument(format!(
                "time slot {} is out of the capacity {}",
                t, self.capacity
            ))
            .into());
        }
        Ok(self.field(key)?.index_axis_move(Axis(0), t))
    }

    /// Iterates over field names in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    /// Flushes memory-mapped columns and writes the metadata needed by
    /// [`VecReplayBuffer::open`]. Does nothing for in-memory buffers.
    pub fn flush(&self) -> Result<()> {
        let dir = match &self.storage {
            StorageMode::Memmap { dir } => dir,
            StorageMode::Memory => return Ok(()),
        };

        for column in self.columns.values().filter(|c| c.is_mapped()) {
            column.flush()?;
        }

        let meta = BufferMeta {
            capacity: self.capacity,
            n_envs: self.n_envs,
            pos: self.pos,
            full: self.full,
            fields: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.feature_shape().to_vec()))
                .collect(),
        };
        meta.save(dir)?;
        debug!("Flushed replay buffer to {:?}", dir);

        Ok(())
    }

    /// Number of time slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of environments.
    pub fn n_envs(&self) -> usize {
        self.n_envs
    }

    /// Time slot written by the next [`add`](Self::add).
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// `true` once every slot has been written at least once.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Number of time slots holding transitions.
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity
        } else {
            self.pos
        }
    }

    /// `true` if nothing has been added yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if the columns are memory-mapped files.
    pub fn is_memmap(&self) -> bool {
        matches!(self.storage, StorageMode::Memmap { .. })
    }

    /// Fields treated as observations by [`sample`](Self::sample).
    pub fn obs_keys(&self) -> &[String] {
        &self.obs_keys
    }
}

fn column_shape(capacity: usize, n_envs: usize, feature_shape: &[usize]) -> Vec<usize> {
    let mut shape = vec![capacity, n_envs];
    shape.extend_from_slice(feature_shape);
    shape
}

impl Drop for VecReplayBuffer {
    fn drop(&mut self) {
        if self.is_memmap() {
            if let Err(e) = self.flush() {
                warn!("Failed to flush the replay buffer: {:?}", e);
            }
        }
    }
}

impl ExperienceBufferBase for VecReplayBuffer {
    type Item = TransitionBatch;

    fn push(&mut self, tr: Self::Item) -> Result<()> {
        self.add(tr)
    }

    fn len(&self) -> usize {
        VecReplayBuffer::len(self)
    }
}

impl ReplayBufferBase for VecReplayBuffer {
    type Config = VecReplayBufferConfig;
    type Batch = TransitionBatch;

    fn build(config: &Self::Config) -> Result<Self> {
        Self::new(config)
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        self.sample(size, self.sample_next_obs)
    }
}
