//! Configuration of [`VecReplayBuffer`](super::VecReplayBuffer).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Where the columns of the buffer live.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum StorageMode {
    /// Columns are allocated in memory.
    Memory,

    /// Each column is a memory-mapped file under `dir`.
    ///
    /// The file of field `key` is `<dir>/<key>.memmap`. The directory is
    /// created if it does not exist.
    Memmap {
        /// Directory holding the backing files.
        dir: PathBuf,
    },
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Memory
    }
}

/// Configuration of [`VecReplayBuffer`](super::VecReplayBuffer).
///
/// # Examples
///
/// ```rust
/// use replay_core::VecReplayBufferConfig;
///
/// let config = VecReplayBufferConfig::default()
///     .capacity(100_000)
///     .n_envs(4)
///     .seed(7)
///     .sample_next_obs(true);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct VecReplayBufferConfig {
    /// Number of time slots. Each slot holds one transition per environment.
    pub capacity: usize,

    /// Number of environments stepped in parallel.
    pub n_envs: usize,

    /// Random seed used for sampling.
    pub seed: u64,

    /// Backing storage of the columns.
    pub storage: StorageMode,

    /// Fields treated as observations. When next observations are sampled
    /// from the successor slot, `next_<key>` is built for each of them.
    pub obs_keys: Vec<String>,

    /// Value of `sample_next_obs` used by
    /// [`ReplayBufferBase::batch`](crate::ReplayBufferBase::batch).
    pub sample_next_obs: bool,
}

impl Default for VecReplayBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            n_envs: 1,
            seed: 42,
            storage: StorageMode::Memory,
            obs_keys: vec!["observations".to_string()],
            sample_next_obs: false,
        }
    }
}

impl VecReplayBufferConfig {
    /// Creates a configuration for one rank with `n_envs` environments in a
    /// job of `world_size` ranks that stores `total_size` transitions overall.
    ///
    /// The capacity is `total_size / (n_envs * world_size)` time slots; the
    /// other fields take default values.
    pub fn per_rank(total_size: usize, n_envs: usize, world_size: usize) -> Self {
        let denom = n_envs.saturating_mul(world_size).max(1);
        Self::default()
            .capacity(total_size / denom)
            .n_envs(n_envs)
    }

    /// Returns the conventional memmap directory of a rank,
    /// `<root>/memmap_buffer/rank_<rank>`.
    pub fn rank_dir(root: impl AsRef<Path>, rank: usize) -> PathBuf {
        root.as_ref()
            .join("memmap_buffer")
            .join(format!("rank_{}", rank))
    }

    /// Sets the capacity of the replay buffer.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the number of environments.
    pub fn n_envs(mut self, n_envs: usize) -> Self {
        self.n_envs = n_envs;
        self
    }

    /// Sets the random seed for sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the backing storage.
    pub fn storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the observation keys.
    pub fn obs_keys(mut self, obs_keys: Vec<String>) -> Self {
        self.obs_keys = obs_keys;
        self
    }

    /// Sets `sample_next_obs` used by
    /// [`ReplayBufferBase::batch`](crate::ReplayBufferBase::batch).
    pub fn sample_next_obs(mut self, sample_next_obs: bool) -> Self {
        self.sample_next_obs = sample_next_obs;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_config() -> Result<()> {
        let config = VecReplayBufferConfig::default()
            .capacity(500)
            .n_envs(3)
            .seed(1)
            .storage(StorageMode::Memmap {
                dir: PathBuf::from("some/directory"),
            })
            .obs_keys(vec!["rgb".to_string()])
            .sample_next_obs(true);

        let dir = TempDir::new("vec_replay_buffer_config")?;
        let path = dir.path().join("config.yaml");
        config.save(&path)?;
        let config_ = VecReplayBufferConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_per_rank() {
        let config = VecReplayBufferConfig::per_rank(1_000_000, 4, 2);
        assert_eq!(config.capacity, 125_000);
        assert_eq!(config.n_envs, 4);

        let config = VecReplayBufferConfig::per_rank(1000, usize::MAX, 2);
        assert_eq!(config.capacity, 0);

        let dir = VecReplayBufferConfig::rank_dir("logs", 3);
        assert_eq!(dir, Path::new("logs").join("memmap_buffer").join("rank_3"));
    }
}
