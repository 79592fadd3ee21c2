//! Circular replay buffer for vectorized environments.
//!
//! [`VecReplayBuffer`] stores transitions in a ring of `capacity` time slots,
//! each holding one transition per environment. Storage is field-major: each
//! field of [`TransitionBatch`](crate::TransitionBatch) gets its own
//! contiguous `[capacity, n_envs, *feature_shape]` column, kept either in
//! memory or in a memory-mapped file (see [`StorageMode`]).
//!
//! # Examples
//!
//! ```no_run
//! use replay_core::{StorageMode, VecReplayBuffer, VecReplayBufferConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = VecReplayBufferConfig::per_rank(1_000_000, 4, 2)
//!     .storage(StorageMode::Memmap {
//!         dir: VecReplayBufferConfig::rank_dir("logs/run_0", 1),
//!     })
//!     .obs_keys(vec!["rgb".to_string(), "state".to_string()]);
//! let buffer = VecReplayBuffer::new(&config)?;
//! assert_eq!(buffer.capacity(), 125_000);
//! assert_eq!(buffer.n_envs(), 4);
//! # Ok(())
//! # }
//! ```
mod base;
mod config;
mod meta;
mod storage;
pub use base::VecReplayBuffer;
pub use config::{StorageMode, VecReplayBufferConfig};
