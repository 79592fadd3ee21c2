#![warn(missing_docs)]
//! Replay buffers for off-policy reinforcement learning.
//!
//! The central type is [`VecReplayBuffer`], a fixed-capacity circular store
//! of transitions produced by vectorized environments. Transitions are pushed
//! as [`TransitionBatch`]es shaped `[T, n_envs, ...]` and sampled back as
//! batches shaped `[batch_size, 1, ...]`.
//!
//! ```no_run
//! use ndarray::ArrayD;
//! use replay_core::{TransitionBatch, VecReplayBuffer, VecReplayBufferConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = VecReplayBufferConfig::default().capacity(1000).n_envs(4);
//! let mut buffer = VecReplayBuffer::new(&config)?;
//!
//! let mut step = TransitionBatch::new();
//! step.insert("observations", ArrayD::zeros(vec![1, 4, 3]))?;
//! step.insert("actions", ArrayD::zeros(vec![1, 4, 2]))?;
//! buffer.add(step)?;
//!
//! let batch = buffer.sample(256, false)?;
//! assert_eq!(batch.batch_shape(), Some((256, 1)));
//! # Ok(())
//! # }
//! ```
pub mod error;
pub mod vec_replay_buffer;

mod base;
pub use base::{ExperienceBufferBase, ReplayBufferBase};

mod transition;
pub use error::ReplayBufferError;
pub use transition::TransitionBatch;
pub use vec_replay_buffer::{StorageMode, VecReplayBuffer, VecReplayBufferConfig};
