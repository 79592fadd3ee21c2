//! Replay buffer interface for reinforcement learning.
//!
//! This module defines the interfaces of experience replay buffers. The push
//! side ([`ExperienceBufferBase`]) and the batch side ([`ReplayBufferBase`])
//! are separate traits, so a process collecting experiences and a process
//! training on them can each depend on the half they use.

use anyhow::Result;

/// Interface for buffers that store experiences from environments.
///
/// # Type Parameters
///
/// * `Item` - The type of experiences pushed into the buffer
///
/// # Examples
///
/// ```ignore
/// struct SimpleBuffer<T> {
///     items: Vec<T>,
/// }
///
/// impl<T> ExperienceBufferBase for SimpleBuffer<T> {
///     type Item = T;
///
///     fn push(&mut self, tr: T) -> Result<()> {
///         self.items.push(tr);
///         Ok(())
///     }
///
///     fn len(&self) -> usize {
///         self.items.len()
///     }
/// }
/// ```
pub trait ExperienceBufferBase {
    /// The type of items pushed into the buffer.
    ///
    /// For vectorized environments an item usually holds several time steps
    /// of every environment.
    type Item;

    /// Pushes experiences into the buffer.
    ///
    /// # Arguments
    ///
    /// * `tr` - The experiences to store
    ///
    /// # Returns
    ///
    /// `Ok(())` if the experiences were stored, or an error if they do not
    /// fit the layout of the buffer
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// Returns the number of experiences that can currently be sampled.
    ///
    /// # Returns
    ///
    /// The number of stored entries, bounded by the capacity of the buffer
    fn len(&self) -> usize;

    /// Returns `true` if nothing has been pushed yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interface for replay buffers that generate batches for training.
///
/// # Associated Types
///
/// * `Config` - Configuration parameters for the buffer
/// * `Batch` - The type of batch generated for training
pub trait ReplayBufferBase {
    /// Configuration parameters for the replay buffer.
    ///
    /// This type must implement `Clone` to support building multiple instances
    /// with the same configuration, e.g. one buffer per rank.
    type Config: Clone;

    /// The type of batch generated for training.
    type Batch;

    /// Builds a new replay buffer from the given configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration parameters
    ///
    /// # Returns
    ///
    /// A new, empty replay buffer, or an error if the configuration is invalid
    fn build(config: &Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Constructs a batch of experiences for training.
    ///
    /// # Arguments
    ///
    /// * `size` - The number of experiences to include in the batch
    ///
    /// # Returns
    ///
    /// A batch of experiences, or an error if the buffer cannot serve the
    /// request yet
    fn batch(&mut self, size: usize) -> Result<Self::Batch>;
}
