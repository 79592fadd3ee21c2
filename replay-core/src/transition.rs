//! Batches of transitions exchanged with replay buffers.
use crate::error::ReplayBufferError;
use anyhow::Result;
use ndarray::{ArrayD, Axis};
use std::{collections::BTreeMap, ops::Index};

/// A set of named fields holding transitions of vectorized environments.
///
/// Every field is an `f32` array of shape `[T, n_envs, *feature_shape]`,
/// where `T` is the number of time steps and `n_envs` the number of
/// environments. The leading two dimensions are shared by all fields, which
/// is checked on [`TransitionBatch::insert`].
///
/// Typical field names are observation keys, `actions`, `rewards`, `dones`
/// and `next_<observation key>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransitionBatch {
    fields: BTreeMap<String, ArrayD<f32>>,
}

impl TransitionBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a batch with `T = 1` from a single step of vectorized environments.
    ///
    /// Each array in `step` has shape `[n_envs, *feature_shape]`; a leading
    /// time axis is inserted.
    pub fn from_step<I, K>(step: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, ArrayD<f32>)>,
        K: Into<String>,
    {
        let mut batch = Self::new();
        for (key, value) in step.into_iter() {
            batch.insert(key, value.insert_axis(Axis(0)))?;
        }
        Ok(batch)
    }

    /// Inserts a field, replacing the previous value with the same name.
    ///
    /// Fails with [`ReplayBufferError::InvalidArgument`] if `value` has less
    /// than two dimensions and with [`ReplayBufferError::ShapeMismatch`] if
    /// its leading dimensions disagree with the other fields.
    pub fn insert(&mut self, key: impl Into<String>, value: ArrayD<f32>) -> Result<()> {
        let key = key.into();
        if value.ndim() < 2 {
            return Err(ReplayBufferError::InvalidArgument(format!(
                "field `{}` must have shape [T, n_envs, ...], got {:?}",
                key,
                value.shape()
            ))
            .into());
        }

        let other = self.fields.iter().find(|(k, _)| **k != key);
        if let Some((_, other)) = other {
            if other.shape()[..2] != value.shape()[..2] {
                return Err(ReplayBufferError::ShapeMismatch {
                    field: key,
                    expected: other.shape()[..2].to_vec(),
                    actual: value.shape()[..2].to_vec(),
                }
                .into());
            }
        }

        self.fields.insert(key, value);
        Ok(())
    }

    /// Inserts a field whose shape is known to be consistent.
    pub(crate) fn insert_unchecked(&mut self, key: String, value: ArrayD<f32>) {
        self.fields.insert(key, value);
    }

    /// Returns the field with the given name.
    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.fields.get(key)
    }

    /// Removes a field and returns it.
    pub fn remove(&mut self, key: &str) -> Option<ArrayD<f32>> {
        self.fields.remove(key)
    }

    /// Returns `true` if the batch has a field with the given name.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Iterates over field names in lexicographic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Iterates over fields in lexicographic order of their names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// Returns `(T, n_envs)`, or `None` if the batch has no fields.
    pub fn batch_shape(&self) -> Option<(usize, usize)> {
        self.fields
            .values()
            .next()
            .map(|v| (v.shape()[0], v.shape()[1]))
    }

    /// Returns the number of time steps `T`.
    pub fn len(&self) -> usize {
        self.batch_shape().map_or(0, |(t, _)| t)
    }

    /// Returns `true` if the batch holds no time step.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Index<&str> for TransitionBatch {
    type Output = ArrayD<f32>;

    /// Panics if the field does not exist.
    fn index(&self, key: &str) -> &Self::Output {
        match self.fields.get(key) {
            Some(v) => v,
            None => panic!("No field `{}` in the batch", key),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn arange(shape: &[usize]) -> ArrayD<f32> {
        let n = shape.iter().product::<usize>();
        Array::from_shape_vec(IxDyn(shape), (0..n).map(|x| x as f32).collect()).unwrap()
    }

    #[test]
    fn test_insert_checks_leading_dims() {
        let mut batch = TransitionBatch::new();
        batch.insert("obs", arange(&[3, 2, 4])).unwrap();
        batch.insert("rewards", arange(&[3, 2, 1])).unwrap();
        assert_eq!(batch.batch_shape(), Some((3, 2)));
        assert_eq!(batch.len(), 3);

        let err = batch.insert("actions", arange(&[2, 2, 1])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReplayBufferError>(),
            Some(ReplayBufferError::ShapeMismatch { .. })
        ));
        assert!(!batch.contains_key("actions"));

        let err = batch.insert("dones", arange(&[3])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReplayBufferError>(),
            Some(ReplayBufferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_replace_single_field() {
        let mut batch = TransitionBatch::new();
        batch.insert("obs", arange(&[3, 2])).unwrap();
        batch.insert("obs", arange(&[5, 1])).unwrap();
        assert_eq!(batch.batch_shape(), Some((5, 1)));
        assert_eq!(batch.n_fields(), 1);
    }

    #[test]
    fn test_from_step() {
        let batch = TransitionBatch::from_step(vec![
            ("obs", arange(&[4, 3])),
            ("rewards", arange(&[4, 1])),
        ])
        .unwrap();
        assert_eq!(batch.batch_shape(), Some((1, 4)));
        assert_eq!(batch["obs"].shape(), &[1, 4, 3]);
        assert_eq!(batch["obs"][[0, 2, 1]], 7.0);
        assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["obs", "rewards"]);
    }

    #[test]
    fn test_empty() {
        let batch = TransitionBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.batch_shape(), None);
    }
}
