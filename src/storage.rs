use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayBuilder, Float64Builder, ListArray, ListBuilder};

/// Sink for the projected draws of one chain.
pub trait DrawStorage: Send {
    fn append_value(&mut self, point: &[f64]) -> Result<()>;
    fn finalize(self) -> Result<Arc<dyn Array>>;
    fn inspect(&self) -> Result<Arc<dyn Array>>;
}

/// Stores each draw as one list entry, so the dimension may change between draws.
pub struct ListDrawStorage {
    draws: ListBuilder<Float64Builder>,
}

impl ListDrawStorage {
    pub fn new() -> Self {
        Self {
            draws: ListBuilder::new(Float64Builder::new()),
        }
    }

    pub fn with_capacity(draws: usize) -> Self {
        Self {
            draws: ListBuilder::with_capacity(Float64Builder::new(), draws),
        }
    }

    pub fn len(&self) -> usize {
        ArrayBuilder::len(&self.draws)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListDrawStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawStorage for ListDrawStorage {
    fn append_value(&mut self, point: &[f64]) -> Result<()> {
        self.draws.values().append_slice(point);
        self.draws.append(true);
        Ok(())
    }

    fn finalize(mut self) -> Result<Arc<dyn Array>> {
        Ok(ArrayBuilder::finish(&mut self.draws))
    }

    fn inspect(&self) -> Result<Arc<dyn Array>> {
        Ok(ArrayBuilder::finish_cloned(&self.draws))
    }
}

/// Copy the draws of a finalized [`ListDrawStorage`] back into vectors.
pub fn draws_to_vecs(array: &dyn Array) -> Result<Vec<Vec<f64>>> {
    let list = array
        .as_any()
        .downcast_ref::<ListArray>()
        .context("draws are not stored as a list array")?;
    list.iter()
        .map(|entry| {
            let entry = entry.context("missing draw")?;
            let values = entry
                .as_any()
                .downcast_ref::<arrow::array::Float64Array>()
                .context("draw values are not f64")?;
            Ok(values.values().to_vec())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn variable_dimension_draws() {
        let mut storage = ListDrawStorage::new();
        storage.append_value(&[1.]).unwrap();
        storage.append_value(&[]).unwrap();
        storage.append_value(&[2., 3., 4.]).unwrap();
        assert_eq!(storage.len(), 3);

        let inspected = storage.inspect().unwrap();
        assert_eq!(inspected.len(), 3);

        let array = storage.finalize().unwrap();
        assert_eq!(
            draws_to_vecs(&*array).unwrap(),
            vec![vec![1.], vec![], vec![2., 3., 4.]]
        );
    }
}
