//! Scoped access to a declared subset of categories
//!
//! A process or observation declares the categories it touches once, at
//! build time; the accessor resolves the labels to partition indices in the
//! declared order and owns the cached start-of-step view used for
//! mid-step interpolation.

use crate::error::ModelError;
use crate::partition::Partition;

#[derive(Debug, Clone, Default)]
pub struct CategoryAccessor {
    indices: Vec<usize>,
    cache: Vec<Vec<f64>>,
}

impl CategoryAccessor {
    /// Resolve `labels` against the partition, preserving order.
    /// An unknown label is a fatal configuration error.
    pub fn init(partition: &Partition, labels: &[String]) -> Result<Self, ModelError> {
        let mut indices = Vec::with_capacity(labels.len());
        for label in labels {
            let index = partition.index_of(label).ok_or_else(|| ModelError::UnknownLabel {
                kind: "category",
                label: label.clone(),
            })?;
            indices.push(index);
        }
        Ok(Self {
            indices,
            cache: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Partition index of the i-th declared category
    pub fn index(&self, i: usize) -> usize {
        self.indices[i]
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Clone the current numbers of every declared category into the cache.
    /// The cached view is valid until the next call.
    pub fn build_cache(&mut self, partition: &Partition) {
        self.cache = self
            .indices
            .iter()
            .map(|&index| partition.get(index).data.clone())
            .collect();
    }

    /// Cached start-of-step numbers for the i-th declared category
    pub fn cached(&self, i: usize) -> &[f64] {
        &self.cache[i]
    }

    pub fn has_cache(&self) -> bool {
        !self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Category;

    fn partition() -> Partition {
        Partition::new(vec![
            Category::new("male", 1, 5, 0),
            Category::new("female", 1, 5, 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_init_preserves_declared_order() {
        let partition = partition();
        let accessor = CategoryAccessor::init(
            &partition,
            &["female".to_string(), "male".to_string()],
        )
        .unwrap();
        assert_eq!(accessor.index(0), 1);
        assert_eq!(accessor.index(1), 0);
    }

    #[test]
    fn test_unknown_label_is_fatal() {
        let partition = partition();
        let result = CategoryAccessor::init(&partition, &["ghost".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_is_a_point_in_time_copy() {
        let mut partition = partition();
        partition.category_mut("male").unwrap().data[0] = 10.0;

        let mut accessor =
            CategoryAccessor::init(&partition, &["male".to_string()]).unwrap();
        accessor.build_cache(&partition);

        partition.category_mut("male").unwrap().data[0] = 99.0;
        assert_eq!(accessor.cached(0)[0], 10.0);
        assert_eq!(partition.get(accessor.index(0)).data[0], 99.0);
    }
}
