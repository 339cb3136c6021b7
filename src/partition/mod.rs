//! The partition: structured population state
//!
//! A partition is an insertion-ordered collection of categories, each owning
//! a numbers-at-age vector plus per-time-step caches of mean length and mean
//! weight and an on-demand age×length matrix. Processes are the only code
//! that mutates category data during a run; initialisation and reset manage
//! snapshots around them.

mod accessor;

pub use accessor::CategoryAccessor;

use std::collections::HashMap;

use crate::age_length::AgeLength;
use crate::error::ModelError;
use crate::length_weight::LengthWeight;
use crate::selectivity::Selectivity;

/// One labelled subset of the population sharing demographics
#[derive(Debug, Clone)]
pub struct Category {
    pub label: String,
    pub min_age: u32,
    pub max_age: u32,
    /// Numbers at age, indexed by age offset from min_age
    pub data: Vec<f64>,
    /// Handle of this category's age-length relationship
    pub age_length: usize,
    /// Mean length at age per time step, rebuilt each model year
    pub mean_length_by_time_step: Vec<Vec<f64>>,
    /// Mean weight at age per time step, rebuilt each model year
    pub mean_weight_by_time_step: Vec<Vec<f64>>,
    /// Age × length-bin matrix, rebuilt when an observation or
    /// length-based consumer requests it
    pub age_length_matrix: Vec<Vec<f64>>,
}

impl Category {
    pub fn new(label: impl Into<String>, min_age: u32, max_age: u32, age_length: usize) -> Self {
        let spread = (max_age - min_age + 1) as usize;
        Self {
            label: label.into(),
            min_age,
            max_age,
            data: vec![0.0; spread],
            age_length,
            mean_length_by_time_step: Vec::new(),
            mean_weight_by_time_step: Vec::new(),
            age_length_matrix: Vec::new(),
        }
    }

    pub fn age_spread(&self) -> usize {
        (self.max_age - self.min_age + 1) as usize
    }

    /// Translate a model age into this category's data offset
    pub fn age_index(&self, age: u32) -> usize {
        debug_assert!(age >= self.min_age && age <= self.max_age);
        (age - self.min_age) as usize
    }

    /// Refresh the mean length and mean weight caches for the given year
    pub fn update_mean_data(
        &mut self,
        age_length: &AgeLength,
        length_weight: &LengthWeight,
        year: u32,
        time_step_count: usize,
    ) {
        let spread = self.age_spread();
        self.mean_length_by_time_step = Vec::with_capacity(time_step_count);
        self.mean_weight_by_time_step = Vec::with_capacity(time_step_count);
        for step in 0..time_step_count {
            let mut lengths = Vec::with_capacity(spread);
            let mut weights = Vec::with_capacity(spread);
            for offset in 0..spread {
                let age = self.min_age + offset as u32;
                lengths.push(age_length.mean_length(year, step, age));
                weights.push(age_length.mean_weight(year, step, age, length_weight));
            }
            self.mean_length_by_time_step.push(lengths);
            self.mean_weight_by_time_step.push(weights);
        }
    }

    /// Mean weight at (time_step, age); zero when caches have not been built
    pub fn mean_weight(&self, time_step: usize, age: u32) -> f64 {
        self.mean_weight_by_time_step
            .get(time_step)
            .and_then(|row| row.get((age - self.min_age) as usize))
            .copied()
            .unwrap_or(0.0)
    }

    /// Mean length at (time_step, age)
    pub fn mean_length(&self, time_step: usize, age: u32) -> f64 {
        self.mean_length_by_time_step
            .get(time_step)
            .and_then(|row| row.get((age - self.min_age) as usize))
            .copied()
            .unwrap_or(0.0)
    }

    /// Rebuild the age×length matrix from this category's age-length
    /// relationship and the CV for (year, time_step).
    ///
    /// Each row spreads `selectivity(age) * numbers[age]` across the length
    /// bins. A zero CV is fatal: it signals unusable estimate bounds.
    pub fn update_age_length_matrix(
        &mut self,
        age_length: &AgeLength,
        selectivity: &Selectivity,
        length_bins: &[f64],
        length_plus: bool,
        year: u32,
        time_step: usize,
    ) -> Result<(), ModelError> {
        let bin_count = if length_plus {
            length_bins.len()
        } else {
            length_bins.len() - 1
        };
        let spread = self.age_spread();
        self.age_length_matrix = Vec::with_capacity(spread);

        for offset in 0..spread {
            let age = self.min_age + offset as u32;
            let cv = age_length.cv(year, time_step, age);
            if cv <= 0.0 {
                return Err(ModelError::Numerical(format!(
                    "CV of 0.0 for category {} age {} in year {} time step {}; check cv_first/cv_last",
                    self.label, age, year, time_step
                )));
            }
            let mu = age_length.mean_length(year, time_step, age);
            let proportions = age_length.distribution_across_bins(mu, cv, length_bins, length_plus);
            let weight = selectivity.value_at(age) * self.data[offset];
            let row: Vec<f64> = proportions.iter().take(bin_count).map(|p| p * weight).collect();
            self.age_length_matrix.push(row);
        }
        Ok(())
    }

    /// Sum the age×length matrix down each length column
    pub fn collapse_age_length_to_length(&self) -> Vec<f64> {
        let Some(first) = self.age_length_matrix.first() else {
            return Vec::new();
        };
        let mut totals = vec![0.0; first.len()];
        for row in &self.age_length_matrix {
            for (total, value) in totals.iter_mut().zip(row.iter()) {
                *total += value;
            }
        }
        totals
    }
}

/// Snapshot of every category's numbers vector, in partition order
pub type PartitionSnapshot = Vec<Vec<f64>>;

/// Insertion-ordered mapping from category label to Category
#[derive(Debug, Clone, Default)]
pub struct Partition {
    categories: Vec<Category>,
    lookup: HashMap<String, usize>,
}

impl Partition {
    pub fn new(categories: Vec<Category>) -> Result<Self, ModelError> {
        let mut lookup = HashMap::new();
        for (index, category) in categories.iter().enumerate() {
            if lookup.insert(category.label.clone(), index).is_some() {
                return Err(ModelError::UnknownLabel {
                    kind: "duplicate category",
                    label: category.label.clone(),
                });
            }
        }
        Ok(Self { categories, lookup })
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.lookup.get(label).copied()
    }

    pub fn get(&self, index: usize) -> &Category {
        &self.categories[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Category {
        &mut self.categories[index]
    }

    pub fn category(&self, label: &str) -> Result<&Category, ModelError> {
        self.index_of(label)
            .map(|i| &self.categories[i])
            .ok_or_else(|| ModelError::UnknownLabel {
                kind: "category",
                label: label.to_string(),
            })
    }

    pub fn category_mut(&mut self, label: &str) -> Result<&mut Category, ModelError> {
        let index = self.index_of(label).ok_or_else(|| ModelError::UnknownLabel {
            kind: "category",
            label: label.to_string(),
        })?;
        Ok(&mut self.categories[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Category> {
        self.categories.iter_mut()
    }

    pub fn labels(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.label.clone()).collect()
    }

    /// Clone every numbers vector
    pub fn snapshot(&self) -> PartitionSnapshot {
        self.categories.iter().map(|c| c.data.clone()).collect()
    }

    /// Restore every numbers vector from a snapshot
    pub fn restore(&mut self, snapshot: &PartitionSnapshot) {
        debug_assert_eq!(snapshot.len(), self.categories.len());
        for (category, data) in self.categories.iter_mut().zip(snapshot.iter()) {
            category.data.clone_from(data);
        }
    }

    /// Zero every numbers vector
    pub fn zero(&mut self) {
        for category in &mut self.categories {
            category.data.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// A negative cell after a process execution signals a bug and aborts
    pub fn check_non_negative(&self, source: &str) -> Result<(), ModelError> {
        for category in &self.categories {
            for (offset, value) in category.data.iter().enumerate() {
                if *value < 0.0 {
                    return Err(ModelError::Numerical(format!(
                        "{} produced a negative partition value ({}) in category {} at age {}",
                        source,
                        value,
                        category.label,
                        category.min_age + offset as u32
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::age_length::{Distribution, GrowthCurve};

    fn two_category_partition() -> Partition {
        Partition::new(vec![
            Category::new("immature.male", 1, 10, 0),
            Category::new("immature.female", 1, 10, 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_and_order() {
        let partition = two_category_partition();
        assert_eq!(partition.index_of("immature.male"), Some(0));
        assert_eq!(partition.index_of("immature.female"), Some(1));
        assert!(partition.index_of("mature.male").is_none());
        assert!(partition.category("mature.male").is_err());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let result = Partition::new(vec![
            Category::new("male", 1, 10, 0),
            Category::new("male", 1, 10, 0),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut partition = two_category_partition();
        partition.category_mut("immature.male").unwrap().data[3] = 250.0;
        let snapshot = partition.snapshot();

        partition.category_mut("immature.male").unwrap().data[3] = 0.0;
        partition.restore(&snapshot);
        assert_eq!(partition.category("immature.male").unwrap().data[3], 250.0);
    }

    #[test]
    fn test_negative_check() {
        let mut partition = two_category_partition();
        assert!(partition.check_non_negative("test").is_ok());
        partition.category_mut("immature.female").unwrap().data[0] = -1e-9;
        assert!(partition.check_non_negative("test").is_err());
    }

    #[test]
    fn test_age_length_matrix_conserves_numbers() {
        let mut category = Category::new("male", 1, 10, 0);
        category.data = vec![100.0; 10];

        let mut age_length = AgeLength::new(
            "VB",
            GrowthCurve::VonBertalanffy {
                linf: 100.0,
                k: 0.25,
                t0: 0.0,
            },
            Distribution::Normal,
            0.1,
            None,
            "Basic",
        );
        age_length.build(&[2000], 1, 1, 10);
        let selectivity = crate::selectivity::Selectivity::new(
            "One",
            crate::selectivity::SelectivityKind::Constant { c: 1.0 },
        );

        let bins: Vec<f64> = (0..=60).map(|i| i as f64 * 2.0).collect();
        category
            .update_age_length_matrix(&age_length, &selectivity, &bins, true, 2000, 0)
            .unwrap();

        // every age row sums back to the cohort abundance
        for row in &category.age_length_matrix {
            let total: f64 = row.iter().sum();
            assert!((total - 100.0).abs() < 1e-8, "row total {}", total);
        }

        let by_length = category.collapse_age_length_to_length();
        let grand_total: f64 = by_length.iter().sum();
        assert!((grand_total - 1000.0).abs() < 1e-7);
    }
}
