//! Category transitions and Markovian movement
//!
//! Both processes move selected fractions of a source category into a
//! destination category. The transition form is pairwise (a proportion of
//! each source moves, the remainder stays); the Markovian form distributes
//! every source across a full destination row whose proportions must sum
//! to one. Amounts are computed for every pair before any are applied, so a
//! category appearing in several pairs sees a consistent starting state.

use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::AddressKey;
use crate::model::ModelCore;
use crate::partition::CategoryAccessor;

use super::ProcessBuildContext;

const ROW_SUM_TOLERANCE: f64 = 1e-3;

/// Pairwise maturation-style transition
#[derive(Debug, Clone)]
pub struct TransitionCategory {
    pub from_labels: Vec<String>,
    pub to_labels: Vec<String>,
    pub proportions: Vec<f64>,
    pub selectivity_labels: Vec<String>,

    from: CategoryAccessor,
    to: CategoryAccessor,
    selectivities: Vec<usize>,
}

impl TransitionCategory {
    pub fn new(
        from_labels: Vec<String>,
        to_labels: Vec<String>,
        proportions: Vec<f64>,
        selectivity_labels: Vec<String>,
    ) -> Self {
        Self {
            from_labels,
            to_labels,
            proportions,
            selectivity_labels,
            from: CategoryAccessor::default(),
            to: CategoryAccessor::default(),
            selectivities: Vec::new(),
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.from_labels.len() != self.to_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of 'to' categories ({}) does not match the number of 'from' categories ({})",
                    self.to_labels.len(),
                    self.from_labels.len()
                ),
            );
        }
        if self.proportions.len() == 1 {
            self.proportions = vec![self.proportions[0]; self.from_labels.len()];
        }
        if self.selectivity_labels.len() == 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.from_labels.len()];
        }
        if self.proportions.len() != self.from_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of proportions ({}) does not match the number of 'from' categories ({})",
                    self.proportions.len(),
                    self.from_labels.len()
                ),
            );
        }
        if self.selectivity_labels.len() != self.from_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of selectivities ({}) does not match the number of 'from' categories ({})",
                    self.selectivity_labels.len(),
                    self.from_labels.len()
                ),
            );
        }
        for proportion in &self.proportions {
            if *proportion < 0.0 || *proportion > 1.0 {
                sink.error(
                    location,
                    format!("proportion ({}) must be in the range 0.0-1.0", proportion),
                );
            }
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.from = CategoryAccessor::init(&ctx.core.partition, &self.from_labels)?;
        self.to = CategoryAccessor::init(&ctx.core.partition, &self.to_labels)?;
        self.selectivities.clear();
        for label in &self.selectivity_labels {
            let index =
                ctx.core
                    .selectivity_index(label)
                    .ok_or_else(|| ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    })?;
            self.selectivities.push(index);
        }
        Ok(())
    }

    pub fn execute(&mut self, label: &str, core: &mut ModelCore) -> Result<(), ModelError> {
        // compute the full movement first so a category present in several
        // pairs is read at its start-of-process state
        let mut amounts: Vec<Vec<f64>> = Vec::with_capacity(self.from.len());
        for i in 0..self.from.len() {
            let selectivity = &core.selectivities[self.selectivities[i]];
            let category = core.partition.get(self.from.index(i));
            let row: Vec<f64> = category
                .data
                .iter()
                .enumerate()
                .map(|(offset, &numbers)| {
                    let age = category.min_age + offset as u32;
                    self.proportions[i] * selectivity.value_at(age) * numbers
                })
                .collect();
            amounts.push(row);
        }

        for i in 0..self.from.len() {
            for (offset, &amount) in amounts[i].iter().enumerate() {
                let from = core.partition.get_mut(self.from.index(i));
                from.data[offset] -= amount;
                if from.data[offset] < 0.0 {
                    return Err(ModelError::Numerical(format!(
                        "{} caused a negative partition value in category {}",
                        label, from.label
                    )));
                }
                let to = core.partition.get_mut(self.to.index(i));
                to.data[offset] += amount;
            }
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("proportions", AddressKey::Index(i)) => self.proportions.get(*i).copied(),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        match (name, key) {
            ("proportions", AddressKey::Index(i)) if *i < self.proportions.len() => {
                self.proportions[*i] = value;
                true
            }
            _ => false,
        }
    }
}

/// Full-matrix Markovian movement between category sets
#[derive(Debug, Clone)]
pub struct MarkovianMovement {
    pub from_labels: Vec<String>,
    pub to_labels: Vec<String>,
    pub proportions: Vec<f64>,
    pub selectivity_labels: Vec<String>,

    from: CategoryAccessor,
    to: CategoryAccessor,
    selectivities: Vec<usize>,
}

impl MarkovianMovement {
    pub fn new(
        from_labels: Vec<String>,
        to_labels: Vec<String>,
        proportions: Vec<f64>,
        selectivity_labels: Vec<String>,
    ) -> Self {
        Self {
            from_labels,
            to_labels,
            proportions,
            selectivity_labels,
            from: CategoryAccessor::default(),
            to: CategoryAccessor::default(),
            selectivities: Vec::new(),
        }
    }

    pub fn validate(&mut self, location: &str, sink: &mut DiagnosticSink) {
        if self.selectivity_labels.len() == 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.from_labels.len()];
        }
        if self.from_labels.len() != self.to_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of 'to' categories ({}) does not match the number of 'from' categories ({})",
                    self.to_labels.len(),
                    self.from_labels.len()
                ),
            );
        }
        if self.proportions.len() == 1 {
            self.proportions = vec![self.proportions[0]; self.to_labels.len()];
        }
        if self.proportions.len() != self.to_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of proportions ({}) does not match the number of 'to' categories ({})",
                    self.proportions.len(),
                    self.to_labels.len()
                ),
            );
        }

        // each source's proportions across its destinations must sum to one
        let mut sums: Vec<(String, f64)> = Vec::new();
        for (i, from) in self.from_labels.iter().enumerate() {
            let proportion = self.proportions.get(i).copied().unwrap_or(0.0);
            match sums.iter_mut().find(|(label, _)| label == from) {
                Some((_, sum)) => *sum += proportion,
                None => sums.push((from.clone(), proportion)),
            }
        }
        for (from, sum) in sums {
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                sink.error(
                    location,
                    format!(
                        "the 'from' category '{}' has proportions across all 'to' categories summing to {}; this must sum to one",
                        from, sum
                    ),
                );
            }
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.from = CategoryAccessor::init(&ctx.core.partition, &self.from_labels)?;
        self.to = CategoryAccessor::init(&ctx.core.partition, &self.to_labels)?;
        self.selectivities.clear();
        for label in &self.selectivity_labels {
            let index =
                ctx.core
                    .selectivity_index(label)
                    .ok_or_else(|| ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    })?;
            self.selectivities.push(index);
        }
        Ok(())
    }

    pub fn execute(&mut self, label: &str, core: &mut ModelCore) -> Result<(), ModelError> {
        let mut amounts: Vec<Vec<f64>> = Vec::with_capacity(self.from.len());
        for i in 0..self.from.len() {
            let selectivity = &core.selectivities[self.selectivities[i]];
            let category = core.partition.get(self.from.index(i));
            let row: Vec<f64> = category
                .data
                .iter()
                .enumerate()
                .map(|(offset, &numbers)| {
                    let age = category.min_age + offset as u32;
                    self.proportions[i] * selectivity.value_at(age) * numbers
                })
                .collect();
            amounts.push(row);
        }

        for i in 0..self.from.len() {
            for (offset, &amount) in amounts[i].iter().enumerate() {
                let from = core.partition.get_mut(self.from.index(i));
                from.data[offset] -= amount;
                if from.data[offset] < 0.0 {
                    return Err(ModelError::Numerical(format!(
                        "{} caused a negative partition value in category {}",
                        label, from.label
                    )));
                }
                let to = core.partition.get_mut(self.to.index(i));
                to.data[offset] += amount;
            }
        }
        Ok(())
    }

    pub fn addressable(&self, name: &str, key: &AddressKey) -> Option<f64> {
        match (name, key) {
            ("proportions", AddressKey::Index(i)) => self.proportions.get(*i).copied(),
            ("proportions", AddressKey::Key(pair)) => self
                .pair_index(pair)
                .and_then(|i| self.proportions.get(i))
                .copied(),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, key: &AddressKey, value: f64) -> bool {
        let index = match (name, key) {
            ("proportions", AddressKey::Index(i)) => Some(*i),
            ("proportions", AddressKey::Key(pair)) => self.pair_index(pair),
            _ => None,
        };
        match index {
            Some(i) if i < self.proportions.len() => {
                self.proportions[i] = value;
                true
            }
            _ => false,
        }
    }

    /// Proportions are addressable by `from-to` pair label
    fn pair_index(&self, pair: &str) -> Option<usize> {
        self.from_labels
            .iter()
            .zip(self.to_labels.iter())
            .position(|(from, to)| format!("{}-{}", from, to) == pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{Category, Partition};
    use crate::selectivity::{Selectivity, SelectivityKind};

    fn build_core(data: Vec<(&str, Vec<f64>)>) -> crate::model::ModelCore {
        let categories = data
            .iter()
            .map(|(label, values)| {
                let mut category = Category::new(*label, 1, values.len() as u32, 0);
                category.data = values.clone();
                category
            })
            .collect();
        let mut core =
            crate::test_support::core_with_partition(Partition::new(categories).unwrap());
        core.selectivities = vec![Selectivity::new("One", SelectivityKind::Constant { c: 1.0 })];
        core
    }

    #[test]
    fn test_transition_moves_proportion() {
        let mut core = build_core(vec![
            ("immature", vec![100.0, 200.0]),
            ("mature", vec![0.0, 0.0]),
        ]);

        let mut transition = TransitionCategory::new(
            vec!["immature".to_string()],
            vec!["mature".to_string()],
            vec![0.6],
            vec!["One".to_string()],
        );
        let ctx = crate::test_support::build_context(&core);
        transition.build(&ctx).unwrap();
        drop(ctx);
        transition.execute("Maturation", &mut core).unwrap();

        assert_eq!(core.partition.category("immature").unwrap().data, vec![40.0, 80.0]);
        assert_eq!(core.partition.category("mature").unwrap().data, vec![60.0, 120.0]);
    }

    #[test]
    fn test_transition_conserves_total() {
        let mut core = build_core(vec![
            ("immature", vec![50.0, 70.0]),
            ("mature", vec![5.0, 7.0]),
        ]);
        let mut transition = TransitionCategory::new(
            vec!["immature".to_string()],
            vec!["mature".to_string()],
            vec![0.25],
            vec!["One".to_string()],
        );
        let ctx = crate::test_support::build_context(&core);
        transition.build(&ctx).unwrap();
        drop(ctx);

        let before: f64 = core.partition.iter().flat_map(|c| c.data.iter()).sum();
        transition.execute("Maturation", &mut core).unwrap();
        let after: f64 = core.partition.iter().flat_map(|c| c.data.iter()).sum();
        assert!((before - after).abs() < 1e-12);
    }

    #[test]
    fn test_markovian_row_sums_validated() {
        let mut movement = MarkovianMovement::new(
            vec!["north".to_string(), "north".to_string()],
            vec!["north".to_string(), "south".to_string()],
            vec![0.7, 0.2],
            vec!["One".to_string()],
        );
        let mut sink = DiagnosticSink::new();
        movement.validate("process[Move]", &mut sink);
        assert!(!sink.is_empty());
    }

    #[test]
    fn test_markovian_moves_and_conserves() {
        let mut core = build_core(vec![
            ("north", vec![100.0]),
            ("south", vec![40.0]),
        ]);
        // north splits 70/30, south stays put
        let mut movement = MarkovianMovement::new(
            vec!["north".to_string(), "north".to_string(), "south".to_string()],
            vec!["north".to_string(), "south".to_string(), "south".to_string()],
            vec![0.7, 0.3, 1.0],
            vec!["One".to_string()],
        );
        let mut sink = DiagnosticSink::new();
        movement.validate("process[Move]", &mut sink);
        assert!(sink.is_empty());

        let ctx = crate::test_support::build_context(&core);
        movement.build(&ctx).unwrap();
        drop(ctx);
        movement.execute("Move", &mut core).unwrap();

        assert!((core.partition.category("north").unwrap().data[0] - 70.0).abs() < 1e-12);
        assert!((core.partition.category("south").unwrap().data[0] - 70.0).abs() < 1e-12);
    }
}
