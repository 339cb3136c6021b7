//! Tagging: move observed release numbers between category pairs
//!
//! Releases are spread across the source categories in proportion to their
//! selected stock at each age, capped at U_max with a penalty on the
//! shortfall. Initial mortality thins the fish that arrive in the tagged
//! category, and tag loss drifts tagged fish back to the source pool in
//! later years.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{DiagnosticSink, ModelError};
use crate::estimates::addressable::AddressKey;
use crate::model::{ModelCore, RunPhase};
use crate::partition::CategoryAccessor;

use super::ProcessBuildContext;

const ZERO_FUN_DELTA: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct TagByAge {
    pub from_labels: Vec<String>,
    pub to_labels: Vec<String>,
    pub min_age: u32,
    pub max_age: u32,
    pub years: Vec<u32>,
    /// Release numbers by year: one value per age in [min_age, max_age]
    pub numbers: BTreeMap<u32, Vec<f64>>,
    pub u_max: f64,
    pub penalty: Option<String>,
    /// One selectivity per source category
    pub selectivity_labels: Vec<String>,
    pub initial_mortality: f64,
    pub initial_mortality_selectivity: Option<String>,
    /// One tag-loss rate per source category, or a single shared value
    pub loss_rate: Vec<f64>,
    pub loss_rate_selectivity_labels: Vec<String>,

    // built state
    from: CategoryAccessor,
    to: CategoryAccessor,
    selectivities: Vec<usize>,
    loss_rate_selectivities: Vec<Option<usize>>,
    initial_mortality_selectivity_index: Option<usize>,
    penalty_index: Option<usize>,
    first_year: u32,
}

impl TagByAge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from_labels: Vec<String>,
        to_labels: Vec<String>,
        min_age: u32,
        max_age: u32,
        years: Vec<u32>,
        numbers: BTreeMap<u32, Vec<f64>>,
        selectivity_labels: Vec<String>,
        loss_rate: Vec<f64>,
    ) -> Self {
        Self {
            from_labels,
            to_labels,
            min_age,
            max_age,
            years,
            numbers,
            u_max: 0.99,
            penalty: None,
            selectivity_labels,
            initial_mortality: 0.0,
            initial_mortality_selectivity: None,
            loss_rate,
            loss_rate_selectivity_labels: Vec::new(),
            from: CategoryAccessor::default(),
            to: CategoryAccessor::default(),
            selectivities: Vec::new(),
            loss_rate_selectivities: Vec::new(),
            initial_mortality_selectivity_index: None,
            penalty_index: None,
            first_year: 0,
        }
    }

    /// Build release numbers from per-year proportions and a total N
    pub fn with_proportions(
        mut self,
        proportions: BTreeMap<u32, Vec<f64>>,
        n_by_year: BTreeMap<u32, f64>,
    ) -> Self {
        let mut numbers = BTreeMap::new();
        for (year, row) in proportions {
            let n = n_by_year.get(&year).copied().unwrap_or(0.0);
            numbers.insert(year, row.into_iter().map(|p| p * n).collect());
        }
        self.numbers = numbers;
        self
    }

    fn age_spread(&self) -> usize {
        (self.max_age - self.min_age + 1) as usize
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
        if self.u_max <= 0.0 || self.u_max > 1.0 {
            sink.error(
                location,
                format!("u_max ({}) must be greater than 0.0 and less than or equal to 1.0", self.u_max),
            );
        }
        if self.min_age > self.max_age {
            sink.error(
                location,
                format!("min_age ({}) cannot be greater than max_age ({})", self.min_age, self.max_age),
            );
        }
        if self.loss_rate.len() == 1 {
            self.loss_rate = vec![self.loss_rate[0]; self.from_labels.len()];
        }
        if self.loss_rate.len() != self.from_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of loss rates ({}) does not match the number of 'from' categories ({})",
                    self.loss_rate.len(),
                    self.from_labels.len()
                ),
            );
        }
        if self.selectivity_labels.len() == 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.from_labels.len()];
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
        let spread = self.age_spread();
        for (year, row) in &self.numbers {
            if !self.years.contains(year) {
                sink.error(
                    location,
                    format!("numbers table contains year {} that is not a declared tagging year", year),
                );
            }
            if row.len() != spread {
                sink.error(
                    location,
                    format!(
                        "numbers for year {} supply {} ages but the tag age range covers {}",
                        year,
                        row.len(),
                        spread
                    ),
                );
            }
        }
        for year in &self.years {
            if !self.numbers.contains_key(year) {
                sink.error(
                    location,
                    format!("year {} does not have a corresponding entry in the numbers table", year),
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

        self.loss_rate_selectivities = vec![None; self.from_labels.len()];
        for (i, label) in self.loss_rate_selectivity_labels.iter().enumerate() {
            let index =
                ctx.core
                    .selectivity_index(label)
                    .ok_or_else(|| ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    })?;
            if i < self.loss_rate_selectivities.len() {
                self.loss_rate_selectivities[i] = Some(index);
            }
        }

        self.initial_mortality_selectivity_index =
            match &self.initial_mortality_selectivity {
                Some(label) => Some(ctx.core.selectivity_index(label).ok_or_else(|| {
                    ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    }
                })?),
                None => None,
            };

        self.penalty_index = match &self.penalty {
            Some(label) => Some(ctx.core.penalty_index(label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "penalty",
                    label: label.clone(),
                }
            })?),
            None => None,
        };

        self.first_year = self.years.iter().copied().min().unwrap_or(u32::MAX);
        Ok(())
    }

    pub fn reset(&mut self) {}

    pub fn execute(&mut self, label: &str, core: &mut ModelCore) -> Result<(), ModelError> {
        if core.state.phase == RunPhase::Initialise {
            return Ok(());
        }
        let year = core.state.current_year;
        if year < self.first_year {
            return Ok(());
        }

        self.apply_tag_loss(core);

        if !self.years.contains(&year) {
            return Ok(());
        }
        let releases = match self.numbers.get(&year) {
            Some(releases) => releases.clone(),
            None => return Ok(()),
        };

        let spread = self.age_spread();
        for i in 0..spread {
            let age = self.min_age + i as u32;
            if releases[i] == 0.0 {
                continue;
            }

            // selected stock available across all source categories
            let mut total_stock_with_selectivities = 0.0;
            for pair in 0..self.from.len() {
                let selectivity = &core.selectivities[self.selectivities[pair]];
                let category = core.partition.get(self.from.index(pair));
                let offset = category.age_index(age);
                total_stock_with_selectivities += category.data[offset] * selectivity.value_at(age);
            }
            if total_stock_with_selectivities <= 0.0 {
                continue;
            }

            for pair in 0..self.from.len() {
                let selectivity_value =
                    core.selectivities[self.selectivities[pair]].value_at(age);
                let from_index = self.from.index(pair);
                let to_index = self.to.index(pair);
                let offset = core.partition.get(from_index).age_index(age);
                let available = core.partition.get(from_index).data[offset] * selectivity_value;

                let mut current = releases[i] * (available / total_stock_with_selectivities);
                let exploitation = current / available.max(ZERO_FUN_DELTA);
                if exploitation > self.u_max {
                    current = available * self.u_max;
                    debug!(
                        "tagging exploitation ({}) exceeded u_max ({}) at age {} in year {}",
                        exploitation, self.u_max, age, year
                    );
                    if let Some(penalty_index) = self.penalty_index {
                        let event =
                            core.penalties[penalty_index].trigger(label, releases[i], current);
                        core.penalty_log.push(event);
                    }
                }
                if current <= 0.0 {
                    continue;
                }

                let initial_mortality_selectivity = self
                    .initial_mortality_selectivity_index
                    .map(|index| core.selectivities[index].value_at(age))
                    .unwrap_or(1.0);
                let survived =
                    current * (1.0 - self.initial_mortality * initial_mortality_selectivity);

                core.partition.get_mut(from_index).data[offset] -= current;
                core.partition.get_mut(to_index).data[offset] += survived;
            }
        }
        Ok(())
    }

    /// Move `loss_rate * sel(age) * n[to]` back into the source pool
    fn apply_tag_loss(&self, core: &mut ModelCore) {
        for pair in 0..self.from.len() {
            let loss_rate = self.loss_rate[pair];
            if loss_rate == 0.0 {
                continue;
            }
            let from_index = self.from.index(pair);
            let to_index = self.to.index(pair);
            let spread = core.partition.get(to_index).data.len();
            for offset in 0..spread {
                let age = core.partition.get(to_index).min_age + offset as u32;
                let mut amount = core.partition.get(to_index).data[offset] * loss_rate;
                if let Some(selectivity_index) = self.loss_rate_selectivities[pair] {
                    amount *= core.selectivities[selectivity_index].value_at(age);
                }
                core.partition.get_mut(to_index).data[offset] -= amount;
                core.partition.get_mut(from_index).data[offset] += amount;
            }
        }
    }

    pub fn addressable(&self, name: &str, _key: &AddressKey) -> Option<f64> {
        match name {
            "u_max" => Some(self.u_max),
            "initial_mortality" => Some(self.initial_mortality),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, _key: &AddressKey, value: f64) -> bool {
        match name {
            "u_max" => self.u_max = value,
            "initial_mortality" => self.initial_mortality = value,
            _ => return false,
        }
        true
    }
}

/// Tagging with releases recorded per length bin
///
/// Release numbers are spread across the source categories by their
/// selected stock in each model length bin, then removed from ages in
/// proportion to each category's age-length composition of that bin.
/// Tag loss and initial mortality behave exactly as for tag-by-age.
#[derive(Debug, Clone)]
pub struct TagByLength {
    pub from_labels: Vec<String>,
    pub to_labels: Vec<String>,
    pub years: Vec<u32>,
    /// Release numbers by year: one value per model length bin
    pub numbers: BTreeMap<u32, Vec<f64>>,
    pub u_max: f64,
    pub penalty: Option<String>,
    pub selectivity_labels: Vec<String>,
    pub initial_mortality: f64,
    pub initial_mortality_selectivity: Option<String>,
    pub loss_rate: Vec<f64>,
    pub loss_rate_selectivity_labels: Vec<String>,

    from: CategoryAccessor,
    to: CategoryAccessor,
    selectivities: Vec<usize>,
    loss_rate_selectivities: Vec<Option<usize>>,
    initial_mortality_selectivity_index: Option<usize>,
    penalty_index: Option<usize>,
    first_year: u32,
}

impl TagByLength {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from_labels: Vec<String>,
        to_labels: Vec<String>,
        years: Vec<u32>,
        numbers: BTreeMap<u32, Vec<f64>>,
        selectivity_labels: Vec<String>,
        loss_rate: Vec<f64>,
    ) -> Self {
        Self {
            from_labels,
            to_labels,
            years,
            numbers,
            u_max: 0.99,
            penalty: None,
            selectivity_labels,
            initial_mortality: 0.0,
            initial_mortality_selectivity: None,
            loss_rate,
            loss_rate_selectivity_labels: Vec::new(),
            from: CategoryAccessor::default(),
            to: CategoryAccessor::default(),
            selectivities: Vec::new(),
            loss_rate_selectivities: Vec::new(),
            initial_mortality_selectivity_index: None,
            penalty_index: None,
            first_year: 0,
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
        if self.u_max <= 0.0 || self.u_max > 1.0 {
            sink.error(
                location,
                format!("u_max ({}) must be greater than 0.0 and less than or equal to 1.0", self.u_max),
            );
        }
        if self.loss_rate.len() == 1 {
            self.loss_rate = vec![self.loss_rate[0]; self.from_labels.len()];
        }
        if self.loss_rate.len() != self.from_labels.len() {
            sink.error(
                location,
                format!(
                    "the number of loss rates ({}) does not match the number of 'from' categories ({})",
                    self.loss_rate.len(),
                    self.from_labels.len()
                ),
            );
        }
        if self.selectivity_labels.len() == 1 {
            self.selectivity_labels =
                vec![self.selectivity_labels[0].clone(); self.from_labels.len()];
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
        for year in &self.years {
            if !self.numbers.contains_key(year) {
                sink.error(
                    location,
                    format!("year {} does not have a corresponding entry in the numbers table", year),
                );
            }
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        if ctx.core.length_bins.is_empty() {
            return Err(ModelError::Numerical(
                "tag-by-length requires model length bins to be defined".to_string(),
            ));
        }
        let bin_count = if ctx.core.length_plus {
            ctx.core.length_bins.len()
        } else {
            ctx.core.length_bins.len() - 1
        };
        for (year, row) in &self.numbers {
            if row.len() != bin_count {
                return Err(ModelError::Numerical(format!(
                    "numbers for year {} supply {} length bins but the model defines {}",
                    year,
                    row.len(),
                    bin_count
                )));
            }
        }

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

        self.loss_rate_selectivities = vec![None; self.from_labels.len()];
        for (i, label) in self.loss_rate_selectivity_labels.iter().enumerate() {
            let index =
                ctx.core
                    .selectivity_index(label)
                    .ok_or_else(|| ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    })?;
            if i < self.loss_rate_selectivities.len() {
                self.loss_rate_selectivities[i] = Some(index);
            }
        }

        self.initial_mortality_selectivity_index =
            match &self.initial_mortality_selectivity {
                Some(label) => Some(ctx.core.selectivity_index(label).ok_or_else(|| {
                    ModelError::UnknownLabel {
                        kind: "selectivity",
                        label: label.clone(),
                    }
                })?),
                None => None,
            };

        self.penalty_index = match &self.penalty {
            Some(label) => Some(ctx.core.penalty_index(label).ok_or_else(|| {
                ModelError::UnknownLabel {
                    kind: "penalty",
                    label: label.clone(),
                }
            })?),
            None => None,
        };

        self.first_year = self.years.iter().copied().min().unwrap_or(u32::MAX);
        Ok(())
    }

    pub fn reset(&mut self) {}

    pub fn execute(&mut self, label: &str, core: &mut ModelCore) -> Result<(), ModelError> {
        if core.state.phase == RunPhase::Initialise {
            return Ok(());
        }
        let year = core.state.current_year;
        if year < self.first_year {
            return Ok(());
        }

        self.apply_tag_loss(core);

        if !self.years.contains(&year) {
            return Ok(());
        }
        let releases = match self.numbers.get(&year) {
            Some(releases) => releases.clone(),
            None => return Ok(()),
        };

        // age-length decomposition of the selected stock per source
        let time_step = core.state.time_step;
        let mut matrices: Vec<Vec<Vec<f64>>> = Vec::with_capacity(self.from.len());
        for pair in 0..self.from.len() {
            let selectivity = &core.selectivities[self.selectivities[pair]];
            let category = core.partition.get(self.from.index(pair));
            let age_length = &core.age_lengths[category.age_length];
            let mut scratch = category.clone();
            scratch.update_age_length_matrix(
                age_length,
                selectivity,
                &core.length_bins,
                core.length_plus,
                year,
                time_step,
            )?;
            matrices.push(scratch.age_length_matrix);
        }

        for (bin, &release) in releases.iter().enumerate() {
            if release == 0.0 {
                continue;
            }

            // selected stock available in this bin across all sources
            let stock_by_pair: Vec<f64> = matrices
                .iter()
                .map(|matrix| matrix.iter().map(|row| row[bin]).sum::<f64>())
                .collect();
            let total_stock: f64 = stock_by_pair.iter().sum();
            if total_stock <= 0.0 {
                continue;
            }

            for pair in 0..self.from.len() {
                let available = stock_by_pair[pair];
                if available <= 0.0 {
                    continue;
                }
                let mut current = release * (available / total_stock);
                let exploitation = current / available.max(ZERO_FUN_DELTA);
                if exploitation > self.u_max {
                    current = available * self.u_max;
                    debug!(
                        "tagging exploitation ({}) exceeded u_max ({}) in length bin {} of year {}",
                        exploitation, self.u_max, bin, year
                    );
                    if let Some(penalty_index) = self.penalty_index {
                        let event =
                            core.penalties[penalty_index].trigger(label, release, current);
                        core.penalty_log.push(event);
                    }
                }
                if current <= 0.0 {
                    continue;
                }

                // distribute the removal across ages by the bin's
                // age composition
                let from_index = self.from.index(pair);
                let to_index = self.to.index(pair);
                let min_age = core.partition.get(from_index).min_age;
                let spread = core.partition.get(from_index).data.len();
                for offset in 0..spread {
                    let share = matrices[pair][offset][bin] / available;
                    if share <= 0.0 {
                        continue;
                    }
                    let age = min_age + offset as u32;
                    let moved = current * share;
                    let initial_mortality_selectivity = self
                        .initial_mortality_selectivity_index
                        .map(|index| core.selectivities[index].value_at(age))
                        .unwrap_or(1.0);
                    let survived =
                        moved * (1.0 - self.initial_mortality * initial_mortality_selectivity);

                    core.partition.get_mut(from_index).data[offset] -= moved;
                    core.partition.get_mut(to_index).data[offset] += survived;
                }
            }
        }
        Ok(())
    }

    /// Move `loss_rate * sel(age) * n[to]` back into the source pool
    fn apply_tag_loss(&self, core: &mut ModelCore) {
        for pair in 0..self.from.len() {
            let loss_rate = self.loss_rate[pair];
            if loss_rate == 0.0 {
                continue;
            }
            let from_index = self.from.index(pair);
            let to_index = self.to.index(pair);
            let spread = core.partition.get(to_index).data.len();
            for offset in 0..spread {
                let age = core.partition.get(to_index).min_age + offset as u32;
                let mut amount = core.partition.get(to_index).data[offset] * loss_rate;
                if let Some(selectivity_index) = self.loss_rate_selectivities[pair] {
                    amount *= core.selectivities[selectivity_index].value_at(age);
                }
                core.partition.get_mut(to_index).data[offset] -= amount;
                core.partition.get_mut(from_index).data[offset] += amount;
            }
        }
    }

    pub fn addressable(&self, name: &str, _key: &AddressKey) -> Option<f64> {
        match name {
            "u_max" => Some(self.u_max),
            "initial_mortality" => Some(self.initial_mortality),
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, _key: &AddressKey, value: f64) -> bool {
        match name {
            "u_max" => self.u_max = value,
            "initial_mortality" => self.initial_mortality = value,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{Category, Partition};
    use crate::selectivity::{Selectivity, SelectivityKind};

    fn build_core() -> crate::model::ModelCore {
        let mut immature_male = Category::new("immature.male", 1, 10, 0);
        let mut immature_female = Category::new("immature.female", 1, 10, 0);
        immature_male.data = vec![10_000.0; 10];
        immature_female.data = vec![10_000.0; 10];
        let partition = Partition::new(vec![
            immature_male,
            immature_female,
            Category::new("mature.male", 1, 10, 0),
            Category::new("mature.female", 1, 10, 0),
        ])
        .unwrap();
        let mut core = crate::test_support::core_with_partition(partition);
        core.selectivities = vec![
            Selectivity::new("MaleTag", SelectivityKind::Constant { c: 0.25 }),
            Selectivity::new("FemaleTag", SelectivityKind::Constant { c: 0.4 }),
        ];
        core.state.current_year = 2008;
        core
    }

    fn tag_process() -> TagByAge {
        let mut numbers = BTreeMap::new();
        numbers.insert(2008, vec![1000.0, 2000.0, 3000.0, 4000.0]);
        TagByAge::new(
            vec!["immature.male".to_string(), "immature.female".to_string()],
            vec!["mature.male".to_string(), "mature.female".to_string()],
            3,
            6,
            vec![2008],
            numbers,
            vec!["MaleTag".to_string(), "FemaleTag".to_string()],
            vec![0.0],
        )
    }

    #[test]
    fn test_releases_split_by_selected_stock() {
        let mut core = build_core();
        let mut tag = tag_process();
        let mut sink = DiagnosticSink::new();
        tag.validate("process[Tagging]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        tag.build(&ctx).unwrap();
        drop(ctx);

        tag.execute("Tagging", &mut core).unwrap();

        // male share = 0.25 / (0.25 + 0.4) of each release
        let expected_male = [384.615_384_6, 769.230_769_2, 1_153.846_153_8, 2_000.0 * 10.0 / 13.0];
        let mature_male = &core.partition.category("mature.male").unwrap().data;
        for (i, expected) in expected_male.iter().enumerate() {
            let offset = (3 - 1) + i; // ages 3..6 with min age 1
            assert!(
                (mature_male[offset] - expected).abs() < 1e-6,
                "age {} got {} expected {}",
                3 + i,
                mature_male[offset],
                expected
            );
        }

        // source pool lost exactly what was moved (no initial mortality)
        let immature_male = &core.partition.category("immature.male").unwrap().data;
        assert!((immature_male[2] - (10_000.0 - 384.615_384_6)).abs() < 1e-6);
    }

    #[test]
    fn test_initial_mortality_thins_arrivals() {
        let mut core = build_core();
        let mut tag = tag_process();
        tag.initial_mortality = 0.1;
        let mut sink = DiagnosticSink::new();
        tag.validate("process[Tagging]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        tag.build(&ctx).unwrap();
        drop(ctx);

        tag.execute("Tagging", &mut core).unwrap();

        let mature_male = &core.partition.category("mature.male").unwrap().data;
        assert!((mature_male[2] - 384.615_384_6 * 0.9).abs() < 1e-6);
        // the source still loses the full exploited amount
        let immature_male = &core.partition.category("immature.male").unwrap().data;
        assert!((immature_male[2] - (10_000.0 - 384.615_384_6)).abs() < 1e-6);
    }

    #[test]
    fn test_tag_loss_returns_fish_to_source() {
        let mut core = build_core();
        let mut tag = tag_process();
        tag.loss_rate = vec![0.2, 0.2];
        let ctx = crate::test_support::build_context(&core);
        tag.build(&ctx).unwrap();
        drop(ctx);

        tag.execute("Tagging", &mut core).unwrap();
        let tagged_after_release = core.partition.category("mature.male").unwrap().data[2];

        // the following year only loss applies
        core.state.current_year = 2009;
        tag.execute("Tagging", &mut core).unwrap();
        let tagged_after_loss = core.partition.category("mature.male").unwrap().data[2];
        assert!((tagged_after_loss - tagged_after_release * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_tag_by_length_distributes_by_bin_composition() {
        use crate::age_length::{AgeLength, Distribution, GrowthCurve};
        use crate::length_weight::LengthWeight;

        let mut wild = Category::new("wild", 1, 3, 0);
        wild.data = vec![100.0, 100.0, 100.0];
        let partition =
            Partition::new(vec![wild, Category::new("tagged", 1, 3, 0)]).unwrap();
        let mut core = crate::test_support::core_with_partition(partition);
        core.selectivities = vec![Selectivity::new("One", SelectivityKind::Constant { c: 1.0 })];
        core.length_bins = vec![0.0, 75.0, 200.0];
        core.length_plus = false;
        let mut age_length = AgeLength::new(
            "Fast",
            GrowthCurve::VonBertalanffy {
                linf: 100.0,
                k: 1.0,
                t0: 0.0,
            },
            Distribution::Normal,
            0.05,
            None,
            "Basic",
        );
        age_length.build(&[2008], 1, 1, 3);
        core.age_lengths = vec![age_length];
        core.length_weights = vec![LengthWeight::none("Basic")];
        core.state.current_year = 2008;

        let mut numbers = BTreeMap::new();
        // 10 releases below 75, 30 above
        numbers.insert(2008, vec![10.0, 30.0]);
        let mut tag = TagByLength::new(
            vec!["wild".to_string()],
            vec!["tagged".to_string()],
            vec![2008],
            numbers,
            vec!["One".to_string()],
            vec![0.0],
        );
        let mut sink = DiagnosticSink::new();
        tag.validate("process[TaggingByLength]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        tag.build(&ctx).unwrap();
        drop(ctx);

        tag.execute("TaggingByLength", &mut core).unwrap();

        let tagged = &core.partition.category("tagged").unwrap().data;
        let wild = &core.partition.category("wild").unwrap().data;

        // every release arrived, and numbers are conserved
        let tagged_total: f64 = tagged.iter().sum();
        assert!((tagged_total - 40.0).abs() < 1e-9, "tagged total {}", tagged_total);
        let grand_total: f64 = tagged.iter().chain(wild.iter()).sum();
        assert!((grand_total - 300.0).abs() < 1e-9);

        // the small-length bin is dominated by age 1 fish
        assert!((tagged[0] - 10.0).abs() < 0.5, "age 1 tagged {}", tagged[0]);
        // the large bin splits between ages 2 and 3
        assert!(tagged[1] > 10.0 && tagged[2] > 10.0);
    }

    #[test]
    fn test_u_max_caps_release() {
        let mut core = build_core();
        // tiny source pool: releasing 1000 fish is impossible
        core.partition.category_mut("immature.male").unwrap().data = vec![100.0; 10];
        core.partition.category_mut("immature.female").unwrap().data = vec![100.0; 10];
        let mut tag = tag_process();
        tag.u_max = 0.5;
        let mut sink = DiagnosticSink::new();
        tag.validate("process[Tagging]", &mut sink);
        assert!(sink.is_empty());
        let ctx = crate::test_support::build_context(&core);
        tag.build(&ctx).unwrap();
        drop(ctx);

        tag.execute("Tagging", &mut core).unwrap();

        // at most u_max of the selected stock moves
        let immature_male = &core.partition.category("immature.male").unwrap().data;
        assert!(immature_male[2] >= 100.0 - 100.0 * 0.25 * 0.5 - 1e-9);
    }
}
