//! Ageing: shift every cohort up one age class

use crate::error::{DiagnosticSink, ModelError};
use crate::model::ModelCore;
use crate::partition::CategoryAccessor;

use super::ProcessBuildContext;

/// Moves the numbers vector of each declared category up by one age index.
/// With a plus group the oldest class accumulates instead of falling off.
#[derive(Debug, Clone)]
pub struct Ageing {
    pub category_labels: Vec<String>,
    accessor: CategoryAccessor,
}

impl Ageing {
    pub fn new(category_labels: Vec<String>) -> Self {
        Self {
            category_labels,
            accessor: CategoryAccessor::default(),
        }
    }

    pub fn validate(&self, location: &str, sink: &mut DiagnosticSink) {
        if self.category_labels.is_empty() {
            sink.error(location, "at least one category must be supplied");
        }
    }

    pub fn build(&mut self, ctx: &ProcessBuildContext) -> Result<(), ModelError> {
        self.accessor = CategoryAccessor::init(&ctx.core.partition, &self.category_labels)?;
        Ok(())
    }

    pub fn execute(&mut self, core: &mut ModelCore) -> Result<(), ModelError> {
        let age_plus = core.age_plus;
        for i in 0..self.accessor.len() {
            let category = core.partition.get_mut(self.accessor.index(i));
            let data = &mut category.data;
            let last = data.len() - 1;
            let carry = data[last];
            for offset in (1..=last).rev() {
                data[offset] = data[offset - 1];
            }
            data[0] = 0.0;
            if age_plus {
                data[last] += carry;
            }
        }
        Ok(())
    }
}
