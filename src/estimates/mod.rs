//! Estimable parameters
//!
//! An estimate wires an addressable model quantity to the estimation
//! runtime: bounds, an optional prior, a transformation for the search
//! space, an estimation phase, and `same` links that replicate the master
//! value on every write.

pub mod addressable;
mod prior;
mod transformation;

pub use prior::Prior;
pub use transformation::Transformation;

use crate::error::{DiagnosticSink, ModelError};

use addressable::{parse_path, AddressTarget};

#[derive(Debug, Clone)]
pub struct Estimate {
    pub label: String,
    /// Addressable path of the controlled value
    pub parameter: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub prior: Option<Prior>,
    pub transformation: Transformation,
    pub estimation_phase: u32,
    /// Addressable paths forced to share this estimate's value
    pub sames: Vec<String>,
    /// Hold this estimate fixed during MCMC
    pub mcmc_fixed: bool,

    target: Option<AddressTarget>,
    same_targets: Vec<AddressTarget>,
}

impl Estimate {
    pub fn new(
        label: impl Into<String>,
        parameter: impl Into<String>,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Self {
        Self {
            label: label.into(),
            parameter: parameter.into(),
            lower_bound,
            upper_bound,
            prior: None,
            transformation: Transformation::Identity,
            estimation_phase: 1,
            sames: Vec::new(),
            mcmc_fixed: false,
            target: None,
            same_targets: Vec::new(),
        }
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = transformation;
        self
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        let location = format!("estimate[{}]", self.label);
        if self.lower_bound > self.upper_bound {
            sink.error(
                &location,
                format!(
                    "lower_bound ({}) cannot be greater than upper_bound ({})",
                    self.lower_bound, self.upper_bound
                ),
            );
        }
        let mut seen = std::collections::HashSet::new();
        for same in &self.sames {
            if !seen.insert(same.clone()) {
                sink.error(&location, format!("same parameter '{}' is a duplicate", same));
            }
        }
        if let Some(prior) = &self.prior {
            prior.validate(&format!("{}.prior", location), sink);
        }
    }

    /// Parse the master path and every same into targets
    pub fn parse_targets(&mut self) -> Result<(), ModelError> {
        self.target = Some(parse_path(&self.parameter)?);
        self.same_targets = self
            .sames
            .iter()
            .map(|same| parse_path(same))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    pub fn target(&self) -> &AddressTarget {
        self.target
            .as_ref()
            .expect("estimate targets are parsed during model build")
    }

    pub fn same_targets(&self) -> &[AddressTarget] {
        &self.same_targets
    }

    /// Is this estimate active in the given estimation phase?
    pub fn enabled_in_phase(&self, phase: u32) -> bool {
        self.estimation_phase <= phase
    }

    /// An estimate pinned by equal bounds never reaches the minimiser
    pub fn is_fixed(&self) -> bool {
        self.lower_bound == self.upper_bound
    }

    /// Prior contribution at a natural-scale value
    pub fn prior_score(&self, value: f64) -> f64 {
        self.prior.as_ref().map(|p| p.score(value)).unwrap_or(0.0)
    }

    /// Natural scale -> search scale
    pub fn transform(&self, value: f64) -> f64 {
        self.transformation
            .transform(value, self.lower_bound, self.upper_bound)
    }

    /// Search scale -> natural scale, clamped back into bounds
    pub fn untransform(&self, value: f64) -> f64 {
        self.transformation
            .untransform(value, self.lower_bound, self.upper_bound)
            .clamp(self.lower_bound, self.upper_bound)
    }

    /// Bounds in the search space
    pub fn transformed_bounds(&self) -> (f64, f64) {
        self.transformation
            .transformed_bounds(self.lower_bound, self.upper_bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        let mut estimate = Estimate::new("r0", "process[Recruitment].r0", 1e3, 1e8);
        estimate.sames = vec!["process[RecruitmentTwo].r0".to_string()];
        estimate.parse_targets().unwrap();
        assert_eq!(estimate.target().parameter, "r0");
        assert_eq!(estimate.same_targets().len(), 1);
    }

    #[test]
    fn test_validate_duplicate_sames() {
        let mut estimate = Estimate::new("r0", "process[Recruitment].r0", 1e3, 1e8);
        estimate.sames = vec![
            "process[Two].r0".to_string(),
            "process[Two].r0".to_string(),
        ];
        let mut sink = DiagnosticSink::new();
        estimate.validate(&mut sink);
        assert!(!sink.is_empty());
    }

    #[test]
    fn test_transform_roundtrip_in_bounds() {
        let estimate = Estimate::new("r0", "process[Recruitment].r0", 100.0, 1000.0)
            .with_transformation(Transformation::Log);
        let natural = 400.0;
        let transformed = estimate.transform(natural);
        assert!((estimate.untransform(transformed) - natural).abs() < 1e-9);
    }

    #[test]
    fn test_untransform_clamps_to_bounds() {
        let estimate = Estimate::new("h", "process[Recruitment].steepness", 0.2, 1.0);
        assert_eq!(estimate.untransform(5.0), 1.0);
        assert_eq!(estimate.untransform(-5.0), 0.2);
    }

    #[test]
    fn test_phase_enablement() {
        let mut estimate = Estimate::new("q", "catchability[Survey].q", 1e-8, 1.0);
        estimate.estimation_phase = 2;
        assert!(!estimate.enabled_in_phase(1));
        assert!(estimate.enabled_in_phase(2));
        assert!(estimate.enabled_in_phase(3));
    }
}
