//! Age-length relationships and the age→length conversion machinery
//!
//! An `AgeLength` answers mean-length-at-age queries for each time step,
//! carries the CV grid used to spread an age cohort across length bins, and
//! owns the cumulative-normal routine that performs that spread. The model
//! holds these in a registry; categories refer to them by handle.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::error::DiagnosticSink;
use crate::length_weight::LengthWeight;

/// Distribution assumed for length at age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Normal,
    LogNormal,
}

/// Parametric or empirical growth curve
#[derive(Debug, Clone)]
pub enum GrowthCurve {
    /// von Bertalanffy: L = linf * (1 - exp(-k * (age - t0)))
    VonBertalanffy { linf: f64, k: f64, t0: f64 },

    /// Schnute general growth form between reference ages tau1 and tau2
    Schnute {
        y1: f64,
        y2: f64,
        tau1: f64,
        tau2: f64,
        a: f64,
        b: f64,
    },

    /// Externally supplied mean length at age by year. Years without a row
    /// fall back to the across-year mean.
    Data { lengths_by_year: BTreeMap<u32, Vec<f64>> },
}

#[derive(Debug, Clone)]
pub struct AgeLength {
    pub label: String,
    pub curve: GrowthCurve,
    pub distribution: Distribution,
    pub cv_first: f64,
    /// When absent, cv_first applies to every age class
    pub cv_last: Option<f64>,
    /// Interpolate CVs as a linear function of mean length rather than age
    pub by_length: bool,
    /// Use the less accurate legacy cumulative-normal equation
    pub casal_normal_cdf: bool,
    /// Fraction of the year added to the age in each time step when
    /// evaluating length
    pub time_step_proportions: Vec<f64>,
    /// Label of the length-weight curve, resolved to a handle at build
    pub length_weight_label: String,
    pub length_weight: usize,

    // built state
    min_age: u32,
    max_age: u32,
    /// CV grid: year -> [time_step][age offset]
    cvs: BTreeMap<u32, Vec<Vec<f64>>>,
    /// Across-year mean lengths for the Data curve
    default_lengths: Vec<f64>,
}

impl AgeLength {
    pub fn new(
        label: impl Into<String>,
        curve: GrowthCurve,
        distribution: Distribution,
        cv_first: f64,
        cv_last: Option<f64>,
        length_weight_label: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            curve,
            distribution,
            cv_first,
            cv_last,
            by_length: false,
            casal_normal_cdf: false,
            time_step_proportions: Vec::new(),
            length_weight_label: length_weight_label.into(),
            length_weight: 0,
            min_age: 0,
            max_age: 0,
            cvs: BTreeMap::new(),
            default_lengths: Vec::new(),
        }
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        let location = format!("age_length[{}]", self.label);
        if self.cv_first < 0.0 {
            sink.error(&location, format!("cv_first ({}) cannot be less than 0.0", self.cv_first));
        }
        if let Some(cv_last) = self.cv_last {
            if cv_last < 0.0 {
                sink.error(&location, format!("cv_last ({}) cannot be less than 0.0", cv_last));
            }
        }
        for p in &self.time_step_proportions {
            if *p < 0.0 || *p > 1.0 {
                sink.error(
                    &location,
                    format!("time_step_proportions value ({}) must be in the range 0.0-1.0", p),
                );
            }
        }
        if let GrowthCurve::VonBertalanffy { linf, k, .. } = &self.curve {
            if *linf <= 0.0 {
                sink.error(&location, format!("linf ({}) must be greater than 0.0", linf));
            }
            if *k <= 0.0 {
                sink.error(&location, format!("k ({}) must be greater than 0.0", k));
            }
        }
        if let GrowthCurve::Schnute { tau1, tau2, .. } = &self.curve {
            if tau2 <= tau1 {
                sink.error(&location, format!("tau2 ({}) must be greater than tau1 ({})", tau2, tau1));
            }
        }
    }

    /// Build the CV grid and empirical defaults over the model domain.
    /// Must be called again whenever cv_first/cv_last change (estimation).
    pub fn build(
        &mut self,
        years: &[u32],
        time_step_count: usize,
        min_age: u32,
        max_age: u32,
    ) {
        self.min_age = min_age;
        self.max_age = max_age;

        if self.time_step_proportions.is_empty() {
            self.time_step_proportions = vec![0.0; time_step_count];
        }

        if let GrowthCurve::Data { lengths_by_year } = &self.curve {
            let spread = (max_age - min_age + 1) as usize;
            let mut means = vec![0.0; spread];
            for row in lengths_by_year.values() {
                for (i, v) in row.iter().take(spread).enumerate() {
                    means[i] += v;
                }
            }
            let n = lengths_by_year.len().max(1) as f64;
            for v in &mut means {
                *v /= n;
            }
            self.default_lengths = means;
        }

        self.rebuild_cv(years, time_step_count);
    }

    /// Populate the CV grid by year, time step and age
    fn rebuild_cv(&mut self, years: &[u32], time_step_count: usize) {
        let min_age = self.min_age;
        let max_age = self.max_age;
        let spread = (max_age - min_age + 1) as usize;

        let mut cvs = BTreeMap::new();
        for &year in years {
            let mut by_step = Vec::with_capacity(time_step_count);
            for step in 0..time_step_count {
                let mut row = vec![0.0; spread];
                match self.cv_last {
                    // constant cv across all age classes
                    None => {
                        for value in &mut row {
                            *value = self.cv_first;
                        }
                    }
                    Some(cv_last) if self.by_length => {
                        let first = self.mean_length(year, step, min_age);
                        let last = self.mean_length(year, step, max_age);
                        let denominator = last - first;
                        for (i, value) in row.iter_mut().enumerate() {
                            let length = self.mean_length(year, step, min_age + i as u32);
                            *value = if denominator.abs() < f64::EPSILON {
                                self.cv_first
                            } else {
                                (length - first) * (cv_last - self.cv_first) / denominator
                                    + self.cv_first
                            };
                        }
                    }
                    Some(cv_last) => {
                        for (i, value) in row.iter_mut().enumerate() {
                            *value = self.cv_first
                                + (cv_last - self.cv_first) * i as f64 / (spread - 1).max(1) as f64;
                        }
                    }
                }
                by_step.push(row);
            }
            cvs.insert(year, by_step);
        }
        self.cvs = cvs;
    }

    /// Re-derive the CV grid after an estimated cv parameter changed
    pub fn reset(&mut self, years: &[u32], time_step_count: usize) {
        self.rebuild_cv(years, time_step_count);
    }

    /// Mean length at age for a time step, offset by the time step's
    /// proportion of the year
    pub fn mean_length(&self, year: u32, time_step: usize, age: u32) -> f64 {
        let proportion = self
            .time_step_proportions
            .get(time_step)
            .copied()
            .unwrap_or(0.0);
        match &self.curve {
            GrowthCurve::VonBertalanffy { linf, k, t0 } => {
                let age = age as f64 + proportion;
                let length = linf * (1.0 - (-k * (age - t0)).exp());
                length.max(0.0)
            }
            GrowthCurve::Schnute { y1, y2, tau1, tau2, a, b } => {
                let age = age as f64 + proportion;
                let temp = if a.abs() > f64::EPSILON {
                    (1.0 - (-a * (age - tau1)).exp()) / (1.0 - (-a * (tau2 - tau1)).exp())
                } else {
                    (age - tau1) / (tau2 - tau1)
                };
                if b.abs() > f64::EPSILON {
                    (y1.powf(*b) + (y2.powf(*b) - y1.powf(*b)) * temp).powf(1.0 / b)
                } else {
                    y1 * ((y2 / y1).ln() * temp).exp()
                }
            }
            GrowthCurve::Data { lengths_by_year } => {
                let row = lengths_by_year
                    .get(&year)
                    .map(|r| r.as_slice())
                    .unwrap_or(&self.default_lengths);
                let offset = (age.saturating_sub(self.min_age)) as usize;
                let current = row.get(offset).copied().unwrap_or(0.0);
                // linear interpolation towards the next age class by the
                // fraction of the year this time step represents
                let next = row.get(offset + 1).copied().unwrap_or(current);
                current + (next - current) * proportion
            }
        }
    }

    /// CV at (year, time_step, age). Years outside the built range use the
    /// last built year.
    pub fn cv(&self, year: u32, time_step: usize, age: u32) -> f64 {
        let by_step = match self.cvs.get(&year).or_else(|| self.cvs.values().next_back()) {
            Some(by_step) => by_step,
            None => return self.cv_first,
        };
        by_step
            .get(time_step)
            .and_then(|row| row.get((age.saturating_sub(self.min_age)) as usize))
            .copied()
            .unwrap_or(self.cv_first)
    }

    /// Mean weight at age, with the distribution correction applied to the
    /// allometric curve
    pub fn mean_weight(
        &self,
        year: u32,
        time_step: usize,
        age: u32,
        length_weight: &LengthWeight,
    ) -> f64 {
        let length = self.mean_length(year, time_step, age);
        let cv = self.cv(year, time_step, age);
        let b = length_weight.b;
        let correction = match self.distribution {
            Distribution::Normal => 1.0 + cv * cv * b * (b - 1.0) / 2.0,
            Distribution::LogNormal => (1.0 + cv * cv).powf(b * (b - 1.0) / 2.0),
        };
        length_weight.weight(length) * correction
    }

    /// Split an age cohort of unit size across length bins.
    ///
    /// `bins` holds the minimum edge of each bin; the result has
    /// `bins.len() - 1` entries, or `bins.len()` when the last bin is a plus
    /// group that absorbs everything above the final edge.
    pub fn distribution_across_bins(
        &self,
        mean: f64,
        cv: f64,
        bins: &[f64],
        plus_group: bool,
    ) -> Vec<f64> {
        let mut mu = mean;
        let mut sigma = cv * mean;
        let mut edges: Vec<f64> = bins.to_vec();

        if self.distribution == Distribution::LogNormal {
            // transform parameters into log space
            let cv_temp = sigma / mu;
            let log_var = (cv_temp * cv_temp + 1.0).ln();
            mu = mu.ln() - log_var / 2.0;
            sigma = log_var.sqrt();
            for edge in &mut edges {
                *edge = if *edge < 0.0001 { 0.0001_f64.ln() } else { edge.ln() };
            }
        }

        let size = if plus_group { edges.len() } else { edges.len() - 1 };
        let mut proportions = vec![0.0; size];
        let mut cumulative = vec![0.0; edges.len()];
        let mut sum = 0.0;

        for (j, edge) in edges.iter().enumerate() {
            let z = ((edge - mu) / sigma).abs();
            let mut upper_tail = if self.casal_normal_cdf {
                0.5 * (1.0 + 0.196854 * z + 0.115194 * z * z
                    + 0.000344 * z * z * z
                    + 0.019527 * z * z * z * z)
                    .powi(-4)
            } else {
                let tt = 1.0 / (1.0 + 0.2316419 * z);
                let norm = 1.0 / (2.0 * PI).sqrt() * (-0.5 * z * z).exp();
                let mut ttt = tt;
                let mut tmp = 0.319381530 * ttt;
                ttt *= tt;
                tmp -= 0.356563782 * ttt;
                ttt *= tt;
                tmp += 1.781477937 * ttt;
                ttt *= tt;
                tmp -= 1.821255978 * ttt;
                ttt *= tt;
                tmp += 1.330274429 * ttt;
                tmp * norm
            };
            upper_tail = 1.0 - upper_tail;
            cumulative[j] = if *edge < mu { 1.0 - upper_tail } else { upper_tail };

            if j > 0 {
                proportions[j - 1] = cumulative[j] - cumulative[j - 1];
                sum += proportions[j - 1];
            }
        }

        if plus_group {
            proportions[size - 1] = 1.0 - sum - cumulative[0];
        }
        proportions
    }

    pub fn addressable(&self, name: &str) -> Option<f64> {
        match name {
            "cv_first" => Some(self.cv_first),
            "cv_last" => self.cv_last,
            _ => None,
        }
    }

    pub fn set_addressable(&mut self, name: &str, value: f64) -> bool {
        match name {
            "cv_first" => self.cv_first = value,
            "cv_last" => self.cv_last = Some(value),
            _ => return false,
        }
        true
    }
}
