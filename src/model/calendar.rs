//! Model calendar: years, time steps and initialisation phases

use crate::error::DiagnosticSink;

/// One ordered time step within the annual cycle
#[derive(Debug, Clone)]
pub struct TimeStepDef {
    pub label: String,
    /// Labels of the processes executed in this step, in order
    pub process_labels: Vec<String>,
}

/// How an initialisation phase reaches its starting state
#[derive(Debug, Clone)]
pub enum InitialisationKind {
    /// Iterate the cycle to equilibrium with the plus-group shortcut
    Derived,
    /// Run the cycle a fixed number of times
    Cycles { cycles: u32 },
}

/// A process inserted into an initialisation phase's cycle
#[derive(Debug, Clone)]
pub struct ProcessInsertion {
    pub time_step: String,
    /// Insert before this process; append to the step when absent
    pub before: Option<String>,
    pub process: String,
}

#[derive(Debug, Clone)]
pub struct InitialisationPhase {
    pub label: String,
    pub kind: InitialisationKind,
    pub insert_processes: Vec<ProcessInsertion>,
    pub exclude_processes: Vec<String>,
    /// Run one extra annual cycle and restore the pre-cycle snapshot, to
    /// replicate legacy CASAL equilibrium evaluation
    pub casal_initialisation: bool,
}

impl InitialisationPhase {
    pub fn derived(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: InitialisationKind::Derived,
            insert_processes: Vec::new(),
            exclude_processes: Vec::new(),
            casal_initialisation: false,
        }
    }
}

/// Years and time-step structure of the model
#[derive(Debug, Clone)]
pub struct Calendar {
    pub start_year: u32,
    pub final_year: u32,
    pub projection_final_year: Option<u32>,
    pub time_steps: Vec<TimeStepDef>,
    pub initialisation_phases: Vec<InitialisationPhase>,
}

impl Calendar {
    /// Model years, start to final inclusive
    pub fn years(&self) -> Vec<u32> {
        (self.start_year..=self.final_year).collect()
    }

    /// Model years including projection years when configured
    pub fn all_years(&self) -> Vec<u32> {
        let last = self.projection_final_year.unwrap_or(self.final_year);
        (self.start_year..=last).collect()
    }

    pub fn year_count(&self) -> usize {
        (self.final_year - self.start_year + 1) as usize
    }

    pub fn time_step_index(&self, label: &str) -> Option<usize> {
        self.time_steps.iter().position(|step| step.label == label)
    }

    pub fn phase_index(&self, label: &str) -> Option<usize> {
        self.initialisation_phases
            .iter()
            .position(|phase| phase.label == label)
    }

    pub fn validate(&self, sink: &mut DiagnosticSink) {
        if self.final_year < self.start_year {
            sink.error(
                "model",
                format!(
                    "final_year ({}) cannot be less than start_year ({})",
                    self.final_year, self.start_year
                ),
            );
        }
        if let Some(projection_final) = self.projection_final_year {
            if projection_final <= self.final_year {
                sink.error(
                    "model",
                    format!(
                        "projection_final_year ({}) must be greater than final_year ({})",
                        projection_final, self.final_year
                    ),
                );
            }
        }
        if self.time_steps.is_empty() {
            sink.error("model", "at least one time step must be defined");
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.time_steps {
            if !seen.insert(step.label.clone()) {
                sink.error("model", format!("duplicate time step label '{}'", step.label));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> Calendar {
        Calendar {
            start_year: 1990,
            final_year: 1993,
            projection_final_year: Some(1996),
            time_steps: vec![
                TimeStepDef {
                    label: "Annual".into(),
                    process_labels: vec!["Ageing".into(), "Recruitment".into()],
                },
                TimeStepDef {
                    label: "Winter".into(),
                    process_labels: vec!["Mortality".into()],
                },
            ],
            initialisation_phases: vec![InitialisationPhase::derived("Equilibrium")],
        }
    }

    #[test]
    fn test_year_ranges() {
        let calendar = calendar();
        assert_eq!(calendar.years(), vec![1990, 1991, 1992, 1993]);
        assert_eq!(calendar.all_years().len(), 7);
        assert_eq!(calendar.year_count(), 4);
    }

    #[test]
    fn test_lookups() {
        let calendar = calendar();
        assert_eq!(calendar.time_step_index("Winter"), Some(1));
        assert_eq!(calendar.time_step_index("Summer"), None);
        assert_eq!(calendar.phase_index("Equilibrium"), Some(0));
    }

    #[test]
    fn test_validate_rejects_backwards_years() {
        let mut calendar = calendar();
        calendar.final_year = 1980;
        let mut sink = DiagnosticSink::new();
        calendar.validate(&mut sink);
        assert!(!sink.is_empty());
    }
}
