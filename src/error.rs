//! Error taxonomy for model construction and execution
//!
//! Configuration problems are collected during validate/build and reported
//! as one batch. Numerical problems abort the run. Everything else is
//! status data, not an error.

use thiserror::Error;

/// A single configuration diagnostic tied to the block that produced it.
#[derive(Debug, Clone)]
pub struct ConfigDiagnostic {
    /// Block kind and label, e.g. `process[Recruitment]`
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Top-level error type for the engine
#[derive(Debug, Error)]
pub enum ModelError {
    /// One or more configuration problems found during validate/build
    #[error("configuration errors:\n{}", format_diagnostics(.0))]
    Config(Vec<ConfigDiagnostic>),

    /// A direct write to an estimate outside its bounds
    #[error("value {value} for {parameter} is outside bounds [{lower}, {upper}]")]
    Bounds {
        parameter: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    /// A numerical failure that invalidates the model state
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Lookup of an addressable or labelled entity that does not exist
    #[error("unknown {kind} '{label}'")]
    UnknownLabel { kind: &'static str, label: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_diagnostics(diagnostics: &[ConfigDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("  - {}", d))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accumulator for configuration diagnostics so that validate/build can
/// report every problem at once instead of failing on the first.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<ConfigDiagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(ConfigDiagnostic {
            location: location.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Consume the sink, returning `Ok(())` if no diagnostics were recorded.
    pub fn finish(self) -> Result<(), ModelError> {
        if self.diagnostics.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Config(self.diagnostics))
        }
    }
}
