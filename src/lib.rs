//! QMRA-MC - Monte Carlo quantitative microbial risk assessment
//!
//! Samples uncertain exposure inputs, maps pathogen dose to infection
//! probability through a family of dose-response models, reduces the output
//! to summary statistics, and classifies batches of scenarios against an
//! annual-risk compliance threshold.

pub mod batch;
pub mod config;
pub mod distributions;
pub mod dose_response;
pub mod io;
pub mod monte_carlo;
pub mod pathogens;
pub mod scenario;
pub mod special;
pub mod statistics;

use thiserror::Error;

// Re-export main types
pub use batch::{annual_risk, BatchOutcome, BatchScenarioRunner, BatchSummary, ScenarioFailure};
pub use config::{BatchConfig, DilutionMode, SeedPolicy};
pub use distributions::{DistributionDescriptor, DistributionKind, EmpiricalCdf, HockeyStick};
pub use dose_response::{DoseResponseModel, ModelKind};
pub use monte_carlo::{MonteCarloSimulator, RiskModel, SampledInputs, SimulationResult};
pub use pathogens::{DoseResponseParameters, PathogenParameterStore, PathogenRecord};
pub use scenario::{
    Compliance, ConcentrationSource, ConcentrationTable, DilutionTable, OutcomeSummary,
    ScenarioRecord, ScenarioResult,
};
pub use statistics::SummaryStatistics;

/// Error type returned by a user-supplied risk function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum QmraError {
    #[error("invalid parameters for {context}: {reason}")]
    InvalidParameters { context: String, reason: String },
    #[error("unsupported distribution kind: {0}")]
    UnsupportedDistribution(String),
    #[error("unsupported dose-response model: {0}")]
    UnsupportedModel(String),
    #[error("model '{model}' failed to evaluate: {source}")]
    ModelEvaluationFailure {
        model: String,
        #[source]
        source: BoxError,
    },
    #[error("scenario '{scenario_id}' could not be resolved: {reason}")]
    ScenarioResolution { scenario_id: String, reason: String },
    #[error("simulation output for '{variable}' contains no finite values")]
    NumericDegeneracy { variable: String },
    #[error("unknown pathogen: {0}")]
    UnknownPathogen(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl QmraError {
    pub(crate) fn invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        QmraError::InvalidParameters {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QmraError>;
