//! ChurnForge: telecom customer churn prediction
//!
//! A four-stage batch pipeline (clean, encode, train, evaluate) over the
//! telecom customer table, plus a small form server that scores one customer
//! with the saved model.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod features;
pub mod form;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod server;
pub mod table;
pub mod train;
pub mod viz;

// Re-export public items for easier access
pub use artifact::ModelArtifact;
pub use cli::{Args, FormArgs, Stage};
pub use config::PipelineConfig;
pub use data::{clean, CleanedTable};
pub use error::ChurnError;
pub use evaluate::{evaluate, evaluate_with, EvalConfig, EvalScope, Report};
pub use features::{build, EncodingSpec, FeatureSchema, FeatureTable};
pub use form::{FormInput, Predictor};
pub use model::{ForestParams, RandomForest};
pub use train::{train, train_with, ParamGrid, TrainConfig};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, ChurnError>;
