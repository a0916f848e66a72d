#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Churn analysis library: Telco CSV loading, stratified splitting, exploratory
//! summaries, fit-then-apply preprocessing, maximum-likelihood logistic
//! regression and confusion-matrix evaluation.

/// Error types shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Columnar data model: classes, factors, frames and datasets.
#[path = "../frame.rs"]
pub mod frame;

/// Input schema and run configuration.
#[path = "../config.rs"]
pub mod config;

/// CSV loading and synthetic data.
#[path = "../dataloader.rs"]
pub mod dataloader;

/// Seeded stratified train/test split.
#[path = "../splitter.rs"]
pub mod splitter;

/// Exploratory summaries.
#[path = "../explore.rs"]
pub mod explore;

/// Preprocessing recipes.
#[path = "../recipe/main.rs"]
pub mod recipe;

/// Logistic regression.
#[path = "../classifier/main.rs"]
pub mod classifier;

/// Confusion matrix and metrics.
#[path = "../evaluator.rs"]
pub mod evaluator;

/// Persisted recipe and model bundles.
#[path = "../artifacts.rs"]
pub mod artifacts;

/// Telemetry helpers for structured logging.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// End-to-end analysis orchestration.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use artifacts::ModelBundle;
pub use classifier::{FitReport, LogisticModel, LogisticRegression, Term};
pub use config::{AnalysisConfig, ColumnKind, ColumnSpec, OutcomeSpec, Schema};
pub use dataloader::{load_csv, load_unlabeled, synthetic_customers, LoadReport};
pub use error::{ChurnError, DegenerateReason, Result};
pub use evaluator::{evaluate, ConfusionMatrix, Evaluation, Metrics, PredictionRecord};
pub use explore::{explore, ExploreReport};
pub use frame::{BinaryLevels, Class, ColumnData, Dataset, Factor, Frame, Outcome};
pub use pipeline::{AnalysisReport, AnalysisRun, ChurnAnalysis};
pub use recipe::{DesignMatrix, FittedRecipe, Recipe, UnseenLevelPolicy};
pub use splitter::{stratified_split, Split, SplitSummary};
pub use telemetry::{AnalysisTelemetry, AnalysisTelemetryBuilder};
