//! End-to-end churn analysis: load, split, prep, fit, evaluate.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    artifacts::ModelBundle,
    classifier::{FitReport, LogisticRegression, Term},
    config::AnalysisConfig,
    dataloader::{load_csv, LoadReport},
    error::Result,
    evaluator::{evaluate, ConfusionMatrix, Evaluation, Metrics},
    frame::Dataset,
    recipe::{Recipe, Step},
    splitter::{stratified_split, SplitSummary},
    telemetry::AnalysisTelemetry,
};

/// Results of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Run identifier.
    pub run_id: String,
    /// Start of the run.
    pub started_at: DateTime<Utc>,
    /// Row accounting of the load, absent for in-memory datasets.
    pub load: Option<LoadReport>,
    /// Split seed.
    pub seed: u64,
    /// Split ratio.
    pub train_ratio: f64,
    /// Split sizes and class balance.
    pub split: SplitSummary,
    /// Design columns produced by the recipe.
    pub design_columns: Vec<String>,
    /// Fit diagnostics.
    pub fit: FitReport,
    /// Coefficient table, intercept first.
    pub terms: Vec<Term>,
    /// Classification threshold.
    pub threshold: f64,
    /// Test-set tallies.
    pub confusion: ConfusionMatrix,
    /// Test-set rates.
    pub metrics: Metrics,
    /// Metrics that are undefined on this test set.
    pub undefined_metrics: Vec<&'static str>,
}

impl AnalysisReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[CHURN] run={} train={} test={} accuracy={:.4} sensitivity={:.4} specificity={:.4}",
            self.run_id,
            self.split.train_rows,
            self.split.test_rows,
            self.metrics.accuracy,
            self.metrics.sensitivity,
            self.metrics.specificity
        )
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    /// Report of the run.
    pub report: AnalysisReport,
    /// Test-set predictions.
    pub evaluation: Evaluation,
    /// Persistable recipe and model.
    pub bundle: ModelBundle,
}

/// Runs the analysis stages in order with optional telemetry.
#[derive(Debug, Clone)]
pub struct ChurnAnalysis {
    config: AnalysisConfig,
    telemetry: Option<AnalysisTelemetry>,
}

impl ChurnAnalysis {
    /// Creates an analysis for `config`.
    #[must_use]
    pub const fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: AnalysisTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Loads `path` with the configured schema and runs every stage.
    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<AnalysisRun> {
        let path = path.as_ref();
        let stage = self.stage("churn.load", json!({ "path": path.display().to_string() }));
        let (dataset, load) = stage.finish(load_csv(path, &self.config.schema))?;
        self.log(
            LogLevel::Info,
            "churn.load.completed",
            json!({
                "rows_read": load.rows_read,
                "rows_kept": load.rows_kept,
                "dropped_missing_outcome": load.dropped_missing_outcome,
                "dropped_incomplete": load.dropped_incomplete,
            }),
        );
        if load.rows_kept < load.rows_read {
            self.log(
                LogLevel::Warn,
                "churn.load.rows_dropped",
                json!({ "dropped": load.rows_read - load.rows_kept }),
            );
        }
        self.run(&dataset, Some(load))
    }

    /// Runs every stage after loading on an in-memory dataset.
    pub fn run_dataset(&self, dataset: &Dataset) -> Result<AnalysisRun> {
        self.run(dataset, None)
    }

    fn run(&self, dataset: &Dataset, load: Option<LoadReport>) -> Result<AnalysisRun> {
        let config = &self.config;
        let started_at = Utc::now();
        let run_id = self
            .telemetry
            .as_ref()
            .and_then(AnalysisTelemetry::run_id)
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
        self.stage("churn.config", json!({})).finish(config.validate())?;

        let split = self
            .stage(
                "churn.split",
                json!({ "rows": dataset.len(), "ratio": config.train_ratio, "seed": config.seed }),
            )
            .finish(stratified_split(dataset, config.train_ratio, config.seed))?;
        let split_summary = split.summary(dataset);
        self.log(
            LogLevel::Info,
            "churn.split.completed",
            json!({
                "train_rows": split_summary.train_rows,
                "test_rows": split_summary.test_rows,
                "positive_share": split_summary.positive_share,
                "train_positive_share": split_summary.train_positive_share,
                "test_positive_share": split_summary.test_positive_share,
            }),
        );
        let train = split.training(dataset);
        let test = split.testing(dataset);

        let mut recipe = Recipe::new().unseen_levels(config.unseen_levels);
        if !config.dummy_columns.is_empty() {
            recipe = recipe.step_dummy(config.dummy_columns.iter().cloned());
        }
        if !config.normalize_columns.is_empty() {
            recipe = recipe.step_normalize(config.normalize_columns.iter().cloned());
        }
        let fitted_recipe = self
            .stage(
                "churn.recipe",
                json!({ "steps": recipe.steps().iter().map(Step::columns).collect::<Vec<_>>() }),
            )
            .finish(recipe.prep(&train.features))?;
        let design = self
            .stage("churn.recipe.bake", json!({ "rows": train.len() }))
            .finish(fitted_recipe.bake(&train.features))?;
        self.log(
            LogLevel::Info,
            "churn.recipe.completed",
            json!({
                "design_columns": fitted_recipe.output_columns(),
                "learned": fitted_recipe.steps(),
                "unseen_levels": fitted_recipe.unseen_levels(),
            }),
        );

        let model = self
            .stage(
                "churn.fit",
                json!({
                    "rows": design.nrows(),
                    "columns": design.ncols(),
                    "max_iterations": config.max_iterations,
                    "tolerance": config.tolerance,
                }),
            )
            .finish(
                LogisticRegression::new()
                    .max_iterations(config.max_iterations)
                    .tolerance(config.tolerance)
                    .fit(&design, &train.outcome),
            )?;
        let fit = model.report().clone();
        self.log(
            LogLevel::Info,
            "churn.fit.completed",
            json!({
                "score_norm": fit.score_norm,
                "deviance": fit.deviance,
                "null_deviance": fit.null_deviance,
                "aic": fit.aic,
                "intercept": model.intercept(),
                "coefficients": model
                    .columns()
                    .iter()
                    .zip(model.coefficients())
                    .collect::<Vec<_>>(),
            }),
        );

        let evaluation = self
            .stage(
                "churn.evaluate",
                json!({ "rows": test.len(), "threshold": config.threshold }),
            )
            .finish(evaluate(&model, &fitted_recipe, &test, config.threshold))?;
        let undefined_metrics = evaluation.undefined_metrics();
        for metric in &undefined_metrics {
            self.log(
                LogLevel::Warn,
                "churn.evaluate.undefined_metric",
                json!({ "metric": metric }),
            );
        }
        self.log(
            LogLevel::Info,
            "churn.evaluate.completed",
            json!({
                "tp": evaluation.matrix.tp,
                "fp": evaluation.matrix.fp,
                "fn": evaluation.matrix.fn_,
                "tn": evaluation.matrix.tn,
                "accuracy": evaluation.metrics.accuracy,
                "sensitivity": evaluation.metrics.sensitivity,
                "specificity": evaluation.metrics.specificity,
            }),
        );

        let report = AnalysisReport {
            run_id: run_id.clone(),
            started_at,
            load,
            seed: config.seed,
            train_ratio: config.train_ratio,
            split: split_summary,
            design_columns: fitted_recipe.output_columns().to_vec(),
            fit,
            terms: model.terms().to_vec(),
            threshold: config.threshold,
            confusion: evaluation.matrix,
            metrics: evaluation.metrics,
            undefined_metrics,
        };
        let bundle = ModelBundle {
            run_id,
            created_at: Utc::now(),
            schema: config.schema.clone(),
            fitted_recipe,
            model,
            threshold: config.threshold,
        };
        Ok(AnalysisRun {
            report,
            evaluation,
            bundle,
        })
    }

    fn stage(&self, name: &'static str, metadata: serde_json::Value) -> Stage<'_> {
        self.log(LogLevel::Debug, &format!("{name}.started"), metadata);
        Stage {
            analysis: self,
            name,
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        log(self.telemetry.as_ref(), level, message, metadata);
    }
}

/// A running stage; logs `<name>.failed` when its result is an error.
struct Stage<'a> {
    analysis: &'a ChurnAnalysis,
    name: &'static str,
}

impl Stage<'_> {
    fn finish<T>(self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.analysis.log(
                LogLevel::Error,
                &format!("{}.failed", self.name),
                json!({ "error": err.to_string() }),
            );
        }
        result
    }
}

fn log(
    telemetry: Option<&AnalysisTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: serde_json::Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataloader::synthetic_customers, error::ChurnError, frame::Class};
    use shared_logging::MemorySink;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn telemetry(sink: &Arc<MemorySink>) -> AnalysisTelemetry {
        AnalysisTelemetry::builder("churn")
            .run_id("run-test")
            .sink(sink.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn runs_end_to_end_and_logs_each_stage() {
        let sink = Arc::new(MemorySink::new());
        let dataset = synthetic_customers(2500, 17).unwrap();
        let run = ChurnAnalysis::new(AnalysisConfig::default())
            .with_telemetry(telemetry(&sink))
            .run_dataset(&dataset)
            .unwrap();

        let report = &run.report;
        assert_eq!(report.run_id, "run-test");
        assert_eq!(report.split.train_rows + report.split.test_rows, 2500);
        assert_eq!(report.confusion.total(), report.split.test_rows);
        assert_eq!(report.terms[0].name, "(Intercept)");
        assert_eq!(
            report.design_columns,
            vec!["gender_Male", "is_senior_citizen_No", "tenure_months", "monthly_charges"]
        );
        assert!(report.metrics.accuracy > 0.5);
        assert!(report.summary().starts_with("[CHURN] run=run-test"));
        assert_eq!(run.bundle.model.columns(), report.design_columns.as_slice());

        let messages = sink.messages();
        for expected in [
            "churn.split.completed",
            "churn.recipe.completed",
            "churn.fit.completed",
            "churn.evaluate.completed",
        ] {
            assert!(messages.iter().any(|m| m == expected), "missing {expected}");
        }
    }

    #[test]
    fn runs_from_csv_and_reports_dropped_rows() {
        let dataset = synthetic_customers(400, 2).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("telco.csv");
        let mut csv = String::from("customerID,gender,SeniorCitizen,tenure,MonthlyCharges,Churn\n");
        let gender = dataset.features.categorical("gender").unwrap();
        let senior = dataset.features.categorical("is_senior_citizen").unwrap();
        let tenure = dataset.features.numeric("tenure_months").unwrap();
        let charges = dataset.features.numeric("monthly_charges").unwrap();
        for row in 0..dataset.len() {
            let churn = match dataset.outcome.values[row] {
                Class::Positive => "Yes",
                Class::Negative => "No",
            };
            csv.push_str(&format!(
                "c{row},{},{},{},{},{churn}\n",
                gender.value(row),
                u8::from(senior.value(row) == "Yes"),
                tenure[row],
                charges[row]
            ));
        }
        csv.push_str("c-missing,Male,0,5,50.0,\n");
        std::fs::write(&path, csv).unwrap();

        let sink = Arc::new(MemorySink::new());
        let run = ChurnAnalysis::new(AnalysisConfig::default())
            .with_telemetry(telemetry(&sink))
            .run_path(&path)
            .unwrap();
        let load = run.report.load.as_ref().unwrap();
        assert_eq!(load.rows_read, 401);
        assert_eq!(load.dropped_missing_outcome, 1);
        assert!(sink.messages().iter().any(|m| m == "churn.load.rows_dropped"));
    }

    #[test]
    fn failed_stage_is_logged_and_aborts() {
        let sink = Arc::new(MemorySink::new());
        let dataset = synthetic_customers(50, 1).unwrap();
        let negatives: Vec<usize> = (0..dataset.len())
            .filter(|&row| dataset.outcome.values[row] == Class::Negative)
            .collect();
        let single_class = dataset.take(&negatives);
        let err = ChurnAnalysis::new(AnalysisConfig::default())
            .with_telemetry(telemetry(&sink))
            .run_dataset(&single_class)
            .unwrap_err();
        assert!(matches!(err, ChurnError::DegenerateResponse { .. }));
        assert!(sink.messages().iter().any(|m| m == "churn.fit.failed"));
        assert!(!sink.messages().iter().any(|m| m == "churn.evaluate.started"));
    }
}
