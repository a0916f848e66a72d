use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    classifier::LogisticModel,
    config::Schema,
    error::{ChurnError, Result},
    dataloader::LoadReport,
    evaluator::{score_frame, PredictionRecord},
    frame::Frame,
    recipe::FittedRecipe,
};

/// A trained model packaged with the exact preprocessing it was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Run that produced the bundle.
    pub run_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Input layout for loading new data.
    pub schema: Schema,
    /// Recipe fitted on the training split.
    pub fitted_recipe: FittedRecipe,
    /// Fitted classifier.
    pub model: LogisticModel,
    /// Default classification threshold.
    pub threshold: f64,
}

impl ModelBundle {
    /// Writes the bundle as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Reads a bundle written by [`Self::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bundle: Self = serde_json::from_slice(&fs::read(path)?)?;
        if bundle.fitted_recipe.output_columns() != bundle.model.columns() {
            return Err(ChurnError::InvalidConfig(
                "bundle recipe and model disagree on design columns".into(),
            ));
        }
        if let Some(input) = bundle
            .fitted_recipe
            .inputs()
            .iter()
            .find(|input| !bundle.schema.predictor_names().any(|name| name == input.name))
        {
            return Err(ChurnError::InvalidConfig(format!(
                "bundle recipe expects column `{}` that its schema does not load",
                input.name
            )));
        }
        Ok(bundle)
    }

    /// Scores unlabeled rows; `threshold` overrides the stored one.
    pub fn score(&self, frame: &Frame, threshold: Option<f64>) -> Result<Vec<PredictionRecord>> {
        score_frame(
            &self.model,
            &self.fitted_recipe,
            frame,
            threshold.unwrap_or(self.threshold),
        )
    }

    /// Scores a frame from [`crate::dataloader::load_unlabeled`] and tags each
    /// prediction with its file row and customer id, so rows dropped on load
    /// do not shift later predictions onto the wrong customer.
    pub fn score_loaded(
        &self,
        frame: &Frame,
        report: &LoadReport,
        threshold: Option<f64>,
    ) -> Result<Vec<PredictionRecord>> {
        if report.source_rows.len() != frame.nrows() {
            return Err(ChurnError::InvalidConfig(format!(
                "load report covers {} rows, frame has {}",
                report.source_rows.len(),
                frame.nrows()
            )));
        }
        let mut records = self.score(frame, threshold)?;
        for record in &mut records {
            record.source_row = report.source_row(record.row);
            record.customer_id = report.customer_id(record.row).map(str::to_owned);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::LogisticRegression,
        dataloader::{load_unlabeled_reader, synthetic_customers},
        recipe::Recipe,
    };
    use std::io::Cursor;
    use tempfile::tempdir;

    fn trained_bundle() -> (ModelBundle, Frame) {
        let dataset = synthetic_customers(600, 11).unwrap();
        let recipe = Recipe::new()
            .step_dummy(["gender", "is_senior_citizen"])
            .prep(&dataset.features)
            .unwrap();
        let model = LogisticRegression::new()
            .fit(&recipe.bake(&dataset.features).unwrap(), &dataset.outcome)
            .unwrap();
        let bundle = ModelBundle {
            run_id: "run-1".into(),
            created_at: Utc::now(),
            schema: Schema::telco(),
            fitted_recipe: recipe,
            model,
            threshold: 0.5,
        };
        (bundle, dataset.features)
    }

    #[test]
    fn bundle_round_trips_and_scores_identically() {
        let (bundle, features) = trained_bundle();

        let dir = tempdir().unwrap();
        let path = dir.path().join("bundles/model.json");
        bundle.save(&path).unwrap();
        let loaded = ModelBundle::load(&path).unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.model.columns(), bundle.model.columns());

        let before = bundle.score(&features, None).unwrap();
        let after = loaded.score(&features, None).unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.predicted, b.predicted);
            assert!((a.probability - b.probability).abs() < 1e-12);
        }
    }

    #[test]
    fn loaded_scores_point_at_file_rows_after_drops() {
        let (bundle, _) = trained_bundle();
        let data = "\
customerID,gender,SeniorCitizen,tenure,MonthlyCharges
A,Female,0,1,29.85
B,Male,0,,56.95
C,Male,1,2,53.85
";
        let (frame, report) = load_unlabeled_reader(Cursor::new(data), &bundle.schema).unwrap();
        let records = bundle.score_loaded(&frame, &report, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].customer_id.as_deref(), Some("C"));
        assert_eq!(records[1].source_row, Some(3));
        assert_eq!(records[0].source_row, Some(1));

        let mut broken = bundle.clone();
        broken.schema.predictors.pop();
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        broken.save(&path).unwrap();
        assert!(ModelBundle::load(&path).is_err());

        let stale = LoadReport::default();
        assert!(bundle.score_loaded(&frame, &stale, None).is_err());
    }
}
