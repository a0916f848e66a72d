use std::{fs::File, io::Read, path::Path};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ColumnKind, ColumnSpec, Schema},
    error::{ChurnError, Result},
    frame::{BinaryLevels, Class, ColumnData, Dataset, Factor, Frame, Outcome},
};

/// Row accounting for one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Data rows in the file.
    pub rows_read: usize,
    /// Rows kept in the result.
    pub rows_kept: usize,
    /// Rows dropped because the outcome was missing.
    pub dropped_missing_outcome: usize,
    /// Rows dropped because a selected predictor was missing.
    pub dropped_incomplete: usize,
    /// Normalized header of the input file.
    pub header: Vec<String>,
    /// 1-based data row of every kept row, in kept order.
    #[serde(skip)]
    pub source_rows: Vec<usize>,
    /// Identifier of every kept row; empty when the file has no id column.
    #[serde(skip)]
    pub ids: Vec<String>,
}

impl LoadReport {
    /// 1-based data row (header excluded) of the `kept`-th retained row.
    #[must_use]
    pub fn source_row(&self, kept: usize) -> Option<usize> {
        self.source_rows.get(kept).copied()
    }

    /// Identifier of the `kept`-th retained row.
    #[must_use]
    pub fn customer_id(&self, kept: usize) -> Option<&str> {
        self.ids.get(kept).map(String::as_str)
    }
}

/// Converts a header to snake case (`customerID` -> `customer_id`,
/// `StreamingTV` -> `streaming_tv`, `Monthly Charges` -> `monthly_charges`).
#[must_use]
pub fn normalize_column_name(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (idx, &ch) in chars.iter().enumerate() {
        if !ch.is_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if ch.is_uppercase() && idx > 0 {
            let prev = chars[idx - 1];
            let next_lower = chars.get(idx + 1).is_some_and(|next| next.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_lower);
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(ch.to_lowercase());
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Loads a labeled dataset from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, schema: &Schema) -> Result<(Dataset, LoadReport)> {
    load_reader(File::open(path)?, schema)
}

/// Loads a labeled dataset from any CSV reader.
pub fn load_reader<R: Read>(reader: R, schema: &Schema) -> Result<(Dataset, LoadReport)> {
    let parsed = parse(reader, schema, true)?;
    let levels = schema.outcome.levels();
    let outcome = Outcome {
        name: schema.outcome.name.clone(),
        levels,
        values: parsed.outcome,
    };
    let dataset = Dataset::new(parsed.frame, outcome)?;
    Ok((dataset, parsed.report))
}

/// Loads predictors only, for scoring customers whose outcome is unknown.
/// An outcome column, if present, is ignored.
pub fn load_unlabeled(path: impl AsRef<Path>, schema: &Schema) -> Result<(Frame, LoadReport)> {
    load_unlabeled_reader(File::open(path)?, schema)
}

/// Reader variant of [`load_unlabeled`].
pub fn load_unlabeled_reader<R: Read>(reader: R, schema: &Schema) -> Result<(Frame, LoadReport)> {
    let parsed = parse(reader, schema, false)?;
    Ok((parsed.frame, parsed.report))
}

struct Parsed {
    frame: Frame,
    outcome: Vec<Class>,
    report: LoadReport,
}

enum Cell {
    Number(f64),
    Text(String),
}

fn parse<R: Read>(reader: R, schema: &Schema, labeled: bool) -> Result<Parsed> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let header: Vec<String> = csv.headers()?.iter().map(normalize_column_name).collect();
    let position = |column: &str| {
        header
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| ChurnError::missing_column(column))
    };

    let outcome_idx = if labeled {
        Some(position(&schema.outcome.source)?)
    } else {
        None
    };
    let id_idx = schema
        .id_column
        .as_deref()
        .and_then(|column| header.iter().position(|name| name == column));
    let predictor_idx = schema
        .predictors
        .iter()
        .map(|spec| position(&spec.source))
        .collect::<Result<Vec<_>>>()?;

    let levels = schema.outcome.levels();
    let mut report = LoadReport {
        header: header.clone(),
        ..LoadReport::default()
    };
    let mut outcome = Vec::new();
    let mut cells: Vec<Vec<Cell>> = schema.predictors.iter().map(|_| Vec::new()).collect();
    let mut row_cells = Vec::with_capacity(schema.predictors.len());

    for (idx, record) in csv.records().enumerate() {
        let record = record?;
        let row = idx + 1;
        report.rows_read += 1;

        let class = match outcome_idx {
            Some(col) => {
                let raw = record.get(col).unwrap_or_default();
                if schema.is_missing(raw) {
                    report.dropped_missing_outcome += 1;
                    continue;
                }
                Some(parse_outcome(raw, &levels, &schema.outcome.source, row)?)
            }
            None => None,
        };

        row_cells.clear();
        for (spec, &col) in schema.predictors.iter().zip(&predictor_idx) {
            let raw = record.get(col).unwrap_or_default();
            if schema.is_missing(raw) {
                break;
            }
            row_cells.push(parse_cell(raw, spec, row)?);
        }
        if row_cells.len() < schema.predictors.len() {
            report.dropped_incomplete += 1;
            continue;
        }

        if let Some(class) = class {
            outcome.push(class);
        }
        if let Some(col) = id_idx {
            report.ids.push(record.get(col).unwrap_or_default().to_owned());
        }
        report.source_rows.push(row);
        for (column, cell) in cells.iter_mut().zip(row_cells.drain(..)) {
            column.push(cell);
        }
        report.rows_kept += 1;
    }

    if labeled && report.dropped_missing_outcome == report.rows_read {
        return Err(ChurnError::OutcomeMissing {
            column: schema.outcome.source.clone(),
        });
    }

    let mut frame = Frame::new();
    for (spec, column) in schema.predictors.iter().zip(cells) {
        frame.push_column(&spec.name, build_column(spec, column, &report.source_rows)?)?;
    }
    Ok(Parsed {
        frame,
        outcome,
        report,
    })
}

fn parse_outcome(raw: &str, levels: &BinaryLevels, column: &str, row: usize) -> Result<Class> {
    levels.classify(raw).ok_or_else(|| ChurnError::InvalidValue {
        column: column.into(),
        row,
        value: raw.into(),
    })
}

fn parse_cell(raw: &str, spec: &ColumnSpec, row: usize) -> Result<Cell> {
    let invalid = || ChurnError::InvalidValue {
        column: spec.source.clone(),
        row,
        value: raw.into(),
    };
    match &spec.kind {
        ColumnKind::Numeric { non_negative } => {
            let value: f64 = raw.parse().map_err(|_| invalid())?;
            if !value.is_finite() || (*non_negative && value < 0.0) {
                return Err(invalid());
            }
            Ok(Cell::Number(value))
        }
        ColumnKind::Categorical {
            levels: Some(levels),
        } if !levels.iter().any(|level| level == raw) => Err(invalid()),
        ColumnKind::Categorical { .. } => Ok(Cell::Text(raw.to_owned())),
        ColumnKind::Indicator {
            true_level,
            false_level,
        } => {
            let label = match raw {
                "1" | "1.0" | "true" | "TRUE" => true_level,
                "0" | "0.0" | "false" | "FALSE" => false_level,
                other if other == true_level => true_level,
                other if other == false_level => false_level,
                _ => return Err(invalid()),
            };
            Ok(Cell::Text(label.clone()))
        }
    }
}

fn build_column(spec: &ColumnSpec, cells: Vec<Cell>, source_rows: &[usize]) -> Result<ColumnData> {
    let texts = || {
        cells.iter().map(|cell| match cell {
            Cell::Text(text) => text.as_str(),
            Cell::Number(_) => "",
        })
    };
    let with_levels = |levels: &[String]| {
        Factor::with_levels(levels, texts()).map_err(|value| {
            let row = texts()
                .position(|text| text == value)
                .and_then(|kept| source_rows.get(kept).copied())
                .unwrap_or_default();
            ChurnError::InvalidValue {
                column: spec.source.clone(),
                row,
                value,
            }
        })
    };
    let data = match &spec.kind {
        ColumnKind::Numeric { .. } => ColumnData::Numeric(
            cells
                .iter()
                .map(|cell| match cell {
                    Cell::Number(value) => *value,
                    Cell::Text(_) => f64::NAN,
                })
                .collect(),
        ),
        ColumnKind::Categorical { levels: None } => {
            ColumnData::Categorical(Factor::from_values(texts()))
        }
        ColumnKind::Categorical {
            levels: Some(levels),
        } => ColumnData::Categorical(with_levels(levels)?),
        ColumnKind::Indicator {
            true_level,
            false_level,
        } => ColumnData::Categorical(with_levels(&[true_level.clone(), false_level.clone()])?),
    };
    Ok(data)
}

/// Generates a Telco-like labeled dataset with the default schema's columns.
/// Churn odds fall with tenure and rise with monthly charges and seniority,
/// giving roughly a quarter positive rows.
pub fn synthetic_customers(count: usize, seed: u64) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut gender = Vec::with_capacity(count);
    let mut senior = Vec::with_capacity(count);
    let mut tenure = Vec::with_capacity(count);
    let mut charges = Vec::with_capacity(count);
    let mut outcome = Vec::with_capacity(count);
    for _ in 0..count {
        let is_senior = rng.gen_bool(0.16);
        let months = f64::from(rng.gen_range(0u32..=72));
        let monthly = (rng.gen_range(18.0..119.0_f64) * 100.0).round() / 100.0;
        let eta = 0.3 + 0.45 * f64::from(u8::from(is_senior)) - 0.04 * months
            + 0.015 * (monthly - 65.0);
        let churned = rng.gen_bool(1.0 / (1.0 + (-eta).exp()));

        gender.push(if rng.gen_bool(0.5) { "Male" } else { "Female" });
        senior.push(if is_senior { "Yes" } else { "No" });
        tenure.push(months);
        charges.push(monthly);
        outcome.push(if churned { Class::Positive } else { Class::Negative });
    }

    let yes_no = ["Yes".to_string(), "No".to_string()];
    let senior = Factor::with_levels(&yes_no, senior).map_err(|value| {
        ChurnError::InvalidValue {
            column: "is_senior_citizen".into(),
            row: 0,
            value,
        }
    })?;
    let mut frame = Frame::new();
    frame.push_column("gender", ColumnData::Categorical(Factor::from_values(gender)))?;
    frame.push_column("is_senior_citizen", ColumnData::Categorical(senior))?;
    frame.push_column("tenure_months", ColumnData::Numeric(tenure))?;
    frame.push_column("monthly_charges", ColumnData::Numeric(charges))?;
    Dataset::new(
        frame,
        Outcome {
            name: "churn".into(),
            levels: BinaryLevels::new("Yes", "No"),
            values: outcome,
        },
    )
}
