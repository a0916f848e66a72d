use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use churn_learning::{
    classifier::render_terms,
    dataloader::{load_csv, load_unlabeled},
    explore::explore,
    synthetic_customers, AnalysisConfig, AnalysisTelemetry, ChurnAnalysis, Dataset, ModelBundle,
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{self, json, Value};
use shared_logging::{read_records, JsonLogger, LogLevel, LogRecord};
use uuid::Uuid;

const DEFAULT_LOG_DIR: &str = "churnlab/logs";
const DEFAULT_MANIFEST: &str = "churnlab/logs/runs/index.jsonl";

#[derive(Parser, Debug)]
#[command(name = "churn", version, about = "Logistic-regression customer churn analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Loads, splits, fits and evaluates one analysis run.
    Run(RunArgs),
    /// Prints descriptive summaries of a dataset.
    Explore {
        #[command(flatten)]
        source: DataSource,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Scores unlabeled customers with a saved bundle.
    Predict {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Lists most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Shows the manifest entry of a run.
    Show {
        run_id: String,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct DataSource {
    /// Telco-style CSV with a header row.
    #[arg(long, conflicts_with = "synthetic", required_unless_present = "synthetic")]
    data: Option<PathBuf>,
    /// Generates this many synthetic customers instead of reading a file.
    #[arg(long)]
    synthetic: Option<usize>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    source: DataSource,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    ratio: Option<f64>,
    #[arg(long)]
    threshold: Option<f64>,
    /// Where to write the fitted recipe and model.
    #[arg(long)]
    bundle: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct RunManifestEntry {
    run_id: String,
    submitted_at: DateTime<Utc>,
    data: Option<PathBuf>,
    synthetic: Option<usize>,
    config: Option<PathBuf>,
    seed: u64,
    train_ratio: f64,
    threshold: f64,
    log_path: PathBuf,
    bundle: Option<PathBuf>,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

impl RunManifestEntry {
    fn new(args: &RunArgs, config: &AnalysisConfig, log_path: PathBuf) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            data: args.source.data.clone(),
            synthetic: args.source.synthetic,
            config: args.config.clone(),
            seed: config.seed,
            train_ratio: config.train_ratio,
            threshold: config.threshold,
            log_path,
            bundle: args.bundle.clone(),
            status: "pending".into(),
            result: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut out = std::io::stdout();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::Explore { source, config } => {
            handle_explore(&source, config.as_deref(), &mut out)
        }
        Commands::Predict {
            bundle,
            data,
            threshold,
        } => handle_predict(&bundle, &data, threshold, &mut out).map(|_| ()),
        Commands::List { limit, manifest } => handle_list(&manifest, limit, &mut out),
        Commands::Show { run_id, manifest } => handle_show(&manifest, &run_id, &mut out),
    }
}

fn handle_explore(source: &DataSource, config: Option<&Path>, out: &mut impl Write) -> Result<()> {
    let config = load_config(config)?;
    let dataset = match (&source.data, source.synthetic) {
        (Some(path), _) => {
            load_csv(path, &config.schema)
                .with_context(|| format!("loading {}", path.display()))?
                .0
        }
        (None, Some(count)) => synthetic_customers(count, config.seed)?,
        (None, None) => bail!("either --data or --synthetic is required"),
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&explore(&dataset))?)?;
    Ok(())
}

/// Prints one JSON line per scored customer and returns the number printed.
fn handle_predict(
    bundle: &Path,
    data: &Path,
    threshold: Option<f64>,
    out: &mut impl Write,
) -> Result<usize> {
    let bundle = ModelBundle::load(bundle)
        .with_context(|| format!("loading bundle {}", bundle.display()))?;
    let (frame, report) = load_unlabeled(data, &bundle.schema)
        .with_context(|| format!("loading {}", data.display()))?;
    if report.dropped_incomplete > 0 {
        eprintln!("skipped {} incomplete rows", report.dropped_incomplete);
    }
    let levels = bundle.model.levels();
    let records = bundle.score_loaded(&frame, &report, threshold)?;
    for record in &records {
        let line = json!({
            "row": record.source_row,
            "customer_id": record.customer_id,
            "predicted": levels.label(record.predicted),
            "probability": record.probability,
        });
        writeln!(out, "{line}")?;
    }
    Ok(records.len())
}

fn handle_list(manifest: &Path, limit: usize, out: &mut impl Write) -> Result<()> {
    for entry in read_manifest(manifest)?.into_iter().rev().take(limit) {
        let accuracy = entry
            .result
            .as_ref()
            .and_then(|result| result["metrics"]["accuracy"].as_f64())
            .map_or_else(|| "-".to_owned(), |value| format!("{value:.4}"));
        writeln!(
            out,
            "{} | {} | {} | seed={} | accuracy={}",
            entry.run_id, entry.status, entry.submitted_at, entry.seed, accuracy
        )?;
    }
    Ok(())
}

/// Prints the manifest entry of a run followed by its log events.
fn handle_show(manifest: &Path, run_id: &str, out: &mut impl Write) -> Result<()> {
    let Some(entry) = read_manifest(manifest)?.into_iter().find(|e| e.run_id == run_id) else {
        writeln!(out, "run {run_id} not found")?;
        return Ok(());
    };
    writeln!(out, "{}", serde_json::to_string_pretty(&entry)?)?;
    if entry.log_path.exists() {
        for record in read_records(&entry.log_path)? {
            writeln!(
                out,
                "{} {:<5} {}",
                record.timestamp.format("%H:%M:%S"),
                record.level,
                record.message
            )?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(AnalysisConfig::default()),
    }
}

fn handle_run(args: &RunArgs) -> Result<()> {
    if let Some(data) = &args.source.data {
        anyhow::ensure!(data.exists(), "data file {} not found", data.display());
    }
    let mut config = load_config(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(ratio) = args.ratio {
        config.train_ratio = ratio;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    config.validate()?;

    let mut entry = RunManifestEntry::new(args, &config, PathBuf::new());
    entry.log_path = compute_log_path(&args.log_dir, &entry.run_id)?;
    entry.status = "queued".into();
    append_manifest(&args.manifest, &entry)?;
    log_run_event(
        &entry.log_path,
        LogLevel::Info,
        "churn.run.queued",
        json!({ "run_id": entry.run_id, "seed": entry.seed, "train_ratio": entry.train_ratio }),
    )?;

    update_entry(&args.manifest, &entry.run_id, |e| e.status = "running".into())?;
    match execute(args, config, &entry) {
        Ok(result) => {
            update_entry(&args.manifest, &entry.run_id, |e| {
                e.status = "completed".into();
                e.result = Some(result.clone());
            })?;
            log_run_event(
                &entry.log_path,
                LogLevel::Info,
                "churn.run.completed",
                json!({ "run_id": entry.run_id }),
            )?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(err) => {
            update_entry(&args.manifest, &entry.run_id, |e| e.status = "failed".into())?;
            log_run_event(
                &entry.log_path,
                LogLevel::Error,
                "churn.run.failed",
                json!({ "run_id": entry.run_id, "error": format!("{err:#}") }),
            )?;
            Err(err)
        }
    }
}

fn execute(args: &RunArgs, config: AnalysisConfig, entry: &RunManifestEntry) -> Result<Value> {
    let telemetry = AnalysisTelemetry::builder("churn")
        .run_id(entry.run_id.clone())
        .log_path(&entry.log_path)
        .build()?;
    let seed = config.seed;
    let analysis = ChurnAnalysis::new(config).with_telemetry(telemetry);
    let run = match (&args.source.data, args.source.synthetic) {
        (Some(path), _) => analysis
            .run_path(path)
            .with_context(|| format!("analysing {}", path.display()))?,
        (None, Some(count)) => {
            let dataset: Dataset = synthetic_customers(count, seed)?;
            analysis.run_dataset(&dataset)?
        }
        (None, None) => bail!("either --data or --synthetic is required"),
    };
    eprintln!("{}", run.report.fit.summary());
    eprint!("{}", render_terms(&run.report.terms));
    eprintln!("{}", run.report.summary());
    if let Some(path) = &args.bundle {
        run.bundle
            .save(path)
            .with_context(|| format!("saving bundle {}", path.display()))?;
    }
    Ok(serde_json::to_value(&run.report)?)
}

fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: RunManifestEntry = serde_json::from_str(&line)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn update_entry(path: &Path, run_id: &str, apply: impl Fn(&mut RunManifestEntry)) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let mut changed = false;
    for entry in &mut entries {
        if entry.run_id == run_id {
            apply(entry);
            changed = true;
        }
    }
    if !changed {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn compute_log_path(base: &Path, run_id: &str) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{}-{run_id}.log.jsonl", now.format("%H%M%S"))))
}

fn log_run_event(path: &Path, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
    let logger = JsonLogger::new(path)?;
    logger.log(&LogRecord::new("churn-cli", level, message).with_metadata(metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(manifest: PathBuf, log_dir: PathBuf, bundle: Option<PathBuf>) -> RunArgs {
        RunArgs {
            source: DataSource {
                data: None,
                synthetic: Some(800),
            },
            config: None,
            seed: Some(42),
            ratio: None,
            threshold: None,
            bundle,
            log_dir,
            manifest,
        }
    }

    #[test]
    fn run_records_manifest_and_bundle() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("runs/index.jsonl");
        let bundle = dir.path().join("model.json");
        handle_run(&args(manifest.clone(), dir.path().join("logs"), Some(bundle.clone()))).unwrap();

        let entries = read_manifest(&manifest).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "completed");
        assert_eq!(entries[0].seed, 42);
        let result = entries[0].result.as_ref().unwrap();
        assert_eq!(result["run_id"], entries[0].run_id.as_str());

        let logs = shared_logging::read_records(&entries[0].log_path).unwrap();
        assert!(logs.iter().any(|r| r.message == "churn.fit.completed"));
        assert!(logs.iter().any(|r| r.message == "churn.run.completed"));
        assert!(ModelBundle::load(&bundle).is_ok());
    }

    #[test]
    fn update_entry_rewrites_only_matching_run() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("index.jsonl");
        let run_args = args(manifest.clone(), dir.path().join("logs"), None);
        let config = AnalysisConfig::default();
        let first = RunManifestEntry::new(&run_args, &config, dir.path().join("a.log"));
        let second = RunManifestEntry::new(&run_args, &config, dir.path().join("b.log"));
        append_manifest(&manifest, &first).unwrap();
        append_manifest(&manifest, &second).unwrap();

        update_entry(&manifest, &second.run_id, |e| e.status = "failed".into()).unwrap();
        let entries = read_manifest(&manifest).unwrap();
        assert_eq!(entries[0].status, "pending");
        assert_eq!(entries[1].status, "failed");
    }

    #[test]
    fn predict_reports_file_rows_and_customer_ids() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("runs/index.jsonl");
        let bundle = dir.path().join("model.json");
        handle_run(&args(manifest, dir.path().join("logs"), Some(bundle.clone()))).unwrap();

        let data = dir.path().join("new.csv");
        fs::write(
            &data,
            "customerID,gender,SeniorCitizen,tenure,MonthlyCharges\n\
             A,Female,0,1,29.85\n\
             B,Male,0,,56.95\n\
             C,Male,1,2,53.85\n",
        )
        .unwrap();
        let mut out = Vec::new();
        let printed = handle_predict(&bundle, &data, Some(0.0), &mut out).unwrap();
        assert_eq!(printed, 2);

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0]["row"], 1);
        assert_eq!(lines[0]["customer_id"], "A");
        assert_eq!(lines[1]["row"], 3);
        assert_eq!(lines[1]["customer_id"], "C");
        assert_eq!(lines[1]["predicted"], "Yes");
    }

    #[test]
    fn list_and_show_read_the_manifest() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("runs/index.jsonl");
        handle_run(&args(manifest.clone(), dir.path().join("logs"), None)).unwrap();
        let run_id = read_manifest(&manifest).unwrap()[0].run_id.clone();

        let mut listed = Vec::new();
        handle_list(&manifest, 10, &mut listed).unwrap();
        let listed = String::from_utf8(listed).unwrap();
        assert_eq!(listed.lines().count(), 1);
        assert!(listed.starts_with(&run_id));
        assert!(listed.contains("completed"));
        assert!(!listed.contains("accuracy=-"));

        let mut shown = Vec::new();
        handle_show(&manifest, &run_id, &mut shown).unwrap();
        let shown = String::from_utf8(shown).unwrap();
        assert!(shown.contains(&format!("\"run_id\": \"{run_id}\"")));
        assert!(shown.contains("INFO  churn.fit.completed"));

        let mut missing = Vec::new();
        handle_show(&manifest, "run-unknown", &mut missing).unwrap();
        assert_eq!(String::from_utf8(missing).unwrap(), "run run-unknown not found\n");
    }

    #[test]
    fn explore_prints_report_json() {
        let source = DataSource {
            data: None,
            synthetic: Some(300),
        };
        let mut out = Vec::new();
        handle_explore(&source, None, &mut out).unwrap();
        let report: Value = serde_json::from_slice(&out).unwrap();
        assert!(report["outcome_counts"].is_array());
    }

    #[test]
    fn log_paths_are_unique_per_run() {
        let dir = tempdir().unwrap();
        let first = compute_log_path(dir.path(), "run-a").unwrap();
        let second = compute_log_path(dir.path(), "run-b").unwrap();
        assert_ne!(first, second);
        assert!(first.to_string_lossy().ends_with("-run-a.log.jsonl"));
    }
}
