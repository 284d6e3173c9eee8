//! trident-score - Score JSON-lines traffic with the TRIDENT core
//!
//! ```text
//! trident-score <traffic.jsonl> [--train N] [--models DIR] [--save-models DIR] [--baseline FILE]
//! ```
//!
//! With `--train N` the reference adapters are fitted on the first N records
//! and the rest are scored; otherwise models are loaded from `--models` (or
//! `TRIDENT_MODEL_PATH`). One JSON result per scored record goes to stdout.

use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use ndarray::Array2;

use trident_core::constants::{APP_NAME, APP_VERSION};
use trident_core::logic::features::{layout_names, FeatureError, NoHistory};
use trident_core::logic::model::{FileModelSource, IsolationForestAdapter, IsolationForestConfig, MeanReconstructor};
use trident_core::{
    AnomalyDetector, BaselineStats, CoreConfig, FeatureExtractor, InMemoryHistory, LogEmitter, ScoringPipeline,
    TrafficRecord,
};

#[derive(Debug, Default)]
struct Args {
    input: PathBuf,
    train: Option<usize>,
    models: Option<PathBuf>,
    save_models: Option<PathBuf>,
    baseline: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut input = None;
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| iter.next().ok_or_else(|| format!("{} needs a value", flag));
        match arg.as_str() {
            "--train" => {
                let raw = value("--train")?;
                args.train = Some(raw.parse().map_err(|_| format!("--train expects a count, got '{}'", raw))?);
            }
            "--models" => args.models = Some(PathBuf::from(value("--models")?)),
            "--save-models" => args.save_models = Some(PathBuf::from(value("--save-models")?)),
            "--baseline" => args.baseline = Some(PathBuf::from(value("--baseline")?)),
            other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
            other => input = Some(PathBuf::from(other)),
        }
    }

    args.input = input.ok_or("missing input file")?;
    Ok(args)
}

/// Parse JSON lines; malformed lines are logged and skipped
fn read_records(path: &PathBuf) -> io::Result<Vec<TrafficRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrafficRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("Skipping line {}: {}", lineno + 1, e),
        }
    }
    Ok(records)
}

/// Feature matrix of `records` in layout order
///
/// The batch itself is the only history, so records without an id are not
/// counted twice in the rate window.
fn training_matrix(records: &[TrafficRecord], extractor: &FeatureExtractor) -> Result<Array2<f64>, FeatureError> {
    let vectors = extractor.extract_batch(records, &NoHistory)?;
    let names = layout_names();

    let mut data = Array2::<f64>::zeros((vectors.len(), names.len()));
    for (mut row, vector) in data.outer_iter_mut().zip(vectors.iter()) {
        for (cell, value) in row.iter_mut().zip(vector.to_array(&names)) {
            *cell = value;
        }
    }
    Ok(data)
}

/// Fit both reference adapters on the feature vectors of `records`
fn train(
    records: &[TrafficRecord],
    extractor: &FeatureExtractor,
) -> Result<(IsolationForestAdapter, MeanReconstructor), Box<dyn Error>> {
    let data = training_matrix(records, extractor)?;
    let names = layout_names();

    let isolation = IsolationForestAdapter::fit(names.clone(), data.view(), IsolationForestConfig::default())?;
    let reconstruction = MeanReconstructor::fit(names, data.view())?;
    log::info!("Trained reference adapters on {} records", data.nrows());
    Ok((isolation, reconstruction))
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = CoreConfig::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    log::info!("Starting {} scorer v{}", APP_NAME, APP_VERSION);

    let args = parse_args().map_err(|e| {
        eprintln!("usage: trident-score <traffic.jsonl> [--train N] [--models DIR] [--save-models DIR] [--baseline FILE]");
        e
    })?;

    let records = read_records(&args.input)?;
    log::info!("Read {} records from {}", records.len(), args.input.display());

    let detector = Arc::new(AnomalyDetector::with_settings(config.detector_settings()?));
    let baselines = Arc::new(BaselineStats::new(config.baseline));

    let baseline_path = args.baseline.clone().unwrap_or_else(|| config.baseline_path.clone());
    if baseline_path.exists() {
        if let Err(e) = baselines.load_snapshot(&baseline_path) {
            log::warn!("Baseline snapshot ignored: {}", e);
        }
    }

    let to_score = match args.train {
        Some(n) => {
            let n = n.min(records.len());
            let extractor = FeatureExtractor::new(config.extractor_config());
            let (isolation, reconstruction) = train(&records[..n], &extractor)?;

            let version = match &args.save_models {
                Some(dir) => FileModelSource::save(dir, &isolation, &reconstruction)?,
                None => format!("trained-{}", Utc::now().timestamp()),
            };
            detector.install_models(Arc::new(isolation), Arc::new(reconstruction), version)?;
            &records[n..]
        }
        None => {
            let dir = args.models.clone().unwrap_or_else(|| config.model_dir.clone());
            let version = detector.reload_from(&FileModelSource::new(dir))?;
            log::info!("Using model version {}", version);
            &records[..]
        }
    };

    // Scored chunks join the history once done, so no record is its own history
    let seen = records.len() - to_score.len();
    let history = Arc::new(InMemoryHistory::with_records(records[..seen].to_vec()));
    let pipeline = ScoringPipeline::new(
        &config,
        Arc::clone(&detector),
        Arc::clone(&baselines),
        history.clone(),
        Arc::new(LogEmitter),
    );

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut anomalies = 0usize;

    for chunk in to_score.chunks(config.batch_size) {
        let results = pipeline.process_batch(chunk)?;
        for (record, result) in chunk.iter().zip(results.iter()) {
            let mut line = result.to_map();
            line.insert("id".to_string(), serde_json::json!(record.id));
            writeln!(out, "{}", serde_json::Value::Object(line))?;
            anomalies += usize::from(result.is_anomaly);
        }

        history.extend(chunk.iter().cloned());
        pipeline.apply_pending_feedback();
        pipeline.maintenance(Utc::now())?;
    }
    out.flush()?;

    log::info!(
        "Scored {} records, {} anomalies (threshold {:.3})",
        to_score.len(),
        anomalies,
        detector.anomaly_threshold()
    );

    if let Err(e) = baselines.save_snapshot(&baseline_path) {
        log::warn!("Could not save baseline snapshot: {}", e);
    }
    Ok(())
}
