//! Sobriety Pipeline CLI
//!
//! Builds labeled feature tables from recorded accelerometer data and
//! replays recordings through the streaming batcher.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, Sender};
use sobriety_pipeline::{
    config::Config,
    core::{FeatureNaming, LabelAligner, StreamingBatcher, WindowPayload},
    inference::Predictor,
    pipeline::{write_labeled_csv_file, BatchPipeline},
    report::{create_shared_log_with_persistence, DeviceStatus, SharedRunLog},
    source::{load_reference_dir, read_samples_file, Sample},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sobriety")]
#[command(version = VERSION)]
#[command(about = "Accelerometer windowing, feature extraction and labeling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the labeled feature table from recorded data
    Features {
        /// Accelerometer CSV (device_id/pid, timestamp_ms/time, x, y, z)
        #[arg(long)]
        samples: PathBuf,

        /// Directory of per-device reference CSV files
        #[arg(long)]
        reference: PathBuf,

        /// Output CSV (defaults to a timestamped file in the export directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Window size in milliseconds (overrides the configuration)
        #[arg(long)]
        window_ms: Option<u64>,

        /// Use the legacy `Kurtiosis` column spelling
        #[arg(long)]
        legacy_names: bool,

        /// Process devices one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Replay one device's recording through the streaming batcher
    Stream {
        /// Accelerometer CSV to replay
        #[arg(long)]
        samples: PathBuf,

        /// Device to replay (defaults to the first device in the file)
        #[arg(long)]
        device: Option<String>,

        /// Replay speed relative to recorded time
        #[arg(long, default_value = "4")]
        speedup: f64,

        /// Replay as fast as possible
        #[arg(long)]
        no_pacing: bool,

        /// Score each window against the configured endpoint (requires inference feature)
        #[arg(long)]
        predict: bool,

        /// Window size in milliseconds (overrides the configuration)
        #[arg(long)]
        window_ms: Option<u64>,
    },

    /// Show accumulated run statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Features {
            samples,
            reference,
            output,
            window_ms,
            legacy_names,
            sequential,
        } => cmd_features(
            &samples,
            &reference,
            output,
            window_ms,
            legacy_names,
            sequential,
        ),
        Commands::Stream {
            samples,
            device,
            speedup,
            no_pacing,
            predict,
            window_ms,
        } => cmd_stream(&samples, device, speedup, no_pacing, predict, window_ms),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn load_config(window_ms: Option<u64>) -> Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(ms) = window_ms {
        config.window_size = Duration::from_millis(ms);
    }
    config.validate()?;
    Ok(config)
}

fn cmd_features(
    samples_path: &Path,
    reference_dir: &Path,
    output: Option<PathBuf>,
    window_ms: Option<u64>,
    legacy_names: bool,
    sequential: bool,
) -> Result<()> {
    let mut config = load_config(window_ms)?;
    if legacy_names {
        config.feature_naming = FeatureNaming::Legacy;
    }
    if sequential {
        config.parallel_devices = false;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Sobriety Pipeline v{VERSION}");
    println!();
    println!("  Window size: {} ms", config.window_size_ms());
    println!("  Label threshold: {}", config.label_threshold);
    println!();

    let run_log = create_shared_log_with_persistence(config.run_stats_path());

    let batch = read_samples_file(samples_path, &config.source_options())
        .with_context(|| format!("Failed to read samples from {samples_path:?}"))?;
    run_log.record_samples_read(batch.samples.len() as u64);
    run_log.record_rows_rejected(batch.rejected.len() as u64);
    println!(
        "Read {} samples ({} rejected, {} skipped)",
        batch.samples.len(),
        batch.rejected.len(),
        batch.skipped
    );

    let series = load_reference_dir(reference_dir, config.reference_time_unit)
        .with_context(|| format!("Failed to read reference series from {reference_dir:?}"))?;
    let aligner = LabelAligner::new(series, config.label_threshold);
    println!("Loaded reference series for {} devices", aligner.device_count());
    let pipeline = BatchPipeline::new(aligner, config.window_size_ms())
        .with_parallel(config.parallel_devices)
        .with_log(run_log.clone());

    let report = pipeline.run(batch.samples)?;

    println!();
    for outcome in &report.outcomes {
        let status = match outcome.status {
            DeviceStatus::Labeled => "labeled",
            DeviceStatus::Unlabelable => "no reference series",
        };
        println!("  {}: {} windows, {}", outcome.device_id, outcome.windows, status);
    }

    let output = output.unwrap_or_else(|| {
        config.export_path.join(format!(
            "labeled_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    write_labeled_csv_file(&output, &report.rows, config.feature_naming)?;

    println!();
    println!(
        "Wrote {} rows ({} positive) to {:?}",
        report.rows.len(),
        report.positive_rows(),
        output
    );

    if let Err(e) = run_log.save() {
        eprintln!("Warning: Could not save run statistics: {e}");
    }

    Ok(())
}

fn cmd_stream(
    samples_path: &Path,
    device: Option<String>,
    speedup: f64,
    no_pacing: bool,
    predict: bool,
    window_ms: Option<u64>,
) -> Result<()> {
    let config = load_config(window_ms)?;
    if !no_pacing && !(speedup.is_finite() && speedup > 0.0) {
        anyhow::bail!("--speedup must be a positive number, got {speedup}");
    }

    let batch = read_samples_file(samples_path, &config.source_options())
        .with_context(|| format!("Failed to read samples from {samples_path:?}"))?;

    let device_id = match device.or_else(|| batch.samples.first().map(|s| s.device_id.clone())) {
        Some(id) => id,
        None => anyhow::bail!("No samples in {samples_path:?}"),
    };

    let mut samples: Vec<Sample> = batch
        .samples
        .into_iter()
        .filter(|s| s.device_id == device_id)
        .collect();
    if samples.is_empty() {
        anyhow::bail!("No samples for device {device_id} in {samples_path:?}");
    }
    sobriety_pipeline::core::windowing::sort_by_time(&mut samples);

    let predictor = create_predictor(predict, &config)?;

    let run_log = create_shared_log_with_persistence(config.run_stats_path());
    run_log.record_samples_read(samples.len() as u64);

    eprintln!(
        "Replaying {} samples for {} ({} ms windows{})",
        samples.len(),
        device_id,
        config.window_size_ms(),
        if no_pacing {
            String::new()
        } else {
            format!(", {speedup}x")
        }
    );
    eprintln!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let stop = Arc::new(AtomicBool::new(false));
    ctrlc_handler(running.clone(), stop.clone())?;

    // Reader thread paces samples onto a bounded channel
    let (tx, rx) = bounded::<Sample>(1024);
    let pacing = if no_pacing { None } else { Some(speedup) };
    let reader = {
        let running = running.clone();
        thread::spawn(move || replay(samples, pacing, &running, tx))
    };

    let mut batcher = StreamingBatcher::for_device(device_id.clone(), config.window_size_ms());
    let emit = |window: sobriety_pipeline::Window| {
        emit_window(&window, predictor.as_deref(), &run_log);
    };

    let outcome = batcher.consume(rx.iter(), &stop, &emit)?;
    // Cancelled consumption leaves the open window buffered
    if let Some(window) = batcher.flush() {
        emit(window);
    }

    running.store(false, Ordering::SeqCst);
    if reader.join().is_err() {
        eprintln!("Warning: Reader thread panicked");
    }

    eprintln!();
    eprintln!("Stream {outcome:?}");
    eprintln!("{}", run_log.summary());
    if let Err(e) = run_log.save() {
        eprintln!("Warning: Could not save run statistics: {e}");
    }

    Ok(())
}

/// Send samples in time order, sleeping `delta / speedup` between them.
fn replay(samples: Vec<Sample>, speedup: Option<f64>, running: &AtomicBool, tx: Sender<Sample>) {
    let mut previous: Option<i64> = None;
    for sample in samples {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if let (Some(speedup), Some(prev)) = (speedup, previous) {
            let delta_ms = (sample.timestamp_ms - prev).max(0) as f64;
            thread::sleep(Duration::from_secs_f64(delta_ms / speedup / 1000.0));
        }
        previous = Some(sample.timestamp_ms);
        if tx.send(sample).is_err() {
            break;
        }
    }
}

fn emit_window(
    window: &sobriety_pipeline::Window,
    predictor: Option<&dyn Predictor>,
    run_log: &SharedRunLog,
) {
    run_log.record_window();

    let payload = WindowPayload::from_window(window);
    match payload.to_json() {
        Ok(json) => {
            println!("{json}");
            run_log.record_payload_sent();
        }
        Err(e) => {
            eprintln!("Warning: Could not serialize window: {e}");
            return;
        }
    }

    let Some(predictor) = predictor else {
        return;
    };
    let Some(row) = payload.to_inference_row() else {
        return;
    };
    match predictor.predict(&row) {
        Ok(prediction) => {
            run_log.record_prediction();
            eprintln!(
                "[{}] {} prediction: {prediction}",
                row.window_time.format("%H:%M:%S"),
                row.device_id
            );
        }
        Err(e) => {
            tracing::warn!(
                device_id = %row.device_id,
                window_timestamp_ms = row.window_timestamp_ms,
                error = %e,
                "Prediction failed"
            );
        }
    }
}

#[cfg(feature = "inference")]
fn create_predictor(predict: bool, config: &Config) -> Result<Option<Box<dyn Predictor>>> {
    if !predict {
        return Ok(None);
    }
    let inference = config
        .inference
        .or_from_env()
        .context("No inference endpoint configured")?;
    let client = sobriety_pipeline::BlockingInferenceClient::new(inference)?
        .with_naming(config.feature_naming);
    Ok(Some(Box::new(client)))
}

#[cfg(not(feature = "inference"))]
fn create_predictor(predict: bool, _config: &Config) -> Result<Option<Box<dyn Predictor>>> {
    if predict {
        eprintln!("Warning: --predict flag ignored (inference feature not enabled at compile time)");
    }
    Ok(None)
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Sobriety Pipeline Status");
    println!("========================");
    println!();

    println!("Configuration:");
    println!("  Window size: {} ms", config.window_size_ms());
    println!("  Label threshold: {}", config.label_threshold);
    println!(
        "  Reference time unit: {}",
        serde_json::to_string(&config.reference_time_unit).unwrap_or_default()
    );
    println!(
        "  Inference endpoint: {}",
        if config.inference.is_configured() {
            config.inference.endpoint_url.as_str()
        } else {
            "not configured"
        }
    );
    println!();

    let stats_path = config.run_stats_path();
    if stats_path.exists() {
        let run_log = create_shared_log_with_persistence(stats_path);
        println!("Accumulated statistics:");
        let stats = run_log.stats();
        println!("  Samples read: {}", stats.samples_read);
        println!("  Rows rejected: {}", stats.rows_rejected);
        println!("  Windows emitted: {}", stats.windows_emitted);
        println!("  Rows labeled: {}", stats.rows_labeled);
        println!("  Unlabelable devices: {}", stats.devices_unlabelable);
        println!("  Payloads sent: {}", stats.payloads_sent);
        println!("  Predictions: {}", stats.predictions);
    } else {
        println!("No runs recorded yet.");
    }

    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>, stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        stop.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
