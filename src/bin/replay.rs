use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use crossbeam::channel;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

use rf_locator_rs::{
    Cache, CycleProcessor, EmitterStore, EmitterType, EngineConfig, FileStore, Location, Observation, Provider,
    RadioKind, RfIdentification, Smoothing, WorkItem,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz] recording
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of recordings to batch replay (processes session_*.json[.gz])
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// Engine config (JSON); defaults otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emitter store to learn into; in-memory when omitted
    #[arg(long)]
    store: Option<PathBuf>,

    /// Enable Kalman smoothing of reported positions
    #[arg(long, default_value_t = false)]
    kalman: bool,

    /// Print every reported position as a JSON line
    #[arg(long, default_value_t = false)]
    positions: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize)]
struct RecordedObservation {
    rf_id: String,
    /// Stored type name; WLAN entries may give `frequency_mhz` instead
    #[serde(default)]
    rf_type: Option<String>,
    #[serde(default)]
    frequency_mhz: Option<u32>,
    asu: i32,
    #[serde(default)]
    note: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    Gps(Location),
    Scan {
        kind: RadioKind,
        time_ms: i64,
        observations: Vec<RecordedObservation>,
    },
}

#[derive(Deserialize)]
struct Session {
    events: Vec<Event>,
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(serde_json::from_reader(BufReader::new(reader))?)
}

fn to_observation(recorded: &RecordedObservation, time_ms: i64) -> Option<Observation> {
    let ident = match (recorded.frequency_mhz, recorded.rf_type.as_deref()) {
        (Some(mhz), _) => RfIdentification::wlan(&recorded.rf_id, mhz),
        (None, Some(name)) => RfIdentification::new(recorded.rf_id.clone(), EmitterType::type_of(name)),
        (None, None) => return None,
    };
    Some(Observation::new(ident.ok()?, recorded.asu, time_ms).with_note(recorded.note.clone()))
}

fn iso_time(time_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(time_ms)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| time_ms.to_string())
}

fn run_once(path: &Path, args: &Args, config: &EngineConfig) -> anyhow::Result<serde_json::Value> {
    let session = load_session(path)?;

    let store = match &args.store {
        Some(store_path) => FileStore::open(store_path)?,
        None => FileStore::in_memory(),
    };
    let cache = Arc::new(Cache::new(store, Arc::new(config.blacklist.build()), config.cache.clone()));
    let (tx, rx) = channel::unbounded::<Location>();
    let mut processor = CycleProcessor::new(cache.clone(), config, Box::new(tx));

    let mut gps: Option<Location> = None;
    let mut scans = 0u64;
    let mut observations = 0u64;
    let mut skipped = 0u64;
    let mut reports = 0u64;
    let mut errors = Vec::new();
    let mut accuracy_sum = 0.0;

    for event in session.events {
        match event {
            Event::Gps(mut fix) => {
                fix.provider = Provider::Gps;
                if fix.validate().is_ok() && fix.not_null_island() {
                    gps = Some(fix);
                }
            }
            Event::Scan {
                kind,
                time_ms,
                observations: recorded,
            } => {
                scans += 1;
                let batch: Vec<Observation> = recorded
                    .iter()
                    .filter_map(|r| {
                        let obs = to_observation(r, time_ms);
                        if obs.is_none() {
                            skipped += 1;
                        }
                        obs
                    })
                    .collect();
                observations += batch.len() as u64;
                log::debug!("{:?} scan at {} with {} observations", kind, time_ms, batch.len());

                processor.process(WorkItem {
                    observations: batch,
                    gps: gps.clone(),
                    time_ms,
                });

                for location in rx.try_iter() {
                    reports += 1;
                    accuracy_sum += location.accuracy;
                    // Error against the fix current at report time
                    if let Some(fix) = &gps {
                        errors.push(location.distance_to(fix));
                    }
                    if args.positions {
                        println!(
                            "{}",
                            json!({
                                "time": iso_time(location.time_ms),
                                "latitude": location.latitude,
                                "longitude": location.longitude,
                                "accuracy": location.accuracy,
                                "averaged_of": location.extras.averaged_of,
                            })
                        );
                    }
                }
            }
        }
    }

    drop(processor);
    let stored = cache.close().map(|store| store.row_count()).transpose()?;

    let mean_error = if errors.is_empty() {
        None
    } else {
        Some(errors.iter().sum::<f64>() / errors.len() as f64)
    };
    let max_error = errors.iter().copied().reduce(f64::max);
    let mean_accuracy = (reports > 0).then(|| accuracy_sum / reports as f64);

    Ok(json!({
        "log": path.display().to_string(),
        "smoothing": format!("{:?}", config.smoothing),
        "scans": scans,
        "observations": observations,
        "skipped_observations": skipped,
        "reports": reports,
        "mean_accuracy": mean_accuracy,
        "mean_error_vs_gps": mean_error,
        "max_error_vs_gps": max_error,
        "stored_emitters": stored,
    }))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if args.kalman {
        config.smoothing = Smoothing::kalman();
    }
    config.validate()?;

    let mut results = Vec::new();
    if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.starts_with("session_") && (name.ends_with(".json") || name.ends_with(".json.gz"))
            })
            .collect();
        paths.sort();
        for path in paths {
            match run_once(&path, &args, &config) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &args, &config)?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
