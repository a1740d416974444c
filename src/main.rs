use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use rf_locator_rs::store::SCHEMA_VERSION;
use rf_locator_rs::{BoundingBox, EmitterStore, EmitterType, FileStore};

#[derive(Parser, Debug)]
#[command(name = "rf_locator")]
#[command(about = "Emitter store maintenance", long_about = None)]
struct Args {
    /// Emitter store file (gzip JSON)
    #[arg(long, default_value = "emitters.json.gz")]
    store: PathBuf,

    /// Debug logging (RUST_LOG still wins)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Row count per emitter type
    Stats,
    /// Emitters of one type around a point
    Query {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Search radius in meters
        #[arg(long, default_value = "500")]
        radius: f64,
        /// WLAN_24GHZ, WLAN_5GHZ or MOBILE
        #[arg(long, default_value = "WLAN_24GHZ")]
        rf_type: String,
    },
    /// Rewrite the store at the current schema version
    Migrate,
    /// Delete every emitter
    Clear {
        /// Required; clearing cannot be undone
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if !args.store.exists() {
        bail!("No emitter store at {}", args.store.display());
    }
    let mut store = FileStore::open(&args.store)?;

    match args.command {
        Command::Stats => {
            let mut per_type: BTreeMap<&str, (usize, i64)> = BTreeMap::new();
            for record in store.records() {
                let entry = per_type.entry(record.rf_type.as_str()).or_default();
                entry.0 += 1;
                entry.1 += record.trust;
            }
            println!("{}: {} emitters", args.store.display(), store.row_count()?);
            for (rf_type, (count, trust_sum)) in per_type {
                println!("  {:<11} {:>7}  mean trust {:.1}", rf_type, count, trust_sum as f64 / count as f64);
            }
        }
        Command::Query {
            lat,
            lon,
            radius,
            rf_type,
        } => {
            let rf_type = EmitterType::type_of(&rf_type);
            if rf_type == EmitterType::Invalid {
                bail!("Unknown emitter type");
            }
            let bb = BoundingBox::around(lat, lon, radius);
            let mut found: Vec<_> = store.emitters_in(rf_type, &bb)?.into_iter().collect();
            found.sort_by(|a, b| a.rf_id().cmp(b.rf_id()));
            for ident in &found {
                if let Some(record) = store.get(ident)? {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
            eprintln!("{} {} emitters within {:.0} m", found.len(), rf_type, radius);
        }
        Command::Migrate => {
            // Opening already migrated older files
            println!(
                "{} at schema v{} with {} emitters",
                args.store.display(),
                SCHEMA_VERSION,
                store.row_count()?
            );
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear {} without --yes", args.store.display());
            }
            let before = store.row_count()?;
            store.clear()?;
            println!("Removed {} emitters", before);
        }
    }
    Ok(())
}
