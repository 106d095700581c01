use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use foundation::color::ColorIndex;
use foundation::ids::Pnu;
use foundation::time::SystemClock;
use parcels::marker::evaluate_marker;
use parcels::record::Mode;
use parcels::validation::{ValidationGate, is_worth_saving};
use remote::{ConnectionStatus, RemoteStore, SupabaseConfig, SupabaseStore};
use scene::SurfaceWorld;
use storage::{FileStorage, ParcelSlots};
use sync::{ParcelService, PersistenceGateway, RestoreOutcome, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Maintenance tool for stored parcel annotations")]
struct Args {
    /// JSON file holding the local parcel storage
    #[arg(long, env = "PARCEL_STORE", default_value = "parcels.json")]
    store: PathBuf,

    /// Supabase project URL; local-only when unset
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one restore cycle and summarize the registries
    Restore,

    /// Validation, color and marker statistics for stored records
    Stats,

    /// Drop stored records that carry neither color nor information
    Prune {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// List tombstoned identifiers
    Tombstones,

    /// Lift the tombstone of one identifier
    Undelete { pnu: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = SyncConfig::from_env();

    let storage = FileStorage::open(&args.store)?;
    let slots = Arc::new(ParcelSlots::with_prefix(
        Arc::new(storage),
        config.storage_prefix.clone(),
    ));
    let remote: Option<Arc<dyn RemoteStore>> = match (args.supabase_url, args.supabase_key) {
        (Some(url), Some(key)) => Some(Arc::new(SupabaseStore::new(SupabaseConfig::new(url, key))?)),
        (Some(_), None) => {
            tracing::warn!("SUPABASE_URL set without SUPABASE_ANON_KEY; running local-only");
            None
        }
        _ => None,
    };
    let gateway = Arc::new(PersistenceGateway::new(slots, remote, Arc::new(SystemClock), config));
    let service = ParcelService::new(gateway.clone(), SurfaceWorld::new());

    match service.connect().await {
        ConnectionStatus::Offline { attempts } => {
            info!("remote unreachable after {attempts} attempts, using local storage")
        }
        status => info!("remote status: {status:?}"),
    }

    match args.command {
        Command::Restore => {
            let outcome = service.load_and_restore(false).await;
            if let RestoreOutcome::Restored(report) = outcome {
                println!(
                    "loaded {} records: {} restored, {} tombstoned, {} rejected, {} duplicates",
                    report.loaded, report.restored, report.tombstoned, report.rejected, report.duplicates
                );
            }
            for mode in [Mode::Click, Mode::Search] {
                let entries = service.visible_registry(mode);
                let attached = entries.iter().filter(|e| e.is_attached()).count();
                println!("{mode}: {} parcels, {attached} visible", entries.len());
            }
        }
        Command::Stats => {
            let records = gateway.local_records();
            let gate = ValidationGate::new();
            let mut colors: BTreeMap<ColorIndex, usize> = BTreeMap::new();
            let mut markers = 0;
            for record in &records {
                gate.check(record);
                if let Some(c) = record.color {
                    *colors.entry(c).or_default() += 1;
                }
                if evaluate_marker(&record.info).should_display {
                    markers += 1;
                }
            }
            let stats = gate.stats();
            println!(
                "{} records: {} worth saving, {} minimal",
                stats.total_checks, stats.valid_count, stats.rejected_count
            );
            println!("{markers} with markers, {} tombstoned", service.tombstones().len());
            for (color, count) in colors {
                println!("  color {color} ({}): {count}", color.hex());
            }
        }
        Command::Prune { dry_run } => {
            let doomed: Vec<Pnu> = gateway
                .local_records()
                .into_iter()
                .filter(|r| !is_worth_saving(r) || service.is_deleted(&r.pnu))
                .map(|r| r.pnu)
                .collect();
            for pnu in &doomed {
                if dry_run {
                    println!("would remove {pnu}");
                } else {
                    gateway.remove_record(pnu).await?;
                    println!("removed {pnu}");
                }
            }
            println!("{} records pruned", doomed.len());
        }
        Command::Tombstones => {
            for pnu in service.tombstones() {
                println!("{pnu}");
            }
        }
        Command::Undelete { pnu } => {
            let pnu = Pnu::new(pnu)?;
            if service.undelete(&pnu) {
                println!("{pnu} restored");
            } else {
                println!("{pnu} was not deleted");
            }
        }
    }
    Ok(())
}
