//! bookmark-sync: synchronizes the local places tree with a storage server.

use std::process;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use bookmark_sync::app::SyncService;
use bookmark_sync::managers::change_tracker::SyncTracker;
use bookmark_sync::services::settings_engine::{SettingsEngine, SettingsEngineTrait};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass (the default)
    Sync,
    /// Show identity and pending change state
    Status,
    /// Remove all local bookmarks and forget the last sync time
    Wipe,
    /// Change one setting, e.g. `set auth_timeout_secs 60`
    Set { key: String, value: String },
}

fn main() {
    let cli = Cli::parse();

    let mut engine = SettingsEngine::new(cli.config.clone());
    let settings = match engine.load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings from {}: {}", engine.get_config_path(), e);
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(Commands::Set { key, value }) = &cli.command {
        // Bare words are taken as strings so `set collection tabs` works.
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
        if let Err(e) = engine.set_value(key, value) {
            eprintln!("Error updating setting: {}", e);
            process::exit(1);
        }
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            process::exit(1);
        }
    };

    let service = match SyncService::open(settings, runtime.handle().clone()) {
        Ok(service) => service,
        Err(e) => {
            error!("could not open sync service: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => service.sync().map(|summary| {
            println!(
                "applied {}, failed {}, reparented {}, uploaded {}",
                summary.applied, summary.failed, summary.reparented, summary.uploaded
            );
        }),
        Commands::Status => {
            let identity = service.identity();
            let _ = identity.wait_until_ready();
            println!("account:    {}", identity.account().unwrap_or_else(|| "-".to_string()));
            println!("auth state: {:?}", identity.current_auth_state());
            let tracker = service.engine().tracker();
            println!("pending:    {} (score {})", tracker.changed_ids().len(), tracker.score());
            service.engine().last_sync().map(|ts| println!("last sync:  {}", ts))
        }
        Commands::Wipe => service.engine().wipe_client(),
        Commands::Set { .. } => Ok(()),
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}
