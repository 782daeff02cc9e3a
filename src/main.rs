use anyhow::Context;
use clap::Parser;
use regsync::config::{env::SystemEnv, toml_config::TomlConfig, AppConfig};
use regsync::core::fetcher::PretixClient;
use regsync::core::publisher::Publisher;
use regsync::core::scheduler::{Scheduler, TokioClock};
use regsync::core::spreadsheet::SpreadsheetBuilder;
use regsync::core::transform::Transformer;
use regsync::domain::ports::Storage;
use regsync::utils::logger;
use regsync::{EtlEngine, EtlError, LocalStorage, SyncPipeline, WebDavStorage};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "regsync", version)]
#[command(about = "Publishes pretix registrations as spreadsheets to a WebDAV folder")]
struct Args {
    /// Optional TOML file with defaults and document definitions
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run once and exit, regardless of RUN_ONCE
    #[arg(long)]
    once: bool,

    /// Write documents below this local directory instead of uploading them
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(long, help = "Log as JSON lines")]
    json_logs: bool,
}

fn init_logging(args: &Args, level: &str) {
    if args.json_logs {
        logger::init_json_logger(level, args.verbose);
    } else {
        logger::init_cli_logger(level, args.verbose);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    let env = SystemEnv;
    let file = args
        .config
        .as_deref()
        .map(|path| TomlConfig::from_file(path, &env))
        .transpose();
    let level = match &file {
        Ok(Some(toml)) => AppConfig::logging_level(&env, toml),
        Ok(None) => AppConfig::logging_level(&env, &TomlConfig::default()),
        Err(_) => Ok("info".to_string()),
    };
    init_logging(&args, level.as_deref().unwrap_or("info"));

    let mut config = match file.and_then(|toml| AppConfig::build(&env, toml.unwrap_or_default())) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(e.exit_code());
        }
    };

    if args.once {
        config.schedule.run_once = true;
    }

    tracing::info!(
        "Starting regsync {} for {}/{} (every {} min, check every {} s{})",
        env!("CARGO_PKG_VERSION"),
        config.pretix.organizer,
        config.pretix.event,
        config.schedule.run_interval.as_secs() / 60,
        config.schedule.check_interval.as_secs(),
        if config.schedule.run_once { ", single run" } else { "" }
    );
    tracing::debug!("Configuration: {:?}", config);

    let outcome = match &args.output_dir {
        Some(dir) => {
            tracing::info!("📁 Writing documents to {}", dir.display());
            run_with_storage(&config, LocalStorage::new(dir.clone())).await
        }
        None => match WebDavStorage::new(
            &config.storage.url,
            &config.storage.username,
            config.storage.password.expose(),
            config.request_timeout,
        ) {
            Ok(storage) => run_with_storage(&config, storage).await,
            Err(e) => Err(anyhow::Error::new(e).context("creating WebDAV storage")),
        },
    };

    match outcome {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("❌ Startup failed: {:#}", e);
            let code = e
                .downcast_ref::<EtlError>()
                .map(|err| err.exit_code())
                .unwrap_or(1);
            eprintln!("❌ {:#}", e);
            std::process::exit(code);
        }
    }
}

/// Runs the scheduler to completion. Returns the process exit code.
async fn run_with_storage<S: Storage>(config: &AppConfig, storage: S) -> anyhow::Result<i32> {
    let client = PretixClient::new(
        &config.pretix.api_url,
        &config.pretix.organizer,
        &config.pretix.event,
        config.pretix.token.expose(),
        &config.pretix.locale,
        config.request_timeout,
    )
    .context("creating pretix client")?;

    let publisher = Publisher::new(
        storage,
        &config.storage.upload_dir,
        config.timezone,
        config.stamps.clone(),
    );
    let pipeline = SyncPipeline::new(
        client,
        config.pretix.filters.clone(),
        Transformer::new(config.timezone),
        SpreadsheetBuilder::new(config.max_column_width),
        publisher,
        config.documents.clone(),
    );
    let engine = EtlEngine::new(pipeline, config.skip_unchanged);
    let mut scheduler = Scheduler::new(engine, TokioClock::new(), config.schedule);

    let last = scheduler.run_until(shutdown_signal()).await;
    tracing::info!("Stopped after {} runs ({:?})", scheduler.runs(), scheduler.state());

    if !config.schedule.run_once {
        return Ok(0);
    }
    Ok(match last {
        Some(result) if result.is_success() => {
            println!("✅ Registrations published");
            0
        }
        Some(result) => {
            eprintln!("❌ Run failed: {}", result.errors.join("; "));
            result.exit_code.max(1)
        }
        None => 0,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
