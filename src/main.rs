use std::{path::PathBuf, process, sync::Arc, time::Duration};

use anyhow::Context;
use channel_line::{LineClient, client::DEFAULT_DATA_API_BASE};
use clap::{Args, Parser, Subcommand};
use receipt_bot::{
    channel::{AppState, LineNotifier, MessagingApi, router},
    config::{BotConfig, ConfigManager, EnvConfigManager},
    editor::{EditSession, EditorSettings},
    extractor::{GeminiExtractor, RECEIPT_PROMPT},
    forwarder::{HttpCollector, RetryPolicy, SubmissionQueue, SubmissionWorker},
    locale::Catalog,
    logger::{LogConfig, init_tracing},
    session::InMemorySessionStore,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "receipt_bot",
    about = "Review and correct receipt data extracted from photos, over LINE",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the LINE webhook
    Run(RunArgs),

    /// Load the configuration, report problems and exit
    CheckConfig(CheckConfigArgs),
}

// also a `Parser` so a bare invocation gets clap's defaults and env lookups
#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Seconds of inactivity after which a user's edit session is dropped
    #[arg(long, default_value_t = 1800)]
    session_timeout: u64,

    /// Log level or filter directive (e.g. info, debug, receipt_bot=trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for the rolling log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// OTLP/HTTP endpoint; logs and metrics are exported there instead of to files
    #[arg(long)]
    otel_endpoint: Option<String>,

    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[derive(Args, Debug)]
struct CheckConfigArgs {
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Run(RunArgs::parse_from(["run"])));
    match command {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig(args) => {
            let config_mgr = ConfigManager(EnvConfigManager::new(&args.env_file));
            match BotConfig::load(&config_mgr).await {
                Ok(config) => {
                    println!("✅ Configuration is valid.");
                    println!("   collector: {}", config.collector_url);
                    println!("   locale: {:?}, rename collisions: {:?}", config.locale, config.rename_policy);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("❌ {e}");
                    process::exit(1);
                }
            }
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let telemetry = Arc::new(
        init_tracing(&LogConfig::new(&args.log_level, args.log_dir.clone(), args.otel_endpoint.clone()))
            .context("could not set up logging")?,
    );

    info!("Receipt bot starting up…");
    println!("Receipt bot starting up…");

    let config_mgr = ConfigManager(EnvConfigManager::new(&args.env_file));
    let config = match BotConfig::load(&config_mgr).await {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            anyhow::bail!("invalid configuration: {e}");
        }
    };
    let catalog = Catalog::new(config.locale);

    let line = match &config.line_api_base {
        Some(base) => LineClient::with_bases(&config.line_access_token, base, DEFAULT_DATA_API_BASE)?,
        None => LineClient::new(&config.line_access_token)?,
    };
    let api: Arc<dyn MessagingApi> = Arc::new(line);

    let extractor = GeminiExtractor::new(
        &config.gemini_api_key,
        config.gemini_model.clone(),
        config.gemini_api_base.clone(),
    )?;
    let collector = HttpCollector::new(config.collector_url.as_str(), config.collector_timeout)?;
    let notifier = LineNotifier::new(api.clone(), catalog).with_telemetry(telemetry.clone());

    let (queue, jobs) = SubmissionQueue::new();
    let retry = RetryPolicy {
        retries: config.collector_retries,
        ..RetryPolicy::default()
    };
    let worker = SubmissionWorker::new(Arc::new(collector), Arc::new(notifier), retry).spawn(jobs);

    let editor = EditSession::new(
        InMemorySessionStore::new(args.session_timeout),
        Arc::new(extractor),
        queue,
        EditorSettings {
            label_width: config.label_width,
            rename_policy: config.rename_policy,
            catalog,
            prompt: RECEIPT_PROMPT.to_string(),
        },
    );

    let app = router(AppState {
        editor: Arc::new(editor),
        api,
        telemetry: telemetry.clone(),
        image_dir: config.image_dir.clone(),
    });

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("could not bind port {}", args.port))?;
    info!("Webhook listening on http://{}/callback", listener.local_addr()?);
    println!("Receipt bot running; press Ctrl‐C to exit");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("could not listen for Ctrl-C: {e}");
            }
        })
        .await?;

    println!("\nShutting down…");
    info!("Receipt bot shutting down");

    // the worker stops once every in-flight delivery has dropped its queue handle
    if tokio::time::timeout(Duration::from_secs(30), worker).await.is_err() {
        warn!("submission worker did not drain within 30s");
    }
    telemetry.shutdown();

    println!("Goodbye!");
    Ok(())
}
