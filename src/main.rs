//! btlock - proximity-based second factor for the desktop
//!
//! Polls an authorization daemon over TLS pinned to a single certificate
//! and locks the workstation as soon as the daemon stops vouching for the
//! user:
//! - `run`: foreground agent
//! - `check`: one authorization cycle without locking
//! - `cert` / `configure`: certificate inspection and settings

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::mpsc;

use btlock::agent::{PollEvent, PollingController};
use btlock::cli::{Cli, Commands, ConfigureArgs, Display, RunArgs};
use btlock::error::AgentError;
use btlock::lock::SystemLockAction;
use btlock::protocol::decode_verdict;
use btlock::settings::AgentSettings;
use btlock::tls::{DaemonConnector, PinnedTlsConnector};
use btlock::trust::{CertificateStore, TrustAnchor};
use btlock::types::Verdict;

type Controller = PollingController<PinnedTlsConnector, SystemLockAction>;

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose);

    // Execute command
    if let Err(e) = execute(cli).await {
        let message = format!("{:#}", e);
        match e.downcast_ref::<AgentError>() {
            Some(agent_error) => Display::show_agent_error(&message, agent_error),
            None => Display::show_error(&message),
        }
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Run(args) => run_agent(&settings_path(cli.config)?, &args).await?,
        Commands::Check => check_once(&settings_path(cli.config)?).await?,
        Commands::Cert { path } => {
            let anchor = load_certificate(&path)?;
            Display::show_certificate(&path, &anchor);
        }
        Commands::Configure(args) => configure(&settings_path(cli.config)?, &args)?,
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
    }

    Ok(())
}

/// Resolves `--config` or the default settings location.
fn settings_path(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => Ok(AgentSettings::default_path()?),
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Runs the agent until Ctrl-C.
async fn run_agent(settings_path: &Path, args: &RunArgs) -> Result<()> {
    let settings = AgentSettings::load(settings_path)?;
    let store = Arc::new(CertificateStore::new());
    let lock = settings.lock_action()?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PollEvent>();
    let controller = PollingController::new(
        Arc::clone(&store),
        Arc::new(PinnedTlsConnector::new()),
        Arc::new(lock),
    )
    .with_events(event_tx);

    if args.activate || settings.start_silently {
        activate(&controller, &settings).await?;
    } else {
        Display::show_idle();
    }

    let mut toggle = ToggleSignal::new()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down");
                controller.deactivate().await;
                break;
            }
            Some(event) = event_rx.recv() => Display::show_event(&event),
            _ = toggle.recv() => {
                if controller.is_active() {
                    controller.deactivate().await;
                } else {
                    // Settings may have changed since the agent started.
                    let result = match AgentSettings::load(settings_path) {
                        Ok(settings) => activate(&controller, &settings).await,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = result {
                        Display::show_error(&format!("{:#}", e));
                    }
                }
            }
        }
    }

    // Print whatever the shutdown produced.
    while let Ok(event) = event_rx.try_recv() {
        Display::show_event(&event);
    }

    Ok(())
}

/// Loads the configured certificate and starts polling.
async fn activate(controller: &Controller, settings: &AgentSettings) -> Result<()> {
    let config = settings.client_config()?;
    controller
        .store()
        .load_configured(settings.cert_path.as_deref())
        .context("failed to load daemon certificate")?;
    controller.activate(config).await?;
    Ok(())
}

/// Runs one authorization cycle without locking.
async fn check_once(settings_path: &Path) -> Result<()> {
    let settings = AgentSettings::load(settings_path)?;
    let config = settings.client_config()?;
    let store = CertificateStore::new();
    let anchor = store
        .load_configured(settings.cert_path.as_deref())
        .context("failed to load daemon certificate")?;

    let connector = PinnedTlsConnector::new();
    let verdict = match connector.query(&config, &anchor).await {
        Ok(headers) => decode_verdict(&headers),
        Err(e) => Verdict::Indeterminate(e),
    };
    Display::show_verdict(&verdict);

    if !verdict.is_authorized() {
        bail!("presence was not confirmed ({})", verdict.as_str());
    }
    Ok(())
}

fn load_certificate(path: &Path) -> Result<TrustAnchor> {
    let bytes = std::fs::read(path)
        .map_err(|e| AgentError::CertFileMissing(format!("{}: {}", path.display(), e)))?;
    Ok(TrustAnchor::from_pem_or_der(&bytes)?)
}

/// Applies `args` to the saved settings after validating the result.
fn configure(settings_path: &Path, args: &ConfigureArgs) -> Result<()> {
    let mut settings = AgentSettings::load(settings_path)?;
    if args.is_empty() {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    args.apply_to(&mut settings);
    settings.validate()?;
    if let Some(cert) = &settings.cert_path {
        load_certificate(cert).context("certificate check failed")?;
    }

    settings.save(settings_path)?;
    Display::show_settings(settings_path, &settings);
    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Activation toggle
// ============================================================================

/// `SIGUSR1` toggles activation.
#[cfg(unix)]
struct ToggleSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ToggleSignal {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let sig = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
        Ok(Self(sig))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// No toggle signal on this platform.
#[cfg(not(unix))]
struct ToggleSignal;

#[cfg(not(unix))]
impl ToggleSignal {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
