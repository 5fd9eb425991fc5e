//! Tavern CLI - boots a session and renders the selected character's scene.
//!
//! # Flow
//!
//! ```text
//! main() -> config + transport -> Bootstrap::run() ---> BootEvent stream (stdout)
//!                                        |
//!                                        v
//!                          BootState::Ready -> Compositor -> PNG
//! ```
//!
//! Ctrl-C sets the teardown flag: calls already on the wire finish, nothing
//! after them is committed, and the process exits without rendering.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tavern_config::TavernConfig;
use tavern_engine::{BootEvent, BootPolicies, BootState, Bootstrap, Teardown};
use tavern_net::{GameApi, HttpGameApi, Transport, tavern_types::DeviceProfile};
use tavern_scene::{
    CompositionOutcome, CompositionRequest, Compositor, HttpImageFetcher, ImageLoadCache,
};

const DEFAULT_SCENE_OUTPUT: &str = "scene.png";

#[derive(Parser)]
#[command(name = "tavern")]
#[command(about = "Boot a Tavern session and render the selected character's scene")]
struct Cli {
    /// Config file (default: ~/.tavern/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where to write the composed scene PNG
    #[arg(long)]
    out: Option<PathBuf>,
    /// Device account id sent with the identity call
    #[arg(long)]
    device_id: Option<String>,
    /// Device account display name
    #[arg(long)]
    device_name: Option<String>,
    /// Device account photo URL
    #[arg(long)]
    photo_url: Option<String>,
}

impl Cli {
    /// Command-line values win over the config file field by field.
    fn device_profile(&self, config: &TavernConfig) -> Result<DeviceProfile> {
        let configured = config.device_profile();
        let Some(device_user_id) = self
            .device_id
            .clone()
            .or_else(|| configured.as_ref().map(|d| d.device_user_id.clone()))
        else {
            bail!("no device id: pass --device-id or set [device] user_id in the config");
        };

        Ok(DeviceProfile {
            device_user_name: self
                .device_name
                .clone()
                .or_else(|| configured.as_ref().map(|d| d.device_user_name.clone()))
                .unwrap_or_else(|| device_user_id.clone()),
            device_user_photo_url: self
                .photo_url
                .clone()
                .or_else(|| configured.and_then(|d| d.device_user_photo_url)),
            device_user_id,
        })
    }

    fn load_config(&self) -> Result<TavernConfig> {
        match &self.config {
            Some(path) => Ok(TavernConfig::load_from(path)?),
            None => Ok(TavernConfig::load()?.unwrap_or_default()),
        }
    }
}

/// Log to the first candidate file that opens. Progress owns stdout, so with
/// no usable file nothing is logged at all.
fn init_tracing(config: &TavernConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let mut failures = Vec::new();
    let opened = config
        .log_file_candidates()
        .into_iter()
        .find_map(|candidate| match open_log_file(&candidate) {
            Ok(file) => Some((candidate, file)),
            Err(e) => {
                failures.push(format!("{}: {e}", candidate.display()));
                None
            }
        });

    let Some((log_path, file)) = opened else {
        tracing_subscriber::registry().with(env_filter).init();
        return;
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(env_filter)
        .init();
    tracing::info!(path = %log_path.display(), "Logging initialized");
    for failure in failures {
        tracing::warn!("Skipped log file {failure}");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn render_event(event: &BootEvent) {
    match event {
        BootEvent::StageCompleted {
            stage,
            attempts,
            completed,
            total,
        } => {
            if *attempts > 1 {
                println!("[{completed}/{total}] {stage} (after {attempts} attempts)");
            } else {
                println!("[{completed}/{total}] {stage}");
            }
        }
        BootEvent::SelectionResolved { entity } => println!("      selected entity {entity}"),
        BootEvent::Ready => println!("Session ready."),
        // Reported once, by main's error path.
        BootEvent::Failed { .. } => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config);

    let device = cli.device_profile(&config)?;
    let transport = Transport::new(config.transport_settings()?)?;
    tracing::info!(base_url = %transport.settings().base_url(), "Backend configured");

    let api: Arc<dyn GameApi> = Arc::new(HttpGameApi::new(transport.clone()));
    let bootstrap = Bootstrap::new(
        api,
        device,
        BootPolicies {
            identity: config.identity_policy(),
            calls: config.call_policy(),
        },
    );
    tracing::debug!(
        identity = ?bootstrap.policies().identity,
        calls = ?bootstrap.policies().calls,
        "Retry policies"
    );

    let teardown = Teardown::new();
    let interrupt = teardown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, letting in-flight calls finish...");
            interrupt.fire();
        }
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let progress = async {
        while let Some(event) = events_rx.recv().await {
            render_event(&event);
        }
    };
    let (result, ()) = tokio::join!(bootstrap.run(&teardown, Some(events_tx)), progress);

    let session = match BootState::settle(result) {
        None => return Ok(()),
        Some(BootState::Failed(err)) => return Err(err).context("bootstrap failed"),
        Some(BootState::Ready(session)) => session,
        Some(BootState::Loading) => bail!("bootstrap settled while still loading"),
    };

    println!(
        "User {} | entity {} | energy {} | {} notifications | {} interactions",
        session.user_id(),
        session.selected_entity(),
        session.account.energy,
        session.account.notification_count,
        session.selected.interactions.len(),
    );

    let out = cli
        .out
        .clone()
        .or_else(|| config.scene_output().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCENE_OUTPUT));

    let cache = Arc::new(ImageLoadCache::new(Arc::new(HttpImageFetcher::new(
        transport,
    ))));
    let compositor = Compositor::new(cache);
    let request = CompositionRequest::from_scene(&session.selected.scene);

    match compositor.compose(request).await? {
        CompositionOutcome::Ready(composite) => {
            composite
                .image
                .save(&out)
                .with_context(|| format!("failed to write {}", out.display()))?;
            if composite.dropped_layers > 0 {
                println!("{} overlay(s) could not be loaded", composite.dropped_layers);
            }
            println!("Scene written to {}", out.display());
        }
        CompositionOutcome::Superseded { sequence, latest } => {
            tracing::warn!(sequence, latest, "Scene composition superseded");
        }
    }

    Ok(())
}
