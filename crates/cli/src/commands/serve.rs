//! `serve` command implementation.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use config_loader::ConfigLoader;
use contracts::{CoordinatorConfig, SessionConfig};
use coordinator::{CoordinatorService, SessionError, SessionParams};

use super::shutdown_signal;
use crate::cli::ServeArgs;
use crate::error::CliError;

const SESSION_POLL: Duration = Duration::from_millis(500);

/// Execute the `serve` command
pub async fn run_serve(args: &ServeArgs) -> Result<()> {
    let config = load_config(args)?;

    info!(
        bind = %config.network.bind_addr,
        clock_port = config.clock_sync.port,
        sync_interval_ms = config.clock_sync.interval_ms,
        require_sync_quality = config.session.require_sync_quality,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let service = CoordinatorService::builder(config).build();
    if service.config().session.auto_calibrate && service.pipeline().is_none() {
        warn!("No geometry backend linked; sessions will stop at stereo calibration");
    }

    let addr = service
        .start()
        .await
        .context("Failed to start coordinator")?;
    info!(addr = %addr, "Waiting for devices...");

    let outcome = serve_until_shutdown(&service, args).await;

    service.stop().await;
    info!("Calibration coordinator finished");
    outcome
}

fn load_config(args: &ServeArgs) -> Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            info!(config = %path.display(), "Loading configuration");
            ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            CoordinatorConfig::default()
        }
    };
    apply_overrides(&mut config, args)?;
    ConfigLoader::validate(&config).context("Configuration invalid after overrides")?;
    Ok(config)
}

fn apply_overrides(config: &mut CoordinatorConfig, args: &ServeArgs) -> Result<(), CliError> {
    if let Some(bind) = &args.bind {
        bind.parse::<SocketAddr>()
            .map_err(|e| CliError::invalid_override("bind", e.to_string()))?;
        info!(bind = %bind, "Overriding listener address from CLI");
        config.network.bind_addr = bind.clone();
    }
    if let Some(port) = args.clock_port {
        if port == 0 {
            return Err(CliError::invalid_override("clock-port", "port must be non-zero"));
        }
        info!(port, "Overriding clock responder port from CLI");
        config.clock_sync.port = port;
    }
    Ok(())
}

async fn serve_until_shutdown(service: &CoordinatorService, args: &ServeArgs) -> Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut launcher = args
        .session
        .as_deref()
        .map(|id| SessionLauncher::from_args(id, args, &service.config().session));
    let mut session_poll = interval(SESSION_POLL);
    session_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let status_enabled = args.status_interval > 0;
    let mut status = interval(Duration::from_secs(args.status_interval.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let launching = launcher.as_ref().is_some_and(SessionLauncher::is_pending);
        tokio::select! {
            _ = &mut shutdown => {
                warn!("Received shutdown signal, stopping coordinator...");
                return Ok(());
            }
            _ = session_poll.tick(), if launching => {
                if let Some(launcher) = launcher.as_mut() {
                    if let Err(e) = launcher.poll(service) {
                        error!(error = %e, "Session not started; still serving devices");
                    }
                }
            }
            _ = status.tick(), if status_enabled => log_status(service),
        }
    }
}

/// Where the `--session` request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchState {
    AwaitingDevices,
    /// Created; start is retried until the sync gate opens
    Created,
    Started,
    Abandoned,
}

/// Creates the requested session once enough devices are connected, then
/// starts it as soon as clock sync allows.
struct SessionLauncher {
    session_id: String,
    wait_devices: usize,
    params: SessionParams,
    state: LaunchState,
    gate_logged: bool,
}

impl SessionLauncher {
    fn new(session_id: impl Into<String>, wait_devices: usize, params: SessionParams) -> Self {
        Self {
            session_id: session_id.into(),
            wait_devices,
            params,
            state: LaunchState::AwaitingDevices,
            gate_logged: false,
        }
    }

    fn from_args(session_id: &str, args: &ServeArgs, defaults: &SessionConfig) -> Self {
        let params = SessionParams::new(
            args.pattern,
            args.target_images.unwrap_or(defaults.default_target_images),
            args.quality_threshold
                .unwrap_or(defaults.default_quality_threshold),
        );
        Self::new(session_id, args.wait_devices, params)
    }

    fn is_pending(&self) -> bool {
        matches!(self.state, LaunchState::AwaitingDevices | LaunchState::Created)
    }

    /// Advance as far as currently possible. Errors other than a closed sync
    /// gate abandon the launch.
    fn poll(&mut self, service: &CoordinatorService) -> Result<LaunchState, CliError> {
        let sessions = service.sessions();

        if self.state == LaunchState::AwaitingDevices {
            let connected = service.registry().connected_count();
            if connected < self.wait_devices {
                return Ok(self.state);
            }
            if let Err(e) = sessions.create_session(&self.session_id, self.params.clone()) {
                return Err(self.abandon(e));
            }
            info!(session_id = %self.session_id, devices = connected, "Session created");
            self.state = LaunchState::Created;
        }

        if self.state == LaunchState::Created {
            match sessions.start_session(&self.session_id) {
                Ok(report) => {
                    info!(
                        session_id = %self.session_id,
                        delivered = report.delivered.len(),
                        failed = report.failed.len(),
                        "Session started"
                    );
                    self.state = LaunchState::Started;
                }
                Err(e @ (SessionError::SyncUnavailable { .. }
                | SessionError::SyncQualityInsufficient { .. })) => {
                    if self.gate_logged {
                        debug!(session_id = %self.session_id, reason = %e, "Sync gate still closed");
                    } else {
                        info!(session_id = %self.session_id, reason = %e, "Waiting for clock sync before starting");
                        self.gate_logged = true;
                    }
                }
                Err(e) => return Err(self.abandon(e)),
            }
        }
        Ok(self.state)
    }

    fn abandon(&mut self, e: SessionError) -> CliError {
        self.state = LaunchState::Abandoned;
        CliError::session(&self.session_id, e.to_string())
    }
}

fn log_status(service: &CoordinatorService) {
    let registry = service.registry();
    info!(
        connected = registry.connected_count(),
        known = registry.devices().len(),
        pending = service.dispatcher().pending(),
        processed = service.dispatcher().processed(),
        "Coordinator status"
    );

    for (device_id, link) in registry.link_metrics() {
        info!(
            device_id = %device_id,
            queued = link.queue_len,
            sent = link.sent(),
            failed = link.failed(),
            write_timeouts = link.write_timeouts,
            dropped = link.dropped,
            "Command delivery"
        );
    }

    for (device_id, sync) in service.scheduler().active_devices() {
        match sync.latest_statistics() {
            Some(stats) => info!(
                device_id = %device_id,
                offset_ms = stats.median_offset_ms,
                rtt_ms = stats.median_rtt_ms,
                quality = %stats.quality,
                "Clock sync"
            ),
            None => info!(
                device_id = %device_id,
                failures = sync.failure_count(),
                "Clock sync pending"
            ),
        }
    }

    let sessions = service.sessions();
    for session_id in sessions.sessions().ids() {
        if let Ok(view) = sessions.status(&session_id) {
            info!(
                session_id = %session_id,
                phase = %view.phase,
                progress = format!("{:.0}%", view.overall_progress * 100.0),
                cameras = view.camera_count,
                results = view.results.len(),
                "Session status"
            );
        }
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &CoordinatorConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Network:");
    println!("  Listener: {}", config.network.bind_addr);
    println!("  Read timeout: {} ms", config.network.read_timeout_ms);
    println!("  Write timeout: {} ms", config.network.write_timeout_ms);
    println!("  Max frame: {} bytes", config.network.max_frame_bytes);
    println!("\nClock sync:");
    println!("  Responder port: {}", config.clock_sync.port);
    println!("  Interval: {} ms", config.clock_sync.interval_ms);
    println!("  Method: {:?}", config.clock_sync.method);
    println!(
        "  Window: {} s (min {} samples)",
        config.clock_sync.stats_window_s, config.clock_sync.min_samples
    );
    println!("\nSessions:");
    println!(
        "  Target images: {}",
        config.session.default_target_images
    );
    println!(
        "  Quality threshold: {:.2}",
        config.session.default_quality_threshold
    );
    println!("  Min stereo pairs: {}", config.session.min_stereo_pairs);
    println!(
        "  Sync gate: {}",
        if config.session.require_sync_quality { "on" } else { "off" }
    );
    println!();
}
