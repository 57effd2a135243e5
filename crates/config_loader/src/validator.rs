//! Configuration validation
//!
//! Rules:
//! - bind address parses as a socket address
//! - capacities, sizes and timeouts are > 0
//! - accept_timeout_ms <= read_timeout_ms
//! - clock-sync timeout shorter than the sync interval
//! - 0 <= default_quality_threshold <= 1
//! - min_samples >= 2 and history_capacity >= min_samples

use std::net::SocketAddr;

use contracts::{
    ClockSyncConfig, ContractError, CoordinatorConfig, DispatcherConfig, NetworkConfig,
    SessionConfig,
};

/// Validate a CoordinatorConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &CoordinatorConfig) -> Result<(), ContractError> {
    validate_network(&config.network)?;
    validate_clock_sync(&config.clock_sync)?;
    validate_session(&config.session)?;
    validate_dispatcher(&config.dispatcher)?;
    Ok(())
}

fn positive(field: &str, value: u64) -> Result<(), ContractError> {
    if value == 0 {
        return Err(ContractError::config_validation(field, "must be > 0"));
    }
    Ok(())
}

fn validate_network(network: &NetworkConfig) -> Result<(), ContractError> {
    network.bind_addr.parse::<SocketAddr>().map_err(|e| {
        ContractError::config_validation(
            "network.bind_addr",
            format!("'{}' is not a socket address: {e}", network.bind_addr),
        )
    })?;
    positive("network.accept_timeout_ms", network.accept_timeout_ms)?;
    positive("network.read_timeout_ms", network.read_timeout_ms)?;
    positive("network.write_timeout_ms", network.write_timeout_ms)?;
    positive("network.max_frame_bytes", network.max_frame_bytes as u64)?;

    if network.accept_timeout_ms > network.read_timeout_ms {
        return Err(ContractError::config_validation(
            "network.accept_timeout_ms / network.read_timeout_ms",
            format!(
                "accept_timeout_ms ({}) must be <= read_timeout_ms ({})",
                network.accept_timeout_ms, network.read_timeout_ms
            ),
        ));
    }
    Ok(())
}

fn validate_clock_sync(sync: &ClockSyncConfig) -> Result<(), ContractError> {
    positive("clock_sync.port", sync.port as u64)?;
    positive("clock_sync.interval_ms", sync.interval_ms)?;
    positive("clock_sync.timeout_ms", sync.timeout_ms)?;
    positive("clock_sync.stats_window_s", sync.stats_window_s)?;
    positive("clock_sync.burst_samples", sync.burst_samples as u64)?;

    if sync.timeout_ms >= sync.interval_ms {
        return Err(ContractError::config_validation(
            "clock_sync.timeout_ms",
            format!(
                "timeout_ms ({}) must be < interval_ms ({})",
                sync.timeout_ms, sync.interval_ms
            ),
        ));
    }
    if sync.min_samples < 2 {
        return Err(ContractError::config_validation(
            "clock_sync.min_samples",
            format!("min_samples must be >= 2, got {}", sync.min_samples),
        ));
    }
    if sync.history_capacity < sync.min_samples {
        return Err(ContractError::config_validation(
            "clock_sync.history_capacity",
            format!(
                "history_capacity ({}) must be >= min_samples ({})",
                sync.history_capacity, sync.min_samples
            ),
        ));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ContractError> {
    positive(
        "session.default_target_images",
        session.default_target_images as u64,
    )?;
    positive("session.min_stereo_pairs", session.min_stereo_pairs as u64)?;

    let threshold = session.default_quality_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ContractError::config_validation(
            "session.default_quality_threshold",
            format!("must be within [0, 1], got {threshold}"),
        ));
    }
    Ok(())
}

fn validate_dispatcher(dispatcher: &DispatcherConfig) -> Result<(), ContractError> {
    positive(
        "dispatcher.inbound_capacity",
        dispatcher.inbound_capacity as u64,
    )?;
    positive(
        "dispatcher.outbound_capacity",
        dispatcher.outbound_capacity as u64,
    )?;
    Ok(())
}
