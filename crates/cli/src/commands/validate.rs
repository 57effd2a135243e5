//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::CoordinatorConfig;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    bind_addr: String,
    clock_port: u16,
    sync_interval_ms: u64,
    target_images: usize,
    quality_threshold: f64,
    min_stereo_pairs: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    bind_addr: config.network.bind_addr.clone(),
                    clock_port: config.clock_sync.port,
                    sync_interval_ms: config.clock_sync.interval_ms,
                    target_images: config.session.default_target_images,
                    quality_threshold: config.session.default_quality_threshold,
                    min_stereo_pairs: config.session.min_stereo_pairs,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &CoordinatorConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.session.require_sync_quality {
        warnings.push(
            "session.require_sync_quality is off - phases advance without synchronized clocks"
                .to_string(),
        );
    }

    if config.session.min_stereo_pairs > config.session.default_target_images {
        warnings.push(format!(
            "session.min_stereo_pairs ({}) exceeds default_target_images ({}) - default sessions can never calibrate",
            config.session.min_stereo_pairs, config.session.default_target_images
        ));
    }

    let window_ms = config.clock_sync.stats_window_s.saturating_mul(1000);
    let samples_in_window = window_ms / config.clock_sync.interval_ms.max(1);
    if samples_in_window < config.clock_sync.min_samples as u64 {
        warnings.push(format!(
            "clock_sync.stats_window_s holds only {} measurements at the configured interval (min_samples = {})",
            samples_in_window, config.clock_sync.min_samples
        ));
    }

    if config.network.bind_addr.starts_with("127.") {
        warnings.push("network.bind_addr is loopback - remote devices cannot connect".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Listener: {}", summary.bind_addr);
            println!("  Clock port: {}", summary.clock_port);
            println!("  Sync interval: {} ms", summary.sync_interval_ms);
            println!("  Target images: {}", summary.target_images);
            println!("  Quality threshold: {:.2}", summary.quality_threshold);
            println!("  Min stereo pairs: {}", summary.min_stereo_pairs);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let result = validate_config(&ValidateArgs {
            config: PathBuf::from("/nonexistent/coordinator.toml"),
            json: true,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[test]
    fn test_valid_config_summary_and_warnings() {
        let file = write_config(
            "[network]\nbind_addr = \"127.0.0.1:9000\"\n\n[session]\nrequire_sync_quality = false\n",
        );
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        });
        assert!(result.valid);
        assert_eq!(result.summary.unwrap().bind_addr, "127.0.0.1:9000");
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_rule_violation_is_reported() {
        let file = write_config("[session]\ndefault_quality_threshold = 1.5\n");
        let result = validate_config(&ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("default_quality_threshold"));
    }
}
