//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::PatternType;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Calibration coordinator for multi-device stereo camera rigs
#[derive(Parser, Debug)]
#[command(
    name = "calib-coord",
    author,
    version,
    about = "Multi-device camera calibration coordinator",
    long_about = "Coordinates calibration sessions across networked capture devices.\n\n\
                  Accepts device connections, keeps device clocks synchronized, \n\
                  collects quality-gated calibration images and runs stereo calibration."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CALIB_COORD_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CALIB_COORD_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Filter used when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator until Ctrl+C / SIGTERM
    Serve(ServeArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Answer clock-sync requests as a device would
    Respond(RespondArgs),
}

/// Arguments for the `serve` command
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "CALIB_COORD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the device listener address
    #[arg(long, env = "CALIB_COORD_BIND")]
    pub bind: Option<String>,

    /// Override the device clock responder port
    #[arg(long, env = "CALIB_COORD_CLOCK_PORT")]
    pub clock_port: Option<u16>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CALIB_COORD_METRICS_PORT")]
    pub metrics_port: u16,

    /// Seconds between status log lines (0 = disabled)
    #[arg(long, default_value = "30")]
    pub status_interval: u64,

    /// Create and start this session once enough devices are connected
    #[arg(long)]
    pub session: Option<String>,

    /// Connected devices required before the session starts
    #[arg(long, default_value = "1")]
    pub wait_devices: usize,

    /// Calibration pattern for the session
    #[arg(long, default_value = "chessboard")]
    pub pattern: PatternType,

    /// Images per camera (defaults to session.default_target_images)
    #[arg(long, requires = "session")]
    pub target_images: Option<usize>,

    /// Acceptance threshold (defaults to session.default_quality_threshold)
    #[arg(long, requires = "session")]
    pub quality_threshold: Option<f64>,

    /// Validate configuration and exit without starting
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `respond` command
#[derive(Parser, Debug)]
pub struct RespondArgs {
    /// UDP address to answer on
    #[arg(long, default_value = "0.0.0.0:8123", env = "CALIB_COORD_RESPOND_BIND")]
    pub bind: SocketAddr,

    /// Report timestamps shifted by this many milliseconds
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub offset_ms: f64,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_session_flags() {
        let cli = Cli::parse_from([
            "calib-coord",
            "-v",
            "serve",
            "--session",
            "s1",
            "--pattern",
            "circle_grid",
            "--wait-devices",
            "2",
        ]);
        assert_eq!(cli.log_level(), "debug");
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.session.as_deref(), Some("s1"));
        assert_eq!(args.pattern, PatternType::CircleGrid);
        assert_eq!(args.wait_devices, 2);
    }

    #[test]
    fn test_session_flags_require_session() {
        let result = Cli::try_parse_from(["calib-coord", "serve", "--target-images", "5"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_respond_negative_offset() {
        let cli = Cli::parse_from(["calib-coord", "-q", "respond", "--offset-ms", "-12.5"]);
        assert_eq!(cli.log_level(), "warn");
        let Commands::Respond(args) = cli.command else {
            panic!("expected respond");
        };
        assert_eq!(args.offset_ms, -12.5);
        assert_eq!(args.bind.port(), 8123);
    }
}
