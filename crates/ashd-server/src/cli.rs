//! Server CLI implementation.
//!
//! Provides command-line argument parsing for the ashd server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use ashd_core::constants::{DEFAULT_HELLO_TIMEOUT, DEFAULT_PORT};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for ashd_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => ashd_core::LogFormat::Text,
            CliLogFormat::Json => ashd_core::LogFormat::Json,
        }
    }
}

/// ashd server - audited shell sessions over a trusted socket.
#[derive(Debug, Parser)]
#[command(
    name = "ashd-server",
    version,
    about = "ashd server - audited shell sessions over a trusted socket"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long = "bind", default_value = "127.0.0.1")]
    pub bind_addr: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory for per-session audit and transcript logs
    #[arg(long = "log-dir", default_value = "/var/log/ashd", value_name = "DIR")]
    pub log_dir: PathBuf,

    /// Seconds a connection may idle before the hello is abandoned
    #[arg(
        long = "hello-timeout",
        default_value_t = DEFAULT_HELLO_TIMEOUT.as_secs(),
        value_name = "SECONDS"
    )]
    pub hello_timeout_secs: u64,

    /// Version string reported in startup logs (overrides the crate version)
    #[arg(long = "version-string", value_name = "STRING")]
    pub version_string: Option<String>,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Get the socket address to bind to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Get the hello timeout as a [`Duration`].
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    /// Version string to report in logs.
    pub fn server_version(&self) -> String {
        self.version_string
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            log_dir: PathBuf::from("/var/log/ashd"),
            hello_timeout_secs: DEFAULT_HELLO_TIMEOUT.as_secs(),
            version_string: None,
            verbose: 0,
            log_file: None,
            log_format: CliLogFormat::Text,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
