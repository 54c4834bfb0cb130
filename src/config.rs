//! Typed runtime configuration derived from the CLI.

use std::fmt;
use std::path::PathBuf;

use crate::cli::{Cli, ModeCommand};

/// Which preview flavor the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Batch,
    Streaming,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Batch => f.write_str("batch"),
            Mode::Streaming => f.write_str("streaming"),
        }
    }
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_host: String,
    pub port: u16,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub use_full_chrome: bool,
    pub static_dir: Option<PathBuf>,
    pub verbose: bool,
    pub mode: Mode,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let mode = match cli.mode {
            Some(ModeCommand::Batch) => Mode::Batch,
            Some(ModeCommand::Streaming) | None => Mode::Streaming,
        };
        Self {
            proxy_host: cli.proxy_host,
            port: cli.port,
            cert_file: cli.cert_file,
            key_file: cli.key_file,
            use_full_chrome: cli.use_full_chrome,
            static_dir: cli.static_dir,
            verbose: cli.verbose,
            mode,
        }
    }
}
