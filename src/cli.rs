//! CLI definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Server-side rendering proxy. Marked requests are rendered in pooled
/// headless Chrome instances; the result comes back as sanitized HTML
/// (batch) or as a stream of DOM updates applied by a client stub
/// (streaming).
#[derive(Debug, Parser)]
#[command(name = "preview-proxy")]
#[command(version)]
pub struct Cli {
    /// The host this proxy is reachable under.
    #[arg(long, default_value = "localhost")]
    pub proxy_host: String,

    /// The port the proxy listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// The SSL certificate file (PEM).
    #[arg(long, default_value = "mycert.pem")]
    pub cert_file: PathBuf,

    /// The SSL key file (PEM).
    #[arg(long, default_value = "mykey.pem")]
    pub key_file: PathBuf,

    /// Run Chrome with its graphical interface instead of headless.
    #[arg(long)]
    pub use_full_chrome: bool,

    /// Directory with the shell template and JS bundle; falls back to the
    /// embedded copies.
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub mode: Option<ModeCommand>,
}

/// Which preview flavor to serve. Streaming is the default.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ModeCommand {
    /// Serve whole sanitized documents, one response per preview.
    Batch,
    /// Serve the shell page plus an incremental DOM update stream.
    Streaming,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_flag_values() {
        let cli = Cli::parse_from(["preview-proxy"]);
        assert_eq!(cli.proxy_host, "localhost");
        assert_eq!(cli.port, 8080);
        assert!(!cli.use_full_chrome);
        assert!(!cli.verbose);
        assert!(cli.mode.is_none());
    }

    #[test]
    fn mode_subcommands_parse() {
        let cli = Cli::parse_from(["preview-proxy", "--port", "9443", "batch"]);
        assert_eq!(cli.port, 9443);
        assert!(matches!(cli.mode, Some(ModeCommand::Batch)));
    }
}
