//! Command line interface for the `wirechain` demo server.
//!
//! Shared with `build.rs`, which renders the man page from it, so it only
//! depends on `clap` and the standard library.

use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, ValueEnum};

/// Protocol spoken by the demo server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    /// Answer every HTTP request with its path.
    #[default]
    Http,
    /// Accept WebSocket upgrades and echo data frames.
    Websocket,
}

/// Command line arguments for the `wirechain` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wirechain",
    version,
    about = "Demo echo server built on the wirechain filter chain"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Protocol to serve.
    #[arg(short, long, value_enum, default_value_t = Protocol::Http)]
    pub protocol: Protocol,

    /// Worker tasks running HTTP handlers. Defaults to available parallelism.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Longest accepted request or header line in bytes.
    #[arg(long)]
    pub max_line_length: Option<usize>,

    /// Directory for request bodies spilled to disk.
    #[arg(long)]
    pub spill_dir: Option<PathBuf>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Protocol};

    #[test]
    fn defaults_to_http_on_loopback() {
        let cli = Cli::parse_from(["wirechain"]);
        assert_eq!(cli.bind, "127.0.0.1:8080".parse().expect("valid addr"));
        assert_eq!(cli.protocol, Protocol::Http);
        assert!(cli.workers.is_none());
    }

    #[test]
    fn parses_decoder_options() {
        let cli = Cli::parse_from([
            "wirechain",
            "--protocol",
            "websocket",
            "--workers",
            "3",
            "--max-line-length",
            "1024",
            "--spill-dir",
            "/var/tmp",
        ]);
        assert_eq!(cli.protocol, Protocol::Websocket);
        assert_eq!(cli.workers, Some(3));
        assert_eq!(cli.max_line_length, Some(1024));
        assert_eq!(cli.spill_dir.as_deref(), Some(std::path::Path::new("/var/tmp")));
    }
}
