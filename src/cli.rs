//! CLI argument definitions using clap derive macros.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

use dirserve_core::DEFAULT_CHANNEL_CAPACITY;

/// Default listen address.
pub const DEFAULT_BIND: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default archive chunk size in KiB.
pub const DEFAULT_CHUNK_SIZE_KIB: u32 = 64;

/// Serve a directory over HTTP.
///
/// Directories can be browsed as HTML or JSON and downloaded as a tar
/// archive that is streamed as it is built.
#[derive(Parser, Debug)]
#[command(name = "dirserve")]
#[command(author, version, about)]
pub struct Args {
    /// Directory to serve (defaults to the config file's `root`, then the current directory)
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Address to bind
    #[arg(short = 'b', long, default_value_t = DEFAULT_BIND)]
    pub bind: IpAddr,

    /// Port to listen on (0 picks a free port)
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Archive chunk size in KiB (4-1024)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE_KIB, value_parser = clap::value_parser!(u32).range(4..=1024))]
    pub chunk_size_kib: u32,

    /// Chunks buffered per archive download (1-64)
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY as u32, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub channel_capacity: u32,

    /// Include empty directories in archives
    #[arg(long)]
    pub empty_dirs: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
