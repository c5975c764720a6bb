//! Merges command-line arguments with the configuration file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use dirserve_core::{FileConfig, PipelineOptions, VerbositySetting, WalkOptions};

use crate::cli::Args;

/// Which arguments were given explicitly on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) root: bool,
    pub(crate) bind: bool,
    pub(crate) port: bool,
    pub(crate) chunk_size_kib: bool,
    pub(crate) channel_capacity: bool,
    pub(crate) empty_dirs: bool,
    pub(crate) verbose: bool,
    pub(crate) quiet: bool,
}

/// Effective server settings after merging.
#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub(crate) root: PathBuf,
    pub(crate) addr: SocketAddr,
    pub(crate) pipeline: PipelineOptions,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = sources_from_matches(&matches);
    (args, sources)
}

fn sources_from_matches(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        root: is_commandline_value(matches, "root"),
        bind: is_commandline_value(matches, "bind"),
        port: is_commandline_value(matches, "port"),
        chunk_size_kib: is_commandline_value(matches, "chunk_size_kib"),
        channel_capacity: is_commandline_value(matches, "channel_capacity"),
        empty_dirs: is_commandline_value(matches, "empty_dirs"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Fills every argument not given on the command line from the file config.
pub(crate) fn apply_config_defaults(
    mut args: Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Args {
    let Some(file_config) = file_config else {
        return args;
    };

    if !cli_sources.root
        && let Some(root) = &file_config.root
    {
        args.root = Some(root.clone());
    }

    if !cli_sources.bind
        && let Some(bind) = file_config.bind
    {
        args.bind = bind;
    }

    if !cli_sources.port
        && let Some(port) = file_config.port
    {
        args.port = port;
    }

    if !cli_sources.chunk_size_kib
        && let Some(chunk_size_kib) = file_config.chunk_size_kib
    {
        args.chunk_size_kib = chunk_size_kib;
    }

    if !cli_sources.channel_capacity
        && let Some(channel_capacity) = file_config.channel_capacity
    {
        args.channel_capacity = channel_capacity;
    }

    if !cli_sources.empty_dirs
        && let Some(empty_dirs) = file_config.empty_dirs
    {
        args.empty_dirs = empty_dirs;
    }

    if !cli_sources.verbose
        && !cli_sources.quiet
        && let Some(verbosity) = file_config.verbosity
    {
        apply_config_verbosity(&mut args, verbosity);
    }

    args
}

fn apply_config_verbosity(args: &mut Args, verbosity: VerbositySetting) {
    match verbosity {
        VerbositySetting::Default => {
            args.quiet = false;
            args.verbose = 0;
        }
        VerbositySetting::Verbose => {
            args.quiet = false;
            args.verbose = 1;
        }
        VerbositySetting::Quiet => {
            args.quiet = true;
            args.verbose = 0;
        }
        VerbositySetting::Debug => {
            args.quiet = false;
            args.verbose = 2;
        }
    }
}

/// Default log filter when `RUST_LOG` is not set.
pub(crate) fn resolve_default_log_level(args: &Args) -> &'static str {
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Builds the effective settings; the root falls back to the current directory.
pub(crate) fn resolve_settings(args: &Args) -> ServerSettings {
    ServerSettings {
        root: args.root.clone().unwrap_or_else(|| PathBuf::from(".")),
        addr: SocketAddr::new(args.bind, args.port),
        pipeline: PipelineOptions {
            chunk_size: args.chunk_size_kib as usize * 1024,
            channel_capacity: args.channel_capacity as usize,
            walk: WalkOptions {
                include_empty_dirs: args.empty_dirs,
            },
        },
    }
}
