//! Optional configuration file with server defaults.
//!
//! The file uses a small `key = value` subset of TOML:
//!
//! ```text
//! root = "/srv/share"
//! bind = "0.0.0.0"
//! port = 8080
//! chunk_size_kib = 64      # 4..=1024
//! channel_capacity = 4     # 1..=64
//! empty_dirs = true
//! verbosity = "verbose"    # default | verbose | quiet | debug
//! ```
//!
//! Values given on the command line always win over the file.

use std::env;
use std::fs;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Accepted range for `chunk_size_kib`.
pub const CHUNK_SIZE_KIB_RANGE: RangeInclusive<u32> = 4..=1024;

/// Accepted range for `channel_capacity`.
pub const CHANNEL_CAPACITY_RANGE: RangeInclusive<u32> = 1..=64;

/// Errors from reading or parsing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not of the form `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// A key is not recognized.
    #[error("unknown configuration key '{key}' on line {line}")]
    UnknownKey {
        /// The unrecognized key.
        key: String,
        /// 1-based line number.
        line: usize,
    },

    /// A value could not be parsed for its key.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    InvalidValue {
        /// The key being set.
        key: &'static str,
        /// 1-based line number.
        line: usize,
        /// What was expected.
        reason: String,
    },

    /// A value parsed but lies outside its accepted range.
    #[error("invalid config value for `{key}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// The key being set.
        key: &'static str,
        /// The rejected value.
        value: u64,
        /// The accepted range, for display.
        expected: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            line,
            reason: reason.into(),
        }
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    /// `info` level.
    Default,
    /// `debug` level.
    Verbose,
    /// Errors only.
    Quiet,
    /// `trace` level.
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }

    /// Default log filter for this setting.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Values read from the configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Directory to serve.
    pub root: Option<PathBuf>,
    /// Address to bind.
    pub bind: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Archive chunk size in KiB.
    pub chunk_size_kib: Option<u32>,
    /// Chunks buffered per archive session.
    pub channel_capacity: Option<u32>,
    /// Emit entries for empty directories in archives.
    pub empty_dirs: Option<bool>,
    /// Log verbosity.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Checks numeric values against their accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first value out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("chunk_size_kib", self.chunk_size_kib, &CHUNK_SIZE_KIB_RANGE)?;
        check_range("channel_capacity", self.channel_capacity, &CHANNEL_CAPACITY_RANGE)?;
        Ok(())
    }
}

fn check_range(
    key: &'static str,
    value: Option<u32>,
    range: &RangeInclusive<u32>,
) -> Result<(), ConfigError> {
    match value {
        Some(value) if !range.contains(&value) => Err(ConfigError::OutOfRange {
            key,
            value: u64::from(value),
            expected: format!("{}..={}", range.start(), range.end()),
        }),
        _ => Ok(()),
    }
}

/// Config file location and contents, if one was found.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when the file exists.
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// True if a config file was read.
    #[must_use]
    pub fn loaded_from_file(&self) -> bool {
        self.config.is_some()
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/dirserve/config.toml`
/// 2. `$HOME/.config/dirserve/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("dirserve")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("dirserve")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config from the default path if the file exists.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_default_file_config() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path) if path.exists() => Some(load_file_config(path)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

/// Loads and parses a config file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read, or the parse
/// error of [`parse_config_str`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&raw)
}

/// Parses config text.
///
/// # Errors
///
/// Returns the first syntax, key, value or range error found.
pub fn parse_config_str(raw: &str) -> Result<FileConfig, ConfigError> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax { line: line_no });
        };
        let value = raw_value.trim();

        match raw_key.trim() {
            "root" => {
                let parsed = parse_string_literal("root", line_no, value)?;
                cfg.root = Some(PathBuf::from(parsed));
            }
            "bind" => {
                let parsed = parse_string_literal("bind", line_no, value)?;
                let addr = parsed.parse::<IpAddr>().map_err(|_| {
                    ConfigError::invalid("bind", line_no, format!("'{parsed}' is not an IP address"))
                })?;
                cfg.bind = Some(addr);
            }
            "port" => {
                let parsed = parse_integer("port", line_no, value)?;
                let port = u16::try_from(parsed).map_err(|_| {
                    ConfigError::invalid("port", line_no, "integer value out of range for a port")
                })?;
                cfg.port = Some(port);
            }
            "chunk_size_kib" => {
                cfg.chunk_size_kib = Some(parse_u32("chunk_size_kib", line_no, value)?);
            }
            "channel_capacity" => {
                cfg.channel_capacity = Some(parse_u32("channel_capacity", line_no, value)?);
            }
            "empty_dirs" => {
                cfg.empty_dirs = Some(parse_boolean("empty_dirs", line_no, value)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal("verbosity", line_no, value)?;
                cfg.verbosity = Some(parse_verbosity(line_no, &parsed)?);
            }
            unknown => {
                return Err(ConfigError::UnknownKey {
                    key: unknown.to_string(),
                    line: line_no,
                });
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(key: &'static str, line: usize, raw: &str) -> Result<String, ConfigError> {
    if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"') {
        return Err(ConfigError::invalid(key, line, "expected double-quoted string"));
    }
    Ok(raw[1..raw.len() - 1].to_string())
}

fn parse_integer(key: &'static str, line: usize, raw: &str) -> Result<u64, ConfigError> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(ConfigError::invalid(key, line, "expected integer value"));
    }
    token
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(key, line, format!("expected non-negative integer ({e})")))
}

fn parse_u32(key: &'static str, line: usize, raw: &str) -> Result<u32, ConfigError> {
    let value = parse_integer(key, line, raw)?;
    u32::try_from(value).map_err(|_| ConfigError::invalid(key, line, "integer value out of range"))
}

fn parse_boolean(key: &'static str, line: usize, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::invalid(key, line, "expected 'true' or 'false'")),
    }
}

fn parse_verbosity(line: usize, value: &str) -> Result<VerbositySetting, ConfigError> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        other => Err(ConfigError::invalid(
            "verbosity",
            line,
            format!("'{other}' is not one of: default, verbose, quiet, debug"),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_parse_config_full() {
        let cfg = parse_config_str(
            r#"
root = "/srv/share"
bind = "0.0.0.0"
port = 9000
chunk_size_kib = 128
channel_capacity = 8
empty_dirs = true
verbosity = "verbose"
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.root, Some(PathBuf::from("/srv/share")));
        assert_eq!(cfg.bind, Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert_eq!(cfg.port, Some(9000));
        assert_eq!(cfg.chunk_size_kib, Some(128));
        assert_eq!(cfg.channel_capacity, Some(8));
        assert_eq!(cfg.empty_dirs, Some(true));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str("port = 8081").expect("partial config should parse");
        assert_eq!(cfg.port, Some(8081));
        assert!(cfg.root.is_none());
        assert!(cfg.verbosity.is_none());
    }

    #[test]
    fn test_parse_config_empty_is_default() {
        let cfg = parse_config_str("\n# only a comment\n\n").unwrap();
        assert_eq!(cfg, FileConfig::default());
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
root = "/data/#archive" # hash inside the string is kept
channel_capacity = 2 # small buffer
"#,
        )
        .unwrap();
        assert_eq!(cfg.root, Some(PathBuf::from("/data/#archive")));
        assert_eq!(cfg.channel_capacity, Some(2));
    }

    #[test]
    fn test_parse_config_rejects_chunk_size_out_of_range() {
        let err = parse_config_str("chunk_size_kib = 2").expect_err("below range");
        assert!(matches!(err, ConfigError::OutOfRange { key: "chunk_size_kib", .. }));
        assert!(err.to_string().contains("4..=1024"));

        let err = parse_config_str("chunk_size_kib = 1025").expect_err("above range");
        assert!(err.to_string().contains("chunk_size_kib"));
    }

    #[test]
    fn test_parse_config_rejects_zero_channel_capacity() {
        let err = parse_config_str("channel_capacity = 0").expect_err("zero capacity");
        assert!(err.to_string().contains("channel_capacity"));
    }

    #[test]
    fn test_parse_config_rejects_port_too_large() {
        let err = parse_config_str("port = 70000").expect_err("port out of range");
        assert!(matches!(err, ConfigError::InvalidValue { key: "port", line: 1, .. }));
    }

    #[test]
    fn test_parse_config_rejects_negative_and_trailing_tokens() {
        let err = parse_config_str("port = -1").expect_err("negative port");
        assert!(err.to_string().contains("port"));
        let err = parse_config_str("port = 80 trailing").expect_err("trailing token");
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_parse_config_rejects_bad_bind() {
        let err = parse_config_str("bind = \"localhost:80\"").expect_err("not an IP");
        assert!(err.to_string().contains("bind"));
        let err = parse_config_str("bind = 127.0.0.1").expect_err("unquoted");
        assert!(err.to_string().contains("double-quoted"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_boolean() {
        let err = parse_config_str("empty_dirs = yes").expect_err("invalid boolean");
        assert!(err.to_string().contains("empty_dirs"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_verbosity() {
        let err = parse_config_str("verbosity = \"loud\"").expect_err("unknown verbosity");
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys_with_line() {
        let err = parse_config_str("port = 1\nunknown_key = 123").expect_err("unknown key");
        match err {
            ConfigError::UnknownKey { key, line } => {
                assert_eq!(key, "unknown_key");
                assert_eq!(line, 2);
            }
            other => panic!("Expected UnknownKey, got: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("\n\nport 8080").expect_err("syntax error");
        assert!(matches!(err, ConfigError::Syntax { line: 3 }));
    }

    #[test]
    fn test_verbosity_labels_and_levels() {
        assert_eq!(VerbositySetting::Default.as_str(), "default");
        assert_eq!(VerbositySetting::Quiet.as_str(), "quiet");
        assert_eq!(VerbositySetting::Default.log_level(), "info");
        assert_eq!(VerbositySetting::Verbose.log_level(), "debug");
        assert_eq!(VerbositySetting::Quiet.log_level(), "error");
        assert_eq!(VerbositySetting::Debug.log_level(), "trace");
    }

    #[test]
    fn test_load_file_config_reads_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "empty_dirs = false\n").unwrap();
        let cfg = load_file_config(&path).unwrap();
        assert_eq!(cfg.empty_dirs, Some(false));
    }

    #[test]
    fn test_load_file_config_missing_file_is_read_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = load_file_config(&temp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
