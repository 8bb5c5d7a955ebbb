//! File configuration and resolved runtime settings.
//!
//! The file is a flat `key = value` list: `#` starts a comment, strings are
//! double-quoted, booleans are `true`/`false`. Unknown keys are rejected.
//!
//! ```text
//! output_dir = "/data/reports"
//! workers = 4            # download workers
//! structured_source = "eastmoney"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::crawler::{DEFAULT_LIMIT, DEFAULT_WORKERS, MAX_LIMIT, MAX_WORKERS, MIN_WORKERS};

const APP_DIR: &str = "report-crawler";
const CONFIG_FILE: &str = "config.toml";

/// Env var consulted when no token is configured.
pub const TUSHARE_TOKEN_ENV: &str = "TUSHARE_TOKEN";

/// Which structured source, if any, replaces list-page scraping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructuredSourceSetting {
    #[default]
    None,
    Eastmoney,
    Tushare,
}

impl StructuredSourceSetting {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Eastmoney => "eastmoney",
            Self::Tushare => "tushare",
        }
    }
}

impl std::str::FromStr for StructuredSourceSetting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "none" => Ok(Self::None),
            "eastmoney" => Ok(Self::Eastmoney),
            "tushare" => Ok(Self::Tushare),
            _ => bail!("Expected one of: none, eastmoney, tushare"),
        }
    }
}

/// Values read from the config file; `None` means not set.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub cache_db: Option<PathBuf>,
    pub debug_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub default_limit: Option<usize>,
    pub cache_ttl_hours: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub navigation_timeout_secs: Option<u64>,
    pub chromium_path: Option<PathBuf>,
    pub headless: Option<bool>,
    pub download_artifacts: Option<bool>,
    pub tushare_token: Option<String>,
    pub structured_source: Option<StructuredSourceSetting>,
}

impl FileConfig {
    /// Range-checks numeric values.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range key.
    pub fn validate(&self) -> Result<()> {
        check_range("workers", self.workers, MIN_WORKERS, MAX_WORKERS)?;
        check_range("default_limit", self.default_limit, 1, MAX_LIMIT)?;
        check_range("cache_ttl_hours", self.cache_ttl_hours, 1, 720)?;
        check_range("http_timeout_secs", self.http_timeout_secs, 1, 3600)?;
        check_range("navigation_timeout_secs", self.navigation_timeout_secs, 1, 3600)?;
        if self.structured_source == Some(StructuredSourceSetting::Tushare)
            && self
                .tushare_token
                .as_deref()
                .is_some_and(|t| t.trim().is_empty())
        {
            bail!("Invalid config value for `tushare_token`: must not be empty");
        }
        Ok(())
    }
}

fn check_range<T>(field: &str, value: Option<T>, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = value else {
        return Ok(());
    };
    if value < min || value > max {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: Option<FileConfig>,
    pub loaded_from_file: bool,
}

/// `$XDG_CONFIG_HOME/report-crawler/config.toml`, else
/// `$HOME/.config/report-crawler/config.toml`.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the default config file if it exists.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(p) if p.exists() => {
            let config = load_file_config(p)?;
            Ok(LoadedConfig {
                path,
                config: Some(config),
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        }),
    }
}

/// # Errors
///
/// Returns an error when the file cannot be read or parsed.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// # Errors
///
/// Returns an error for bad syntax, unknown keys, malformed values or
/// out-of-range numbers.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => cfg.output_dir = Some(parse_path(value).with_context(context)?),
            "cache_db" => cfg.cache_db = Some(parse_path(value).with_context(context)?),
            "debug_dir" => cfg.debug_dir = Some(parse_path(value).with_context(context)?),
            "chromium_path" => cfg.chromium_path = Some(parse_path(value).with_context(context)?),
            "workers" => cfg.workers = Some(parse_usize(value).with_context(context)?),
            "default_limit" => cfg.default_limit = Some(parse_usize(value).with_context(context)?),
            "cache_ttl_hours" => {
                cfg.cache_ttl_hours = Some(parse_integer_u64(value).with_context(context)?);
            }
            "http_timeout_secs" => {
                cfg.http_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "navigation_timeout_secs" => {
                cfg.navigation_timeout_secs =
                    Some(parse_integer_u64(value).with_context(context)?);
            }
            "headless" => cfg.headless = Some(parse_boolean(value).with_context(context)?),
            "download_artifacts" => {
                cfg.download_artifacts = Some(parse_boolean(value).with_context(context)?);
            }
            "tushare_token" => {
                cfg.tushare_token = Some(parse_string_literal(value).with_context(context)?);
            }
            "structured_source" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.structured_source = Some(parsed.parse().with_context(context)?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
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

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_path(raw_value: &str) -> Result<PathBuf> {
    let value = parse_string_literal(raw_value)?;
    if value.trim().is_empty() {
        bail!("Expected a non-empty path");
    }
    Ok(PathBuf::from(value))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_usize(raw_value: &str) -> Result<usize> {
    let value = parse_integer_u64(raw_value)?;
    usize::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Settings after merging built-in defaults with the file.
///
/// The binary applies command-line overrides on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub cache_db: PathBuf,
    pub debug_dir: Option<PathBuf>,
    pub workers: usize,
    pub default_limit: usize,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub navigation_timeout: Duration,
    pub chromium_path: Option<PathBuf>,
    pub headless: bool,
    pub download_artifacts: bool,
    pub tushare_token: Option<String>,
    pub structured_source: StructuredSourceSetting,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_file(None)
    }
}

impl Settings {
    #[must_use]
    pub fn from_file(file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();
        Self {
            output_dir: file.output_dir.unwrap_or_else(|| PathBuf::from("reports")),
            cache_db: file
                .cache_db
                .unwrap_or_else(|| PathBuf::from("reports_cache.db")),
            debug_dir: file.debug_dir,
            workers: file.workers.unwrap_or(DEFAULT_WORKERS),
            default_limit: file.default_limit.unwrap_or(DEFAULT_LIMIT),
            cache_ttl: Duration::from_secs(file.cache_ttl_hours.unwrap_or(24) * 3600),
            http_timeout: Duration::from_secs(file.http_timeout_secs.unwrap_or(30)),
            navigation_timeout: Duration::from_secs(file.navigation_timeout_secs.unwrap_or(30)),
            chromium_path: file.chromium_path,
            headless: file.headless.unwrap_or(true),
            download_artifacts: file.download_artifacts.unwrap_or(true),
            tushare_token: file
                .tushare_token
                .or_else(|| env::var(TUSHARE_TOKEN_ENV).ok().filter(|t| !t.trim().is_empty())),
            structured_source: file.structured_source.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let cfg = parse_config_str(
            r#"
workers = 4 # download workers
output_dir = "/data/reports"
structured_source = "eastmoney"
"#,
        )
        .unwrap();
        assert_eq!(cfg.workers, Some(4));
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/data/reports")));
        assert_eq!(cfg.structured_source, Some(StructuredSourceSetting::Eastmoney));
        assert!(cfg.cache_db.is_none());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        for (raw, key) in [
            ("workers = 0", "workers"),
            ("workers = 33", "workers"),
            ("default_limit = 51", "default_limit"),
            ("cache_ttl_hours = 721", "cache_ttl_hours"),
            ("http_timeout_secs = 0", "http_timeout_secs"),
        ] {
            let err = parse_config_str(raw).unwrap_err();
            assert!(err.to_string().contains(key), "{raw}: {err}");
        }
    }

    #[test]
    fn test_rejects_unknown_key_and_bad_syntax() {
        let err = parse_config_str("concurrency = 4").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
        let err = parse_config_str("workers 4").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_rejects_malformed_values() {
        let err = parse_config_str("headless = yes").unwrap_err();
        assert!(format!("{err:#}").contains("headless"));
        let err = parse_config_str("output_dir = /tmp").unwrap_err();
        assert!(format!("{err:#}").contains("output_dir"));
        let err = parse_config_str(r#"structured_source = "akshare""#).unwrap_err();
        assert!(format!("{err:#}").contains("structured_source"));
        let err = parse_config_str("workers = 4 trailing").unwrap_err();
        assert!(format!("{err:#}").contains("workers"));
    }

    #[test]
    fn test_hash_inside_string_is_kept() {
        let cfg = parse_config_str(r#"tushare_token = "ab#cd" # token"#).unwrap();
        assert_eq!(cfg.tushare_token.as_deref(), Some("ab#cd"));
    }

    #[test]
    fn test_settings_defaults_and_file_values() {
        let defaults = Settings::from_file(None);
        assert_eq!(defaults.workers, 6);
        assert_eq!(defaults.default_limit, 6);
        assert_eq!(defaults.cache_ttl, Duration::from_secs(24 * 3600));
        assert!(defaults.headless);
        assert!(defaults.download_artifacts);

        let file = parse_config_str("workers = 2\ncache_ttl_hours = 1\nheadless = false").unwrap();
        let settings = Settings::from_file(Some(&file));
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.cache_ttl, Duration::from_secs(3600));
        assert!(!settings.headless);
    }
}
