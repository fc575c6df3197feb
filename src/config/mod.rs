use std::path::{Path, PathBuf};

/// Default cap on stored records.
pub const DEFAULT_MAX_RECORDS: usize = 3000;

/// Rules that are always evaluated first so the engine never logs its own
/// control commands or shell glue.
pub const BUILTIN_IGNORE_RULES: &[&str] = &["cmdstamp( .*)?", "__cmdstamp.*"];

/// Engine configuration, loaded once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_records: usize,
    pub enabled: bool,
    /// Ordered ignore rules: built-ins, then config file, then `CMDSTAMP_IGNORE`.
    pub ignore_rules: Vec<String>,
    pub log_file: PathBuf,
}

impl Config {
    /// Defaults for a given log file.
    pub fn with_log_file(log_file: impl Into<PathBuf>) -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            enabled: true,
            ignore_rules: BUILTIN_IGNORE_RULES.iter().map(|r| (*r).to_owned()).collect(),
            log_file: log_file.into(),
        }
    }

    /// Load using auto-detected paths. Priority for each setting:
    /// 1. `CMDSTAMP_*` environment variables
    /// 2. `{config_dir}/cmdstamp/config.toml` `[history]`
    /// 3. Built-in defaults
    ///
    /// # Errors
    /// Returns an error if no log file location can be determined.
    pub fn load() -> anyhow::Result<Self> {
        let default_log = crate::paths::default_log_file()
            .ok_or_else(|| anyhow::anyhow!("cannot determine history log path"))?;
        let mut config = Self::load_from(crate::paths::config_file().as_deref(), default_log);
        // An explicit CMDSTAMP_LOG_FILE beats `[history] file`.
        if let Ok(p) = std::env::var("CMDSTAMP_LOG_FILE")
            && !p.is_empty()
        {
            config.log_file = PathBuf::from(p);
        }
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit config file path without consulting the
    /// environment. A missing or unreadable file yields the defaults.
    pub fn load_from(config_file: Option<&Path>, default_log: PathBuf) -> Self {
        let mut config = Self::with_log_file(default_log);
        let Some(section) = config_file.and_then(read_history_section) else {
            return config;
        };
        if let Some(n) = section.max_records {
            config.max_records = n;
        }
        if let Some(enabled) = section.enabled {
            config.enabled = enabled;
        }
        if let Some(file) = section.file {
            config.log_file = file;
        }
        config.ignore_rules.extend(section.ignore);
        config
    }

    /// Apply `CMDSTAMP_MAX_RECORDS`, `CMDSTAMP_ENABLED` and `CMDSTAMP_IGNORE`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CMDSTAMP_MAX_RECORDS") {
            match v.trim().parse() {
                Ok(n) => self.max_records = n,
                Err(_) => tracing::warn!("ignoring invalid CMDSTAMP_MAX_RECORDS={v:?}"),
            }
        }
        if let Ok(v) = std::env::var("CMDSTAMP_ENABLED") {
            match parse_bool(&v) {
                Some(b) => self.enabled = b,
                None => tracing::warn!("ignoring invalid CMDSTAMP_ENABLED={v:?}"),
            }
        }
        if let Ok(v) = std::env::var("CMDSTAMP_IGNORE") {
            self.ignore_rules.extend(
                v.lines()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(ToOwned::to_owned),
            );
        }
    }
}

/// Parse the truthy/falsy spellings accepted in environment variables.
pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Private: parsed representation of `config.toml`.
#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    history: Option<HistorySection>,
}

#[derive(serde::Deserialize, Default)]
struct HistorySection {
    max_records: Option<usize>,
    enabled: Option<bool>,
    #[serde(default)]
    ignore: Vec<String>,
    file: Option<PathBuf>,
}

/// Read the `[history]` table. Returns `None` if the file is missing; other
/// read or parse failures are reported and also yield `None`.
fn read_history_section(path: &Path) -> Option<HistorySection> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("cannot read {}: {e}", path.display());
            return None;
        }
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(cfg) => cfg.history,
        Err(e) => {
            tracing::warn!("invalid config {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests;
