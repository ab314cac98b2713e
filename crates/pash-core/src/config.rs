use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, trace, warn};

/// The keys a `.pashrc` may set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    DataLocation,
    Color,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 2] = [ConfigKey::DataLocation, ConfigKey::Color];

    pub const fn as_str(self) -> &'static str {
        match self {
            ConfigKey::DataLocation => "data.location",
            ConfigKey::Color => "color",
        }
    }
}

impl FromStr for ConfigKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix("rc.").unwrap_or(name);
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = ConfigKey::ALL.iter().map(|key| key.as_str()).collect();
                anyhow!("unknown config key '{name}' (expected one of: {})", known.join(", "))
            })
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host configuration read from a `.pashrc`. Dashboard settings live in
/// storage, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_location: Option<PathBuf>,
    pub color: bool,
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_location: None,
            color: true,
            source: None,
        }
    }
}

impl Config {
    /// Reads the rc file located by [`locate_pashrc`], or returns the
    /// defaults when there is none.
    #[tracing::instrument(skip(pashrc_override))]
    pub fn load(pashrc_override: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = locate_pashrc(pashrc_override) else {
            debug!("no pashrc found; using defaults");
            return Ok(Config::default());
        };

        info!(pashrc = %path.display(), "loading pashrc");
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut cfg = Config::parse(&text)
            .with_context(|| format!("invalid pashrc {}", path.display()))?;
        cfg.source = Some(path);
        Ok(cfg)
    }

    /// Parses `key = value` lines. `#` starts a comment; blank lines are
    /// skipped. Unknown keys and bad values are errors.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut cfg = Config::default();
        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line
                .split_once('#')
                .map_or(raw_line, |(before, _)| before)
                .trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: expected key = value, got: {raw_line}", idx + 1))?;
            cfg.set(key, value)
                .with_context(|| format!("line {}", idx + 1))?;
        }
        Ok(cfg)
    }

    /// Applies one setting. Accepts an `rc.` prefix on `key`.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let key: ConfigKey = key.parse()?;
        let value = value.trim();
        trace!(%key, value, "config key");
        match key {
            ConfigKey::DataLocation => {
                if value.is_empty() {
                    bail!("{key} cannot be empty");
                }
                self.data_location = Some(expand_tilde(Path::new(value)));
            }
            ConfigKey::Color => {
                self.color = parse_bool(value)
                    .ok_or_else(|| anyhow!("invalid {key} value '{value}' (expected on or off)"))?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in overrides {
            debug!(%key, %value, "applying override");
            self.set(&key, &value)
                .with_context(|| format!("invalid override {key}={value}"))?;
        }
        Ok(())
    }
}

/// `--pashrc` wins, then `$PASHRC` (`/dev/null` disables the file), then
/// `~/.pashrc` when it exists.
pub fn locate_pashrc(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("PASHRC") {
        if env_path == "/dev/null" {
            return None;
        }
        return Some(expand_tilde(Path::new(&env_path)));
    }

    let Some(home) = dirs::home_dir() else {
        warn!("cannot determine home directory");
        return None;
    };
    let candidate = home.join(".pashrc");
    candidate.exists().then_some(candidate)
}

/// `--data` wins, then `data.location`, then the platform data directory.
/// Created if missing.
#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = match (override_dir, &cfg.data_location) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(path)) => path.clone(),
        (None, None) => dirs::data_dir()
            .or_else(dirs::home_dir)
            .map(|base| base.join("pash"))
            .ok_or_else(|| anyhow!("cannot determine data directory"))?,
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(dir)
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Some(true),
        "0" | "n" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}
