//! Server configuration: TOML file merged with command-line overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::streaming::{
    Encoding, RenderProfile, DEFAULT_STALL_TIMEOUT_SECS, DEFAULT_TICK_INTERVAL_MS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub control_bind: SocketAddr,
    pub data_bind: SocketAddr,
    pub tick_interval_ms: u64,
    /// 0 disables the stall timeout
    pub stall_timeout_secs: u64,
    pub buffers: Vec<String>,
    pub programs: Vec<String>,
    pub encoding: Encoding,
    pub compression_level: i32,
    pub points: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_bind: SocketAddr::from(([127, 0, 0, 1], 8765)),
            data_bind: SocketAddr::from(([127, 0, 0, 1], 8766)),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            stall_timeout_secs: DEFAULT_STALL_TIMEOUT_SECS,
            buffers: vec!["position".into(), "color".into()],
            programs: vec!["points".into()],
            encoding: Encoding::Gzip,
            compression_level: 6,
            points: 4096,
        }
    }
}

impl Config {
    /// `<config dir>/vbostream/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vbostream").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Build the effective config: an explicit `--config` file must exist;
    /// otherwise the default path is used when present.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "loading default config");
                    Self::load(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    /// Overlay command-line values.
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(addr) = cli.control_bind {
            self.control_bind = addr;
        }
        if let Some(addr) = cli.data_bind {
            self.data_bind = addr;
        }
        if let Some(ms) = cli.tick_interval_ms {
            self.tick_interval_ms = ms;
        }
        if let Some(secs) = cli.stall_timeout_secs {
            self.stall_timeout_secs = secs;
        }
        if let Some(encoding) = cli.encoding {
            self.encoding = encoding;
        }
        if let Some(level) = cli.compression_level {
            self.compression_level = level;
        }
        if let Some(buffers) = &cli.buffers {
            self.buffers = buffers.clone();
        }
        if let Some(programs) = &cli.programs {
            self.programs = programs.clone();
        }
        if let Some(points) = cli.points {
            self.points = points;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        if self.control_bind == self.data_bind && self.control_bind.port() != 0 {
            return Err(Error::Config(format!(
                "control and data listeners both bound to {}",
                self.control_bind
            )));
        }
        if !self.encoding.level_range().contains(&self.compression_level) {
            let range = self.encoding.level_range();
            return Err(Error::Config(format!(
                "compression_level {} out of range {}..={} for {}",
                self.compression_level,
                range.start(),
                range.end(),
                self.encoding.content_encoding()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for name in &self.buffers {
            if name.trim().is_empty() {
                return Err(Error::Config("empty buffer name".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!("buffer {:?} listed twice", name)));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }

    pub fn profile(&self) -> RenderProfile {
        RenderProfile::new(self.buffers.iter().cloned(), self.programs.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(33));
        assert_eq!(config.stall_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.profile().buffers, vec!["position", "color"]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
data_bind = "0.0.0.0:9000"
buffers = ["position", "index"]
encoding = "zstd"
compression_level = 3
"#
        )?;

        let config = Config::load(file.path())?;
        assert_eq!(config.data_bind, "0.0.0.0:9000".parse::<SocketAddr>()?);
        assert_eq!(config.buffers, vec!["position", "index"]);
        assert_eq!(config.encoding, Encoding::Zstd);
        assert_eq!(config.control_bind, Config::default().control_bind);
        Ok(())
    }

    #[test]
    fn test_unknown_field_rejected() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "tick_rate = 10")?;

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }

    #[test]
    fn test_cli_overrides_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "points = 10\nstall_timeout_secs = 5")?;

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            points: Some(20),
            stall_timeout_secs: Some(0),
            ..Cli::default()
        };
        let config = Config::resolve(&cli)?;
        assert_eq!(config.points, 20);
        assert_eq!(config.stall_timeout(), None);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            config: Some(dir.path().join("absent.toml")),
            ..Cli::default()
        };
        assert!(matches!(Config::resolve(&cli), Err(Error::Io(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config {
            compression_level: 12,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        config.compression_level = 12;
        config.encoding = Encoding::Zstd;
        config.validate().unwrap();

        config.buffers = vec!["position".into(), "position".into()];
        assert!(config.validate().is_err());

        let config = Config {
            tick_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            data_bind: Config::default().control_bind,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
