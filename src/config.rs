use std::path::PathBuf;

use anyhow::Context;

const DEFAULT_DATABASE: &str = "annolens.db";
const DEFAULT_MAX_BATCH: usize = 32;

/// Runtime settings, read from the environment (and a `.env` file if present).
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database holding projects and images
    pub database_path: PathBuf,

    /// Largest number of images accepted in one upload
    pub max_batch_images: usize,

    /// Images decoded, inferred and rendered at the same time
    pub max_parallel_inference: usize,

    /// TrueType font for labels; the built-in bitmap font is used when unset
    pub label_font: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE),
            max_batch_images: DEFAULT_MAX_BATCH,
            max_parallel_inference: default_parallelism(),
            label_font: None,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_positive(var: &str, value: &str) -> anyhow::Result<usize> {
    let parsed: usize = value
        .parse()
        .with_context(|| format!("{var} must be a positive integer, got {value:?}"))?;
    anyhow::ensure!(parsed > 0, "{var} must be greater than zero");
    Ok(parsed)
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `ANNOLENS_DATABASE`: database file (default: `annolens.db`)
    /// - `ANNOLENS_MAX_BATCH`: images per upload (default: 32)
    /// - `ANNOLENS_WORKERS`: parallel inference jobs (default: available CPUs)
    /// - `ANNOLENS_LABEL_FONT`: path to a `.ttf`/`.otf` font for labels
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable is not a positive integer.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup("ANNOLENS_DATABASE") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("ANNOLENS_MAX_BATCH") {
            config.max_batch_images = parse_positive("ANNOLENS_MAX_BATCH", &value)?;
        }
        if let Some(value) = lookup("ANNOLENS_WORKERS") {
            config.max_parallel_inference = parse_positive("ANNOLENS_WORKERS", &value)?;
        }
        config.label_font = lookup("ANNOLENS_LABEL_FONT").map(PathBuf::from);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_path, PathBuf::from("annolens.db"));
        assert_eq!(config.max_batch_images, 32);
        assert!(config.max_parallel_inference >= 1);
        assert!(config.label_font.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(lookup(&[
            ("ANNOLENS_DATABASE", "/tmp/x.db"),
            ("ANNOLENS_MAX_BATCH", "4"),
            ("ANNOLENS_WORKERS", "2"),
            ("ANNOLENS_LABEL_FONT", "/fonts/DejaVuSans-Bold.ttf"),
        ]))
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.max_batch_images, 4);
        assert_eq!(config.max_parallel_inference, 2);
        assert!(config.label_font.is_some());
    }

    #[test]
    fn zero_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("ANNOLENS_WORKERS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ANNOLENS_MAX_BATCH", "lots")])).is_err());
    }
}
