use anyhow::Context;
use mepoo::MePooConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_POOLS: &str = "128x1024,1024x256,16384x32";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Anything but `production`/`prod` (any case) is development.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") || value.eq_ignore_ascii_case("prod") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .map(|value| Self::parse(&value))
            .unwrap_or(Environment::Development)
    }
}

#[derive(Debug, Clone)]
pub struct SoakConfig {
    pub environment: Environment,
    pub pools: MePooConfig,
    pub threads: usize,
    pub duration: Duration,
    /// Chunks each worker keeps before releasing the oldest one.
    pub hold_chunks: usize,
    /// File backing the segment, anonymous memory when unset.
    pub segment_path: Option<PathBuf>,
}

impl SoakConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let pools = match env::var("MEPOO_CONFIG") {
            Ok(path) => {
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read pool config {path}"))?;
                MePooConfig::from_json(&json)
                    .with_context(|| format!("Invalid pool config {path}"))?
            }
            Err(_) => match MePooConfig::from_env().context("Invalid MEPOO_POOLS")? {
                Some(pools) => pools,
                None => DEFAULT_POOLS.parse()?,
            },
        };

        let threads = env::var("SOAK_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&threads| threads > 0)
            .unwrap_or(4);

        let duration_secs = env::var("SOAK_DURATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let hold_chunks = env::var("SOAK_HOLD_CHUNKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8);

        let segment_path = env::var("SEGMENT_PATH").ok().map(PathBuf::from);

        Ok(Self {
            environment,
            pools,
            threads,
            duration: Duration::from_secs(duration_secs),
            hold_chunks,
            segment_path,
        })
    }
}
