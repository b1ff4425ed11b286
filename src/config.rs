use std::path::PathBuf;

use anyhow::Context;

use crate::rubric::RubricRegistry;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub rubrics_path: Option<PathBuf>,
    pub audio_dir: PathBuf,
    pub audio_public_base_url: String,
}

impl AppConfig {
    /// Reads the process environment, after `.env` if one is present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .context("DATABASE_URL must be set to a Postgres instance")?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS is not a number: {value}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let audio_dir = PathBuf::from(lookup("AUDIO_DIR").unwrap_or_else(|| "audios".to_string()));
        let audio_public_base_url = lookup("AUDIO_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("file://{}", audio_dir.display()));

        Ok(Self {
            database_url,
            max_connections,
            rubrics_path: lookup("RUBRICS_PATH").map(PathBuf::from),
            audio_dir,
            audio_public_base_url,
        })
    }

    pub fn rubrics(&self) -> anyhow::Result<RubricRegistry> {
        match &self.rubrics_path {
            Some(path) => RubricRegistry::load(path),
            None => Ok(RubricRegistry::builtin()),
        }
    }
}
