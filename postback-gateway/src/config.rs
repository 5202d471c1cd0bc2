use config::{ConfigError, Environment, File};
use reconcile_core::ProviderSpec;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// Gateway configuration: server binding, store connection, per-provider
/// shared secrets, and the declarative provider table. The provider
/// entries deserialize straight into `reconcile_core::ProviderSpec`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Shared secrets keyed by provider id, injected into the specs at
    /// registry build so they can be supplied via environment overrides
    /// instead of the provider table.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Empty means no Postgres: the gateway runs on the volatile
    /// in-memory store (development only).
    #[serde(default)]
    pub url: String,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("REWARDRAIL")
                .separator("__")
                .list_separator(","),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(port) = env::var("REWARDRAIL_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.providers.is_empty() {
            return Err("At least one provider entry is required".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.providers {
            if spec.id.is_empty() {
                return Err("Provider id cannot be empty".to_string());
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(format!("Duplicate provider id: {}", spec.id));
            }
            if spec.fields.user_id.is_empty()
                || spec.fields.transaction_id.is_empty()
                || spec.fields.amount.is_empty()
            {
                return Err(format!(
                    "Provider {} must declare user_id, transaction_id and amount synonyms",
                    spec.id
                ));
            }
            if let Some(digest) = &spec.verification.digest {
                if digest.fields.is_empty() {
                    return Err(format!(
                        "Provider {} declares a digest recipe with no fields",
                        spec.id
                    ));
                }
            }
            if spec.user_not_found_status != 404 && spec.user_not_found_status != 500 {
                return Err(format!(
                    "Provider {}: user_not_found_status must be 404 or 500",
                    spec.id
                ));
            }
        }

        Ok(())
    }

    /// Provider specs with shared secrets injected from the `secrets`
    /// table. A secret declared inline on the spec wins.
    pub fn provider_specs(&self) -> Vec<ProviderSpec> {
        self.providers
            .iter()
            .cloned()
            .map(|mut spec| {
                if spec.secret.is_none() {
                    spec.secret = self.secrets.get(&spec.id).cloned();
                }
                spec
            })
            .collect()
    }
}
