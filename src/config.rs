use crate::commit::{ChainConfig, RegistrationMode, RetryPolicy};
use crate::core::EntityId;
use crate::publish::{DEFAULT_MAX_IMAGE_BYTES, PublishSettings};
use crate::remote::ProcessBlueprint;
use crate::template::PayloadTemplate;
use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub module: String,
    pub scheduler: String,
    pub collection: Option<EntityId>,
    pub profile_registry: EntityId,
    pub mu_url: String,
    pub cu_url: String,
    pub signer_url: String,
    pub retry_delay: Duration,
    /// `None` retries until the process stops.
    pub retry_max_attempts: Option<u32>,
    pub retry_delay_after_success: bool,
    pub spawn_attempts: u32,
    pub registration_mode: RegistrationMode,
    pub max_image_bytes: usize,
    pub ticker: String,
    pub denomination: String,
    pub balance: String,
    pub asset_template_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("{} must be set", key));

        let host = or("APP_HOST", "0.0.0.0");
        let port = parse(&or("APP_PORT", "3000"), "APP_PORT")?;

        let module = required("AO_MODULE")?;
        let scheduler = required("AO_SCHEDULER")?;
        let collection = get("AO_COLLECTION")
            .map(EntityId::new)
            .transpose()
            .context("AO_COLLECTION must be a valid process id")?;
        let profile_registry = EntityId::new(required("AO_PROFILE_REGISTRY")?)
            .context("AO_PROFILE_REGISTRY must be a valid process id")?;

        let mu_url = or("AO_MU_URL", "https://mu.ao-testnet.xyz");
        let cu_url = or("AO_CU_URL", "https://cu.ao-testnet.xyz");
        let signer_url = or("SIGNER_URL", "http://127.0.0.1:8787");

        let retry_delay =
            Duration::from_millis(parse(&or("RETRY_DELAY_MS", "1000"), "RETRY_DELAY_MS")?);
        let retry_max_attempts = match parse::<u32>(
            &or("RETRY_MAX_ATTEMPTS", "30"),
            "RETRY_MAX_ATTEMPTS",
        )? {
            0 => None,
            attempts => Some(attempts),
        };
        let retry_delay_after_success = parse_bool(
            &or("RETRY_DELAY_AFTER_SUCCESS", "true"),
            "RETRY_DELAY_AFTER_SUCCESS",
        )?;
        let spawn_attempts = parse::<u32>(&or("SPAWN_ATTEMPTS", "1"), "SPAWN_ATTEMPTS")?.max(1);
        let registration_mode = RegistrationMode::from_str(&or("REGISTRATION_MODE", "nested"))
            .map_err(|err| anyhow!("REGISTRATION_MODE: {}", err))?;

        let max_image_bytes = parse(
            &or("MAX_IMAGE_BYTES", &DEFAULT_MAX_IMAGE_BYTES.to_string()),
            "MAX_IMAGE_BYTES",
        )?;

        Ok(Self {
            host,
            port,
            module,
            scheduler,
            collection,
            profile_registry,
            mu_url,
            cu_url,
            signer_url,
            retry_delay,
            retry_max_attempts,
            retry_delay_after_success,
            spawn_attempts,
            registration_mode,
            max_image_bytes,
            ticker: or("ASSET_TICKER", "ATOMIC"),
            denomination: or("ASSET_DENOMINATION", "1"),
            balance: or("ASSET_BALANCE", "1"),
            asset_template_path: get("ASSET_TEMPLATE_PATH").map(PathBuf::from),
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Policy shared by execute and registration steps.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = match self.retry_max_attempts {
            Some(attempts) => RetryPolicy::bounded(attempts),
            None => RetryPolicy::unbounded(),
        };
        policy
            .with_delay(self.retry_delay)
            .with_delay_after_success(self.retry_delay_after_success)
    }

    pub fn spawn_policy(&self) -> RetryPolicy {
        if self.spawn_attempts <= 1 {
            RetryPolicy::single_attempt()
        } else {
            RetryPolicy::bounded(self.spawn_attempts)
                .with_delay(self.retry_delay)
                .with_delay_after_success(false)
        }
    }

    /// Publish settings, reading the asset template override if one is configured.
    pub async fn publish_settings(&self) -> Result<PublishSettings> {
        let mut settings =
            PublishSettings::new(ProcessBlueprint::new(&self.module, &self.scheduler))
                .with_retry_policy(self.retry_policy())
                .with_chain_config(ChainConfig {
                    registration: self.registration_mode,
                    ..ChainConfig::default()
                });

        if let Some(collection) = &self.collection {
            settings = settings.with_collection(collection.clone());
        }
        if let Some(path) = &self.asset_template_path {
            let template = PayloadTemplate::load(path)
                .await
                .with_context(|| format!("failed to load asset template {}", path.display()))?;
            settings = settings.with_asset_template(template);
        }

        settings.spawn_policy = self.spawn_policy();
        settings.ticker = self.ticker.clone();
        settings.denomination = self.denomination.clone();
        settings.balance = self.balance.clone();
        settings.max_image_bytes = self.max_image_bytes;
        Ok(settings)
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{} has an invalid value '{}'", key, raw))
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(anyhow!("{} must be true or false (got '{}')", key, raw)),
    }
}
