use serenity::all::GatewayIntents;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v6";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("環境変数 {0} が設定されていません")]
    Missing(&'static str),
    #[error("環境変数 {key} の値が不正です: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    token: String,
    shard_count: u32,
    gateway_url: Option<String>,
    gateway_intents: Option<GatewayIntents>,
    large_threshold: u32,
    api_base: String,
}

impl BotConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            shard_count: 1,
            gateway_url: None,
            gateway_intents: None,
            large_threshold: 250,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// 環境変数から設定を読み込みます。
    ///
    /// 必須:
    /// - `DISCORD_TOKEN`
    ///
    /// 任意:
    /// - `SHARD_COUNT` (既定値 1)
    /// - `GATEWAY_URL` (未指定なら API から取得)
    /// - `GATEWAY_INTENTS` (intentsのビット値)
    /// - `LARGE_THRESHOLD` (既定値 250)
    /// - `DISCORD_API_BASE`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let mut config = Self::new(token);

        if let Some(count) = parse_number::<u32>(&lookup, "SHARD_COUNT")? {
            if count == 0 {
                return Err(ConfigError::Invalid { key: "SHARD_COUNT", value: "0".into() });
            }
            config.shard_count = count;
        }

        if let Some(threshold) = parse_number::<u32>(&lookup, "LARGE_THRESHOLD")? {
            config.large_threshold = threshold;
        }

        if let Some(bits) = parse_number::<u64>(&lookup, "GATEWAY_INTENTS")? {
            config.gateway_intents = Some(GatewayIntents::from_bits_truncate(bits));
        }

        config.gateway_url = lookup("GATEWAY_URL").filter(|u| !u.is_empty());
        if let Some(api_base) = lookup("DISCORD_API_BASE").filter(|u| !u.is_empty()) {
            config.api_base = api_base;
        }

        Ok(config)
    }

    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count.max(1);
        self
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    pub fn with_gateway_intents(mut self, intents: GatewayIntents) -> Self {
        self.gateway_intents = Some(intents);
        self
    }

    pub fn token(&self) -> String {
        self.token.clone()
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn gateway_url(&self) -> Option<String> {
        self.gateway_url.clone()
    }

    pub fn gateway_intents(&self) -> Option<GatewayIntents> {
        self.gateway_intents
    }

    pub fn large_threshold(&self) -> u32 {
        self.large_threshold
    }

    pub fn api_base(&self) -> String {
        self.api_base.clone()
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
