//! Client configuration: endpoint, credentials and batch policy.
//!
//! Configuration can be built in code, deserialized with serde, or read from
//! `INVENTORY_*` environment variables.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::batch::BatchConfig;
use crate::error::{ApiError, ApiResult};

pub const ENV_API_URL: &str = "INVENTORY_API_URL";
pub const ENV_API_TOKEN: &str = "INVENTORY_API_TOKEN";
pub const ENV_API_LOGIN: &str = "INVENTORY_API_LOGIN";
pub const ENV_API_PASSWORD: &str = "INVENTORY_API_PASSWORD";
pub const ENV_BATCH_LIMIT: &str = "INVENTORY_BATCH_LIMIT";
pub const ENV_BATCH_EXPAND_LIMIT: &str = "INVENTORY_BATCH_EXPAND_LIMIT";
pub const ENV_BATCH_CONCURRENCY: &str = "INVENTORY_BATCH_CONCURRENCY";

/// How requests authenticate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Credentials {
    /// Sent as `Authorization: Bearer <token>`.
    Token(String),
    /// Sent as `Authorization: Basic base64(login:password)`.
    Basic { login: String, password: String },
}

impl Credentials {
    pub fn authorization_header(&self) -> String {
        match self {
            Credentials::Token(token) => format!("Bearer {token}"),
            Credentials::Basic { login, password } => {
                format!("Basic {}", BASE64.encode(format!("{login}:{password}")))
            }
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Basic { login, .. } => f
                .debug_struct("Basic")
                .field("login", login)
                .field("password", &"***")
                .finish(),
        }
    }
}

pub fn default_user_agent() -> String {
    format!("inventory-core/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub base_url: String,
    pub credentials: Credentials,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            user_agent: default_user_agent(),
            batch: BatchConfig::default(),
        }
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps variable names to
    /// values. Blank values count as unset.
    pub fn from_lookup<L>(lookup: L) -> ApiResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url =
            get(ENV_API_URL).ok_or_else(|| ApiError::Config(format!("{ENV_API_URL} is not set")))?;

        let credentials = match (get(ENV_API_TOKEN), get(ENV_API_LOGIN), get(ENV_API_PASSWORD)) {
            (Some(token), _, _) => Credentials::Token(token),
            (None, Some(login), Some(password)) => Credentials::Basic { login, password },
            _ => {
                return Err(ApiError::Config(format!(
                    "set {ENV_API_TOKEN}, or both {ENV_API_LOGIN} and {ENV_API_PASSWORD}"
                )))
            }
        };

        let mut batch = BatchConfig::default();
        if let Some(raw) = get(ENV_BATCH_LIMIT) {
            batch.limit = parse_var(ENV_BATCH_LIMIT, &raw)?;
        }
        if let Some(raw) = get(ENV_BATCH_EXPAND_LIMIT) {
            batch.expand_limit = parse_var(ENV_BATCH_EXPAND_LIMIT, &raw)?;
        }
        if let Some(raw) = get(ENV_BATCH_CONCURRENCY) {
            batch.concurrency_limit = parse_var(ENV_BATCH_CONCURRENCY, &raw)?;
        }

        Ok(Self::new(base_url, credentials).with_batch(batch))
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> ApiResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::Config(format!("{key} must be an unsigned integer, got {raw:?}")))
}
