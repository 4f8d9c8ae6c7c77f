use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use vbridge_core::config::{default_model_name_filters, default_publishers};
use vbridge_core::{AuthMode, BridgeConfig, Credentials, TokenStore};

use crate::cli::Cli;

/// Resolved startup state. Precedence: CLI > environment > config file.
pub(crate) struct ResolvedConfig {
    pub(crate) bridge: BridgeConfig,
    pub(crate) credentials: Credentials,
    pub(crate) config_path: PathBuf,
}

pub(crate) fn resolve(cli: &Cli) -> ResolvedConfig {
    let api_key = env_nonempty("VERTEX_API_KEY");
    let mode = if api_key.is_some() {
        AuthMode::ApiKey
    } else {
        AuthMode::ServiceAccount
    };

    let mut bridge = BridgeConfig {
        mode,
        api_key,
        location: env_nonempty("VERTEX_LOCATION").unwrap_or_else(|| "us-central1".to_string()),
        project_id: env_nonempty("VERTEX_PROJECT_ID"),
        proxy_key: std::env::var("PROXY_KEY").unwrap_or_default(),
        bind: env_nonempty("BIND").unwrap_or_else(|| "localhost".to_string()),
        port: std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(8086),
        auto_refresh: env_flag("AUTO_REFRESH", true),
        filter_model_names: env_flag("FILTER_MODEL_NAMES", true),
        publishers: env_list("PUBLISHERS").unwrap_or_else(default_publishers),
        extra_models: env_list("EXTRA_MODELS").unwrap_or_default(),
        model_name_filters: default_model_name_filters(),
    };

    if let Some(port) = cli.port {
        bridge.port = port;
    }
    if let Some(bind) = &cli.bind {
        bridge.bind = bind.clone();
    }
    if let Some(key) = &cli.key {
        bridge.proxy_key = key.clone();
    }
    if let Some(auto_refresh) = cli.auto_refresh {
        bridge.auto_refresh = auto_refresh;
    }
    if let Some(filter) = cli.filter_model_names {
        bridge.filter_model_names = filter;
    }

    let config_path = PathBuf::from(&cli.config);
    let mut credentials = Credentials::default();
    if bridge.mode == AuthMode::ServiceAccount
        && let Some(saved) = read_saved(&config_path)
    {
        credentials = saved.credentials;
        if bridge.proxy_key.is_empty()
            && let Some(key) = saved.proxy_key
        {
            bridge.proxy_key = key;
        }
    }

    ResolvedConfig {
        bridge,
        credentials,
        config_path,
    }
}

struct SavedState {
    credentials: Credentials,
    proxy_key: Option<String>,
}

fn read_saved(path: &Path) -> Option<SavedState> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let access_token = value
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let expiry = value
        .get("expiry")
        .and_then(|v| v.as_str())
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok());
    let proxy_key = value
        .get("key")
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Some(SavedState {
        credentials: Credentials {
            access_token,
            expiry,
        },
        proxy_key,
    })
}

/// Merges `{access_token, expiry}` into the config file, preserving other
/// fields (the proxy key lives in the same document).
pub(crate) struct JsonTokenStore {
    path: PathBuf,
}

impl JsonTokenStore {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for JsonTokenStore {
    fn save(&self, token: &str, expiry: OffsetDateTime) -> std::io::Result<()> {
        let mut doc = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|value| match value {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();

        let expiry = expiry.format(&Rfc3339).map_err(std::io::Error::other)?;
        doc.insert(
            "access_token".to_string(),
            serde_json::Value::String(token.to_string()),
        );
        doc.insert("expiry".to_string(), serde_json::Value::String(expiry));

        let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(doc))?;
        std::fs::write(&self.path, rendered)
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|value| value.to_ascii_lowercase() != "false")
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let values: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() { None } else { Some(values) }
}
