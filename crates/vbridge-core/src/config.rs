#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ServiceAccount,
    ApiKey,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::ServiceAccount => "service_account",
            AuthMode::ApiKey => "api_key",
        }
    }
}

/// Runtime configuration, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind: String,
    pub port: u16,
    /// Shared secret required from inbound callers; empty means open access.
    pub proxy_key: String,
    pub mode: AuthMode,
    pub location: String,
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub publishers: Vec<String>,
    pub extra_models: Vec<String>,
    pub filter_model_names: bool,
    pub model_name_filters: Vec<String>,
    pub auto_refresh: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: "localhost".to_string(),
            port: 8086,
            proxy_key: String::new(),
            mode: AuthMode::ServiceAccount,
            location: "us-central1".to_string(),
            project_id: None,
            api_key: None,
            publishers: default_publishers(),
            extra_models: Vec::new(),
            filter_model_names: true,
            model_name_filters: default_model_name_filters(),
            auto_refresh: true,
        }
    }
}

pub fn default_publishers() -> Vec<String> {
    ["google", "anthropic", "meta"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn default_model_name_filters() -> Vec<String> {
    ["google/gemini-", "anthropic/claude-", "meta/llama"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
