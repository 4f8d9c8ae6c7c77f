mod api_key;
mod oauth;
mod service_account;

use std::sync::Arc;

use crate::config::{AuthMode, BridgeConfig};
use crate::error::{BridgeError, BridgeResult};

pub use api_key::ApiKeyAuth;
pub use oauth::{AccessToken, JwtTokenSource, ServiceAccountKey, TokenSource};
pub use service_account::{Credentials, ServiceAccountAuth, TokenStore};

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateMethod {
    Generate,
    StreamGenerate,
}

impl GenerateMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerateMethod::Generate => "generateContent",
            GenerateMethod::StreamGenerate => "streamGenerateContent",
        }
    }
}

/// Upstream identity: supplies per-request auth headers and builds upstream
/// URLs. Two variants exist; `start`/`stop` are no-ops on the variant
/// without a refresh lifecycle.
#[async_trait::async_trait]
pub trait UpstreamAuth: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// Auth headers for the next upstream call. May suspend to refresh the
    /// underlying credential.
    async fn headers(&self) -> BridgeResult<Headers>;

    /// OpenAI-compatible completions endpoint. Unsupported in api-key mode.
    fn completions_url(&self, path: &str) -> BridgeResult<String>;

    fn generate_url(&self, model: &str, method: GenerateMethod) -> String;

    fn models_url(&self, publisher: &str) -> String;

    async fn start(&self) {}

    fn stop(&self) {}
}

/// Collaborators the service-account variant needs; the api-key variant
/// takes none.
pub struct ServiceAccountDeps {
    pub token_source: Arc<dyn TokenSource>,
    pub token_store: Arc<dyn TokenStore>,
    pub initial: Credentials,
}

/// The only place that selects an auth variant from the configured mode.
pub fn build_auth(
    config: &BridgeConfig,
    sa: Option<ServiceAccountDeps>,
) -> BridgeResult<Arc<dyn UpstreamAuth>> {
    match config.mode {
        AuthMode::ApiKey => {
            let api_key = config
                .api_key
                .clone()
                .ok_or(BridgeError::Config("api-key mode requires an api key"))?;
            Ok(Arc::new(ApiKeyAuth::new(api_key)))
        }
        AuthMode::ServiceAccount => {
            let deps = sa.ok_or(BridgeError::Config(
                "service-account mode requires a token source",
            ))?;
            let project_id = config
                .project_id
                .clone()
                .ok_or(BridgeError::Config("service-account mode requires a project id"))?;
            Ok(Arc::new(ServiceAccountAuth::new(
                project_id,
                config.location.clone(),
                config.auto_refresh,
                deps,
            )))
        }
    }
}
