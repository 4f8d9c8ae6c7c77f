pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;

pub use auth::{
    ApiKeyAuth, Credentials, GenerateMethod, Headers, JwtTokenSource, ServiceAccountAuth,
    ServiceAccountDeps, ServiceAccountKey, TokenSource, TokenStore, UpstreamAuth, build_auth,
};
pub use client::{
    ClientConfig, HttpMethod, UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamResponse,
    WreqClient,
};
pub use config::{AuthMode, BridgeConfig};
pub use error::{BridgeError, BridgeResult};
pub use models::list_models;
pub use proxy::{JsonReply, TranslatedStream, send_translated, stream_passthrough, stream_translated};
