use std::time::Duration;

use tracing::{info, warn};

use vbridge_protocol::gemini::models::CatalogResponse;
use vbridge_protocol::openai::models::{ListObject, ModelEntry, ModelList};

use crate::auth::UpstreamAuth;
use crate::client::{HttpMethod, UpstreamClient, UpstreamRequest};
use crate::config::{AuthMode, BridgeConfig};
use crate::error::BridgeResult;

const CATALOG_ATTEMPTS: usize = 3;
const CATALOG_RETRY_DELAY: Duration = Duration::from_millis(200);
const FALLBACK_OWNER: &str = "custom";

/// Aggregate the model catalog across configured publishers.
///
/// Publishers are queried concurrently; a publisher that keeps failing
/// contributes nothing instead of failing the whole listing. Transport
/// failures are retried up to three attempts; a non-200 response is not.
pub async fn list_models(
    client: &dyn UpstreamClient,
    auth: &dyn UpstreamAuth,
    config: &BridgeConfig,
) -> BridgeResult<ModelList> {
    let mut headers = auth.headers().await?;
    headers.push(("Content-Type".to_string(), "application/json".to_string()));

    let publishers: Vec<String> = match auth.mode() {
        AuthMode::ApiKey => vec!["google".to_string()],
        AuthMode::ServiceAccount => config.publishers.clone(),
    };

    let fetches = publishers
        .iter()
        .map(|publisher| fetch_catalog(client, auth, headers.clone(), publisher));
    let results = futures_util::future::join_all(fetches).await;
    let mut data: Vec<ModelEntry> = results.into_iter().flatten().collect();

    if config.filter_model_names {
        data.retain(|entry| {
            config
                .model_name_filters
                .iter()
                .any(|prefix| entry.id.starts_with(prefix))
        });
    }

    for id in &config.extra_models {
        let owner = id
            .split_once('/')
            .map(|(publisher, _)| publisher.to_string())
            .unwrap_or_else(|| FALLBACK_OWNER.to_string());
        data.push(ModelEntry::new(id.clone(), owner));
    }

    info!(models = data.len(), "model listing assembled");
    Ok(ModelList {
        object: ListObject::List,
        data,
    })
}

async fn fetch_catalog(
    client: &dyn UpstreamClient,
    auth: &dyn UpstreamAuth,
    headers: Vec<(String, String)>,
    publisher: &str,
) -> Vec<ModelEntry> {
    let url = auth.models_url(publisher);

    for attempt in 1..=CATALOG_ATTEMPTS {
        let request = UpstreamRequest {
            method: HttpMethod::Get,
            url: url.clone(),
            headers: headers.clone(),
            body: None,
            stream: false,
        };
        match client.send(request).await {
            Ok(response) => {
                let status = response.status;
                let bytes = response.collect().await;
                if status != 200 {
                    // Unhappy catalog backends mean "no models here", not
                    // a retry and not a failed listing.
                    warn!(publisher = %publisher, status, "catalog query failed");
                    return Vec::new();
                }
                let catalog: CatalogResponse = match serde_json::from_slice(&bytes) {
                    Ok(catalog) => catalog,
                    Err(err) => {
                        warn!(publisher = %publisher, error = %err, "unreadable catalog payload");
                        return Vec::new();
                    }
                };
                return parse_catalog(&catalog);
            }
            Err(err) if attempt < CATALOG_ATTEMPTS => {
                warn!(publisher = %publisher, attempt, error = %err, "catalog fetch retrying");
                tokio::time::sleep(CATALOG_RETRY_DELAY).await;
            }
            Err(err) => {
                warn!(publisher = %publisher, error = %err, "catalog fetch failed");
                return Vec::new();
            }
        }
    }

    Vec::new()
}

fn parse_catalog(catalog: &CatalogResponse) -> Vec<ModelEntry> {
    let mut entries = Vec::new();

    // AI-Studio shape: {"models": [{"name": "models/<id>"}]}, google-owned.
    for model in &catalog.models {
        if let Some(id) = model.name.strip_prefix("models/")
            && !id.is_empty()
        {
            entries.push(ModelEntry::new(format!("google/{id}"), "google"));
        }
    }

    // Vertex shape: {"publisherModels": [{"name": "publishers/<pub>/models/<id>"}]}.
    for model in &catalog.publisher_models {
        let segments: Vec<&str> = model.name.split('/').collect();
        if let ["publishers", publisher, "models", id] = segments[..] {
            entries.push(ModelEntry::new(format!("{publisher}/{id}"), publisher));
        }
    }

    entries
}
