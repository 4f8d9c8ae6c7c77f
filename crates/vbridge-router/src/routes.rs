use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use vbridge_core::{
    AuthMode, BridgeConfig, BridgeError, BridgeResult, GenerateMethod, Headers, HttpMethod,
    JsonReply, TranslatedStream, UpstreamAuth, UpstreamBody, UpstreamClient, UpstreamRequest,
    UpstreamResponse, send_translated, stream_passthrough, stream_translated,
};
use vbridge_protocol::openai::chat::ChatCompletionRequestBody;
use vbridge_transform::openai_to_gemini;

use crate::caller_auth;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub auth: Arc<dyn UpstreamAuth>,
    pub client: Arc<dyn UpstreamClient>,
}

pub fn bridge_router(state: AppState) -> Router {
    let open = Router::new()
        .route("/", get(liveness))
        .with_state(state.clone());

    let protected = Router::new()
        .route(
            "/v1/chat/completions",
            get(chat_completions).post(chat_completions),
        )
        .route("/v1/models", get(models_list))
        // generateContent/streamGenerateContent, with an optional
        // publisher segment ahead of the model id.
        .route("/v1/models/{*model}", post(native_generate))
        .route("/v1beta/models/{*model}", post(native_generate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            caller_auth::require_proxy_key,
        ))
        .with_state(state);

    open.merge(protected)
}

async fn liveness(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "auth_mode": state.config.mode.as_str(),
    }))
}

async fn chat_completions(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    info!(method = %method, "chat completions request");
    let result = match state.config.mode {
        AuthMode::ServiceAccount => {
            completions_passthrough(&state, &method, &headers, query, body).await
        }
        AuthMode::ApiKey => completions_translated(&state, body).await,
    };
    result.unwrap_or_else(error_response)
}

/// Service-account mode: Vertex speaks the OpenAI dialect itself, so the
/// body passes through untouched apart from model-id normalization.
async fn completions_passthrough(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> BridgeResult<Response> {
    let mut url = state.auth.completions_url("/chat/completions")?;
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url = append_query(&url, &query);
    }

    let Ok(mut payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return Ok(local_error(
            StatusCode::BAD_REQUEST,
            "request body is not valid JSON",
        ));
    };
    if let Some(model) = payload.get("model").and_then(|model| model.as_str()) {
        let normalized = normalize_model(model);
        payload["model"] = serde_json::Value::String(normalized);
    }
    let body = serde_json::to_vec(&payload)
        .map_err(|err| BridgeError::Internal(err.to_string()))?;

    let upstream_headers = merge_headers(headers, state.auth.headers().await?);
    let response = stream_passthrough(
        state.client.as_ref(),
        to_http_method(method),
        url,
        upstream_headers,
        Some(Bytes::from(body)),
    )
    .await?;
    Ok(upstream_response(response))
}

/// Api-key mode: the upstream has no OpenAI-compatible endpoint, so the body
/// is translated and the reply (or stream) re-framed back.
async fn completions_translated(state: &AppState, body: Bytes) -> BridgeResult<Response> {
    let Ok(request) = serde_json::from_slice::<ChatCompletionRequestBody>(&body) else {
        return Ok(local_error(
            StatusCode::BAD_REQUEST,
            "request body is not a valid chat completion request",
        ));
    };
    let translated = openai_to_gemini(&request);

    let method = if translated.stream {
        GenerateMethod::StreamGenerate
    } else {
        GenerateMethod::Generate
    };
    let mut url = state.auth.generate_url(&translated.model, method);
    let headers: Headers = vec![("Content-Type".to_string(), "application/json".to_string())];

    if translated.stream {
        url = append_query(&url, "alt=sse");
        match stream_translated(
            state.client.as_ref(),
            url,
            headers,
            &translated.body,
            &translated.model,
        )
        .await?
        {
            TranslatedStream::Error(reply) => Ok(json_reply_response(reply)),
            TranslatedStream::Stream(rx) => Ok(sse_response(rx)),
        }
    } else {
        let reply = send_translated(
            state.client.as_ref(),
            url,
            headers,
            &translated.body,
            &translated.model,
        )
        .await?;
        Ok(json_reply_response(reply))
    }
}

async fn native_generate(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    generate_passthrough(&state, &path, &headers, query, body)
        .await
        .unwrap_or_else(error_response)
}

/// Native Gemini dialect: no translation, transparent forwarding.
async fn generate_passthrough(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> BridgeResult<Response> {
    let Some((model_path, method)) = split_generate_path(path) else {
        return Ok(local_error(StatusCode::NOT_FOUND, "unknown generate method"));
    };
    let model = strip_publisher(model_path);
    info!(model = %model, method = method.as_str(), "native generate request");

    let mut upstream_headers = merge_headers(headers, state.auth.headers().await?);
    set_header(&mut upstream_headers, "Content-Type", "application/json");

    match method {
        GenerateMethod::Generate => {
            let url = state.auth.generate_url(model, method);
            let response = state
                .client
                .send(UpstreamRequest {
                    method: HttpMethod::Post,
                    url,
                    headers: upstream_headers,
                    body: Some(body),
                    stream: false,
                })
                .await?;
            let status = response.status;
            let content_type = response.content_type.clone();
            let bytes = response.collect().await;
            Ok(bytes_response(status, &content_type, bytes))
        }
        GenerateMethod::StreamGenerate => {
            let mut url = state.auth.generate_url(model, method);
            if let Some(query) = query.filter(|q| !q.is_empty()) {
                url = append_query(&url, &query);
            }
            let response = stream_passthrough(
                state.client.as_ref(),
                HttpMethod::Post,
                url,
                upstream_headers,
                Some(body),
            )
            .await?;
            Ok(upstream_response(response))
        }
    }
}

async fn models_list(State(state): State<AppState>) -> Response {
    info!("model listing request");
    match vbridge_core::list_models(state.client.as_ref(), state.auth.as_ref(), &state.config)
        .await
    {
        Ok(list) => Json(list).into_response(),
        Err(err) => error_response(err),
    }
}

fn split_generate_path(path: &str) -> Option<(&str, GenerateMethod)> {
    let (model_path, method) = path.rsplit_once(':')?;
    let method = match method {
        "generateContent" => GenerateMethod::Generate,
        "streamGenerateContent" => GenerateMethod::StreamGenerate,
        _ => return None,
    };
    Some((model_path, method))
}

/// `google/gemini-2.0-flash` -> `gemini-2.0-flash`; bare ids pass through.
fn strip_publisher(model: &str) -> &str {
    match model.split_once('/') {
        Some((_, rest)) => rest,
        None => model,
    }
}

/// Bare model ids get the `google/` publisher prefix.
fn normalize_model(model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("google/{model}")
    }
}

fn append_query(url: &str, query: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

fn to_http_method(method: &Method) -> HttpMethod {
    if method == Method::GET {
        HttpMethod::Get
    } else {
        HttpMethod::Post
    }
}

/// Inbound headers minus hop and caller-credential fields, with upstream
/// auth headers merged in.
fn merge_headers(inbound: &HeaderMap, auth_headers: Headers) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in inbound {
        let name = name.as_str();
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("authorization")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    headers.extend(auth_headers);
    headers
}

fn set_header(headers: &mut Headers, name: &str, value: &str) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

fn upstream_response(response: UpstreamResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    match response.body {
        UpstreamBody::Bytes(bytes) => {
            bytes_response(response.status, &response.content_type, bytes)
        }
        UpstreamBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, response.content_type)
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
    }
}

fn bytes_response(status: u16, content_type: &str, body: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY))
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn json_reply_response(reply: JsonReply) -> Response {
    bytes_response(reply.status, "application/json", reply.body)
}

fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn local_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({"error": {"message": message}});
    (status, Json(body)).into_response()
}

fn error_response(err: BridgeError) -> Response {
    let status = match &err {
        BridgeError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        BridgeError::NoValidToken
        | BridgeError::Credential(_)
        | BridgeError::Transport(_)
        | BridgeError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        BridgeError::Config(_) | BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    local_error(status, &err.to_string())
}
