use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::auth::Headers;
use crate::error::{BridgeError, BridgeResult};

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    /// Whether the caller wants the response body as a live stream. Non-2xx
    /// responses are always collected into bytes regardless.
    pub stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: String,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    /// Drain the body into one buffer. Used on error paths where the whole
    /// upstream payload is forwarded verbatim.
    pub async fn collect(self) -> Bytes {
        match self.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut receiver) => {
                let mut buffer = Vec::new();
                while let Some(chunk) = receiver.recv().await {
                    buffer.extend_from_slice(&chunk);
                }
                Bytes::from(buffer)
            }
        }
    }
}

/// The one seam between the gateway and the network; mockable in tests.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> BridgeResult<UpstreamResponse>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(600),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqClient {
    client: wreq::Client,
    stream_idle_timeout: Duration,
}

impl WreqClient {
    pub fn new(config: ClientConfig) -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self {
            client,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }
}

#[async_trait::async_trait]
impl UpstreamClient for WreqClient {
    async fn send(&self, request: UpstreamRequest) -> BridgeResult<UpstreamResponse> {
        let method = match request.method {
            HttpMethod::Get => wreq::Method::GET,
            HttpMethod::Post => wreq::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let is_success = (200..300).contains(&status);
        if !is_success || !request.stream {
            let body = response
                .bytes()
                .await
                .map_err(|err| BridgeError::Transport(err.to_string()))?;
            return Ok(UpstreamResponse {
                status,
                content_type,
                body: UpstreamBody::Bytes(body),
            });
        }

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let idle_timeout = self.stream_idle_timeout;
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle_timeout, stream.next()).await;
                let Ok(item) = next else {
                    break;
                };
                let Some(item) = item else {
                    break;
                };
                let Ok(chunk) = item else {
                    break;
                };
                // A failed send means the caller went away; dropping the
                // response closes the upstream connection.
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            content_type,
            body: UpstreamBody::Stream(rx),
        })
    }
}
