use bytes::Bytes;
use tokio::sync::mpsc;

use vbridge_protocol::gemini::generate::{GenerateContentRequest, GenerateContentResponse};
use vbridge_transform::{StreamReframer, gemini_to_openai};

use crate::auth::Headers;
use crate::client::{HttpMethod, UpstreamClient, UpstreamRequest, UpstreamResponse};
use crate::error::{BridgeError, BridgeResult};

/// Forward a call verbatim, streaming the upstream body through unmodified.
/// Status and content-type surface once up front on the returned response.
pub async fn stream_passthrough(
    client: &dyn UpstreamClient,
    method: HttpMethod,
    url: String,
    headers: Headers,
    body: Option<Bytes>,
) -> BridgeResult<UpstreamResponse> {
    client
        .send(UpstreamRequest {
            method,
            url,
            headers,
            body,
            stream: true,
        })
        .await
}

/// A fully buffered JSON reply with the status to relay.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonReply {
    pub status: u16,
    pub body: Bytes,
}

/// Single-shot translated call: send a generate request, convert a 200 body
/// to the OpenAI dialect. Error bodies are never translated.
pub async fn send_translated(
    client: &dyn UpstreamClient,
    url: String,
    headers: Headers,
    request: &GenerateContentRequest,
    model: &str,
) -> BridgeResult<JsonReply> {
    let payload = encode_body(request)?;
    let response = client
        .send(UpstreamRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(payload),
            stream: false,
        })
        .await?;

    let status = response.status;
    let bytes = response.collect().await;
    if status != 200 {
        return Ok(JsonReply {
            status,
            body: bytes,
        });
    }

    let upstream: GenerateContentResponse = serde_json::from_slice(&bytes)
        .map_err(|err| BridgeError::InvalidResponse(err.to_string()))?;
    let translated = gemini_to_openai(&upstream, model);
    let body = serde_json::to_vec(&translated)
        .map_err(|err| BridgeError::Internal(err.to_string()))?;
    Ok(JsonReply {
        status: 200,
        body: Bytes::from(body),
    })
}

#[derive(Debug)]
pub enum TranslatedStream {
    /// The upstream refused the call before streaming started; its body is
    /// relayed verbatim.
    Error(JsonReply),
    /// Re-framed downstream SSE frames, terminated by the `[DONE]` sentinel.
    Stream(mpsc::Receiver<Bytes>),
}

/// Streaming translated call: open the upstream stream and pipe it through
/// the re-framer. The sentinel is emitted whenever the upstream stream ends;
/// a non-200 initial status never reaches the re-framer.
pub async fn stream_translated(
    client: &dyn UpstreamClient,
    url: String,
    headers: Headers,
    request: &GenerateContentRequest,
    model: &str,
) -> BridgeResult<TranslatedStream> {
    let payload = encode_body(request)?;
    let response = client
        .send(UpstreamRequest {
            method: HttpMethod::Post,
            url,
            headers,
            body: Some(payload),
            stream: true,
        })
        .await?;

    if response.status != 200 {
        let status = response.status;
        let body = response.collect().await;
        return Ok(TranslatedStream::Error(JsonReply { status, body }));
    }

    let (tx, rx) = mpsc::channel::<Bytes>(16);
    let mut reframer = StreamReframer::new(model);

    match response.body {
        crate::client::UpstreamBody::Bytes(bytes) => {
            tokio::spawn(async move {
                for frame in reframer.push(&bytes) {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(reframer.done()).await;
            });
        }
        crate::client::UpstreamBody::Stream(mut upstream) => {
            tokio::spawn(async move {
                while let Some(chunk) = upstream.recv().await {
                    for frame in reframer.push(&chunk) {
                        if tx.send(frame).await.is_err() {
                            // Caller disconnected; dropping the upstream
                            // receiver tears the connection down.
                            return;
                        }
                    }
                }
                let _ = tx.send(reframer.done()).await;
            });
        }
    }

    Ok(TranslatedStream::Stream(rx))
}

fn encode_body(request: &GenerateContentRequest) -> BridgeResult<Bytes> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|err| BridgeError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::UpstreamBody;
    use std::sync::Mutex;

    /// Replays a scripted response for every call.
    struct ScriptedClient {
        replies: Mutex<Vec<ScriptedReply>>,
    }

    enum ScriptedReply {
        Json(u16, &'static str),
        Chunks(Vec<&'static [u8]>),
    }

    impl ScriptedClient {
        fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait::async_trait]
    impl UpstreamClient for ScriptedClient {
        async fn send(&self, _request: UpstreamRequest) -> BridgeResult<UpstreamResponse> {
            let reply = self.replies.lock().unwrap().remove(0);
            match reply {
                ScriptedReply::Json(status, body) => Ok(UpstreamResponse {
                    status,
                    content_type: "application/json".to_string(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                ScriptedReply::Chunks(chunks) => {
                    let (tx, rx) = mpsc::channel(16);
                    tokio::spawn(async move {
                        for chunk in chunks {
                            if tx.send(Bytes::from_static(chunk)).await.is_err() {
                                return;
                            }
                        }
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        content_type: "text/event-stream".to_string(),
                        body: UpstreamBody::Stream(rx),
                    })
                }
            }
        }
    }

    fn generate_request() -> GenerateContentRequest {
        GenerateContentRequest::default()
    }

    #[tokio::test]
    async fn translated_call_converts_success_body() {
        let client = ScriptedClient::new(vec![ScriptedReply::Json(
            200,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"hi"}]},"finishReason":"STOP"}]}"#,
        )]);
        let reply = send_translated(
            &client,
            "https://upstream.test".to_string(),
            Vec::new(),
            &generate_request(),
            "gemini-test",
        )
        .await
        .unwrap();

        assert_eq!(reply.status, 200);
        let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["content"], "hi");
    }

    #[tokio::test]
    async fn translated_call_relays_error_bodies_verbatim() {
        let body = r#"{"error":{"code":429,"message":"slow down"}}"#;
        let client = ScriptedClient::new(vec![ScriptedReply::Json(429, body)]);
        let reply = send_translated(
            &client,
            "https://upstream.test".to_string(),
            Vec::new(),
            &generate_request(),
            "gemini-test",
        )
        .await
        .unwrap();

        assert_eq!(reply.status, 429);
        assert_eq!(&reply.body[..], body.as_bytes());
    }

    #[tokio::test]
    async fn translated_stream_ends_with_sentinel() {
        let client = ScriptedClient::new(vec![ScriptedReply::Chunks(vec![
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]},\"index\":0}]}\n",
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]},\"finishReason\":\"STOP\",\"index\":0}]}\n",
        ])]);
        let stream = stream_translated(
            &client,
            "https://upstream.test".to_string(),
            Vec::new(),
            &generate_request(),
            "gemini-test",
        )
        .await
        .unwrap();

        let TranslatedStream::Stream(mut rx) = stream else {
            panic!("expected a stream");
        };
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[2][..], b"data: [DONE]\n\n");
        let done_count = frames
            .iter()
            .filter(|frame| &frame[..] == b"data: [DONE]\n\n")
            .count();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn translated_stream_short_circuits_on_error_status() {
        let body = r#"{"error":"denied"}"#;
        let client = ScriptedClient::new(vec![ScriptedReply::Json(403, body)]);
        let stream = stream_translated(
            &client,
            "https://upstream.test".to_string(),
            Vec::new(),
            &generate_request(),
            "gemini-test",
        )
        .await
        .unwrap();

        let TranslatedStream::Error(reply) = stream else {
            panic!("expected the error path");
        };
        assert_eq!(reply.status, 403);
        assert_eq!(&reply.body[..], body.as_bytes());
    }
}
