use bytes::Bytes;

use vbridge_protocol::gemini::generate::GenerateContentResponse;
use vbridge_protocol::openai::chat::{
    ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionChunkObject, ChatCompletionDelta,
    CompletionUsage,
};
use vbridge_protocol::sse::{self, SseDataScanner};

use crate::response::map_finish_reason;

/// Re-frames a `streamGenerateContent` SSE stream into OpenAI
/// `chat.completion.chunk` frames.
///
/// One reframer exists per streaming call. The response id and creation
/// timestamp are fixed at construction so every emitted chunk correlates to
/// the same logical response. Frames that fail to parse are dropped without
/// aborting the stream.
#[derive(Debug)]
pub struct StreamReframer {
    id: String,
    created: i64,
    model: String,
    role_sent: bool,
    scanner: SseDataScanner,
}

impl StreamReframer {
    pub fn new(model: &str) -> Self {
        Self {
            id: crate::new_completion_id(),
            created: crate::unix_now(),
            model: model.to_string(),
            role_sent: false,
            scanner: SseDataScanner::new(),
        }
    }

    /// Feed newly arrived upstream bytes; returns zero or more encoded
    /// downstream frames.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let payloads = self.scanner.push_bytes(chunk);
        let mut frames = Vec::new();
        for payload in payloads {
            self.reframe_payload(&payload, &mut frames);
        }
        frames
    }

    /// The unconditional terminal sentinel.
    pub fn done(&self) -> Bytes {
        sse::done_frame()
    }

    fn reframe_payload(&mut self, payload: &str, frames: &mut Vec<Bytes>) {
        let Ok(response) = serde_json::from_str::<GenerateContentResponse>(payload) else {
            // Malformed partial frames are tolerated, not fatal.
            return;
        };

        for candidate in &response.candidates {
            let text = candidate.joined_text();

            let mut delta = ChatCompletionDelta::default();
            if !self.role_sent {
                delta.role = Some("assistant".to_string());
                self.role_sent = true;
            }
            if !text.is_empty() {
                delta.content = Some(text);
            }

            let usage = match (&candidate.finish_reason, &response.usage_metadata) {
                (Some(_), Some(meta)) => Some(CompletionUsage {
                    prompt_tokens: meta.prompt_token_count.unwrap_or(0),
                    completion_tokens: meta.candidates_token_count.unwrap_or(0),
                    total_tokens: meta.total_token_count.unwrap_or(0),
                }),
                _ => None,
            };

            let chunk = ChatCompletionChunk {
                id: self.id.clone(),
                object: ChatCompletionChunkObject::ChatCompletionChunk,
                created: self.created,
                model: self.model.clone(),
                choices: vec![ChatCompletionChunkChoice {
                    index: candidate.index.unwrap_or(0),
                    delta,
                    finish_reason: candidate
                        .finish_reason
                        .as_deref()
                        .and_then(map_finish_reason)
                        .map(str::to_string),
                }],
                usage,
            };

            if let Ok(json) = serde_json::to_string(&chunk) {
                frames.push(sse::data_frame(&json));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn upstream_frame(text: &str, finish: Option<&str>, with_usage: bool) -> String {
        let mut candidate = serde_json::json!({
            "content": {"role": "model", "parts": [{"text": text}]},
            "index": 0,
        });
        if let Some(finish) = finish {
            candidate["finishReason"] = Value::from(finish);
        }
        let mut frame = serde_json::json!({"candidates": [candidate]});
        if with_usage {
            frame["usageMetadata"] = serde_json::json!({
                "promptTokenCount": 5,
                "candidatesTokenCount": 2,
                "totalTokenCount": 7,
            });
        }
        format!("data: {frame}\n")
    }

    fn decode(frames: &[Bytes]) -> Vec<Value> {
        frames
            .iter()
            .map(|frame| {
                let text = std::str::from_utf8(frame).unwrap();
                let payload = text.strip_prefix("data: ").unwrap().trim_end();
                serde_json::from_str(payload).unwrap()
            })
            .collect()
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let input = format!(
            "{}{}",
            upstream_frame("Hello", None, false),
            upstream_frame(" world", Some("STOP"), true)
        );
        let bytes = input.as_bytes();

        let mut whole = StreamReframer::new("gemini-test");
        let whole_frames = whole.push(bytes);

        // Same two frames, arriving across three arbitrary splits.
        let mut split = StreamReframer::new("gemini-test");
        let mut split_frames = Vec::new();
        split_frames.extend(split.push(&bytes[..7]));
        split_frames.extend(split.push(&bytes[7..bytes.len() - 11]));
        split_frames.extend(split.push(&bytes[bytes.len() - 11..]));

        let mut whole_decoded = decode(&whole_frames);
        let mut split_decoded = decode(&split_frames);
        assert_eq!(whole_decoded.len(), 2);
        assert_eq!(split_decoded.len(), 2);

        // Ids and timestamps differ per reframer; compare the rest.
        for value in whole_decoded.iter_mut().chain(split_decoded.iter_mut()) {
            let obj = value.as_object_mut().unwrap();
            obj.remove("id");
            obj.remove("created");
        }
        assert_eq!(whole_decoded, split_decoded);
    }

    #[test]
    fn role_delta_only_on_first_chunk() {
        let mut reframer = StreamReframer::new("gemini-test");
        let mut frames = reframer.push(upstream_frame("a", None, false).as_bytes());
        frames.extend(reframer.push(upstream_frame("b", Some("STOP"), false).as_bytes()));

        let decoded = decode(&frames);
        assert_eq!(decoded[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(decoded[0]["choices"][0]["delta"]["content"], "a");
        assert!(decoded[1]["choices"][0]["delta"].get("role").is_none());
        assert_eq!(decoded[1]["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn empty_text_omits_content_field() {
        let mut reframer = StreamReframer::new("gemini-test");
        let frames = reframer.push(upstream_frame("", Some("STOP"), false).as_bytes());
        let decoded = decode(&frames);
        assert_eq!(decoded.len(), 1);
        let delta = decoded[0]["choices"][0]["delta"].as_object().unwrap();
        assert_eq!(delta.get("role").unwrap(), "assistant");
        assert!(delta.get("content").is_none());
    }

    #[test]
    fn malformed_frames_are_skipped_silently() {
        let mut reframer = StreamReframer::new("gemini-test");
        let mut frames = reframer.push(b"data: {not json\n");
        assert!(frames.is_empty());
        frames.extend(reframer.push(upstream_frame("ok", None, false).as_bytes()));
        assert_eq!(decode(&frames).len(), 1);
    }

    #[test]
    fn usage_requires_finish_reason_and_metadata_together() {
        let mut reframer = StreamReframer::new("gemini-test");

        // Usage without a finish reason: not attached.
        let frames = reframer.push(upstream_frame("a", None, true).as_bytes());
        assert!(decode(&frames)[0].get("usage").is_none());

        // Finish reason without usage: not attached.
        let frames = reframer.push(upstream_frame("b", Some("STOP"), false).as_bytes());
        assert!(decode(&frames)[0].get("usage").is_none());

        // Both present: attached.
        let mut reframer = StreamReframer::new("gemini-test");
        let frames = reframer.push(upstream_frame("c", Some("STOP"), true).as_bytes());
        let usage = &decode(&frames)[0]["usage"];
        assert_eq!(usage["prompt_tokens"], 5);
        assert_eq!(usage["completion_tokens"], 2);
        assert_eq!(usage["total_tokens"], 7);
    }

    #[test]
    fn id_and_created_are_stable_across_chunks() {
        let mut reframer = StreamReframer::new("gemini-test");
        let mut frames = reframer.push(upstream_frame("a", None, false).as_bytes());
        frames.extend(reframer.push(upstream_frame("b", None, false).as_bytes()));
        let decoded = decode(&frames);
        assert_eq!(decoded[0]["id"], decoded[1]["id"]);
        assert_eq!(decoded[0]["created"], decoded[1]["created"]);
    }

    #[test]
    fn done_frame_is_the_terminal_sentinel() {
        let reframer = StreamReframer::new("gemini-test");
        assert_eq!(&reframer.done()[..], b"data: [DONE]\n\n");
    }
}
