use vbridge_protocol::gemini::generate::GenerateContentResponse;
use vbridge_protocol::openai::chat::{
    ChatCompletionChoice, ChatCompletionMessage, ChatCompletionObject, ChatCompletionResponse,
    CompletionUsage,
};

/// Map an upstream finish reason onto the OpenAI vocabulary. Matching is
/// exact and case-sensitive; anything unrecognized yields no finish reason.
pub fn map_finish_reason(reason: &str) -> Option<&'static str> {
    match reason {
        "STOP" | "FINISH_REASON_STOP" => Some("stop"),
        "MAX_TOKENS" | "FINISH_REASON_MAX_TOKENS" => Some("length"),
        "SAFETY" | "FINISH_REASON_SAFETY" | "RECITATION" => Some("content_filter"),
        _ => None,
    }
}

/// Translate a `generateContent` response into an OpenAI chat completion.
/// One choice per candidate, in candidate order; all text parts of a
/// candidate concatenate into a single message.
pub fn gemini_to_openai(response: &GenerateContentResponse, model: &str) -> ChatCompletionResponse {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| ChatCompletionChoice {
            index: index as i64,
            message: ChatCompletionMessage {
                role: "assistant".to_string(),
                content: candidate.joined_text(),
            },
            finish_reason: candidate
                .finish_reason
                .as_deref()
                .and_then(map_finish_reason)
                .map(str::to_string),
        })
        .collect();

    let usage = response.usage_metadata.clone().unwrap_or_default();

    ChatCompletionResponse {
        id: crate::new_completion_id(),
        object: ChatCompletionObject::ChatCompletion,
        created: crate::unix_now(),
        model: model.to_string(),
        choices,
        usage: CompletionUsage {
            prompt_tokens: usage.prompt_token_count.unwrap_or(0),
            completion_tokens: usage.candidates_token_count.unwrap_or(0),
            total_tokens: usage.total_token_count.unwrap_or(0),
        },
    }
}
