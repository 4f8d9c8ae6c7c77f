use vbridge_protocol::gemini::generate::{
    Content, FileData, GenerateContentRequest, GenerationConfig, InlineData, Part,
};
use vbridge_protocol::openai::chat::{
    ChatCompletionRequestBody, ChatMessage, MessageContent, StopSequences,
};

const PUBLISHER_PREFIX: &str = "google/";
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedRequest {
    pub model: String,
    pub body: GenerateContentRequest,
    pub stream: bool,
}

/// Translate an OpenAI chat-completion request into a `generateContent`
/// request. A leading `google/` publisher prefix is dropped from the model
/// id; other publisher prefixes pass through for the caller to route on.
pub fn openai_to_gemini(request: &ChatCompletionRequestBody) -> TranslatedRequest {
    let model = request
        .model
        .strip_prefix(PUBLISHER_PREFIX)
        .unwrap_or(&request.model)
        .to_string();

    let (system_instruction, contents) = convert_messages(&request.messages);

    let generation_config = GenerationConfig {
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.as_ref().map(|stop| match stop {
            StopSequences::Single(value) => vec![value.clone()],
            StopSequences::Many(values) => values.clone(),
        }),
        candidate_count: request.n.filter(|n| *n > 1),
    };

    TranslatedRequest {
        model,
        body: GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: Some(generation_config).filter(|config| !config.is_empty()),
        },
        stream: request.stream.unwrap_or(false),
    }
}

fn convert_messages(messages: &[ChatMessage]) -> (Option<Content>, Vec<Content>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        if message.role == "system" {
            match &message.content {
                Some(MessageContent::Text(text)) => system_parts.push(Part::text(text.clone())),
                Some(MessageContent::Parts(parts)) => {
                    // Only text parts contribute to the system instruction.
                    for part in parts {
                        if part.part_type == "text" {
                            system_parts
                                .push(Part::text(part.text.clone().unwrap_or_default()));
                        }
                    }
                }
                None => {}
            }
            continue;
        }

        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        let parts = message
            .content
            .as_ref()
            .map(content_to_parts)
            .unwrap_or_default();
        if !parts.is_empty() {
            contents.push(Content {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: system_parts,
        })
    };
    (system_instruction, contents)
}

fn content_to_parts(content: &MessageContent) -> Vec<Part> {
    let items = match content {
        MessageContent::Text(text) => return vec![Part::text(text.clone())],
        MessageContent::Parts(items) => items,
    };

    let mut parts = Vec::new();
    for item in items {
        match item.part_type.as_str() {
            "text" => parts.push(Part::text(item.text.clone().unwrap_or_default())),
            "image_url" => {
                let url = match &item.image_url {
                    Some(image_url) => image_url.url(),
                    None => continue,
                };
                if let Some(stripped) = url.strip_prefix("data:") {
                    // data:<mime>;base64,<payload>
                    let Some((mime, payload)) = stripped.split_once(";base64,") else {
                        continue;
                    };
                    parts.push(Part {
                        inline_data: Some(InlineData {
                            mime_type: mime.to_string(),
                            data: payload.to_string(),
                        }),
                        ..Part::default()
                    });
                } else if !url.is_empty() {
                    parts.push(Part {
                        file_data: Some(FileData {
                            mime_type: DEFAULT_IMAGE_MIME.to_string(),
                            file_uri: url.to_string(),
                        }),
                        ..Part::default()
                    });
                }
            }
            _ => {}
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbridge_protocol::openai::chat::{ContentPart, ImageUrl, ImageUrlObject};

    fn text_message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.to_string())),
        }
    }

    fn request_with(messages: Vec<ChatMessage>) -> ChatCompletionRequestBody {
        ChatCompletionRequestBody {
            model: "google/gemini-2.0-flash".to_string(),
            messages,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            n: None,
            stream: None,
        }
    }

    #[test]
    fn strips_google_publisher_prefix_only() {
        let out = openai_to_gemini(&request_with(vec![text_message("user", "hi")]));
        assert_eq!(out.model, "gemini-2.0-flash");

        let mut request = request_with(vec![text_message("user", "hi")]);
        request.model = "anthropic/claude-x".to_string();
        assert_eq!(openai_to_gemini(&request).model, "anthropic/claude-x");
    }

    #[test]
    fn maps_roles_and_extracts_system_instruction() {
        let out = openai_to_gemini(&request_with(vec![
            text_message("system", "be brief"),
            text_message("user", "hello"),
            text_message("assistant", "hi there"),
            text_message("tool", "ignored role"),
        ]));

        let system = out.body.system_instruction.expect("system instruction");
        assert_eq!(system.parts, vec![Part::text("be brief")]);
        assert!(system.role.is_none());

        let roles: Vec<&str> = out
            .body
            .contents
            .iter()
            .map(|content| content.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn system_multipart_takes_text_parts_only() {
        let message = ChatMessage {
            role: "system".to_string(),
            content: Some(MessageContent::Parts(vec![
                ContentPart {
                    part_type: "text".to_string(),
                    text: Some("rule one".to_string()),
                    image_url: None,
                },
                ContentPart {
                    part_type: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl::Plain("https://example.com/x.png".to_string())),
                },
            ])),
        };
        let out = openai_to_gemini(&request_with(vec![message]));
        let system = out.body.system_instruction.expect("system instruction");
        assert_eq!(system.parts, vec![Part::text("rule one")]);
    }

    #[test]
    fn splits_data_uri_into_inline_data() {
        let message = ChatMessage {
            role: "user".to_string(),
            content: Some(MessageContent::Parts(vec![ContentPart {
                part_type: "image_url".to_string(),
                text: None,
                image_url: Some(ImageUrl::Detailed(ImageUrlObject {
                    url: "data:image/png;base64,AAAA".to_string(),
                    detail: None,
                })),
            }])),
        };
        let out = openai_to_gemini(&request_with(vec![message]));
        let inline = out.body.contents[0].parts[0]
            .inline_data
            .clone()
            .expect("inline data");
        assert_eq!(inline.mime_type, "image/png");
        assert_eq!(inline.data, "AAAA");
    }

    #[test]
    fn remote_image_gets_default_mime() {
        let message = ChatMessage {
            role: "user".to_string(),
            content: Some(MessageContent::Parts(vec![ContentPart {
                part_type: "image_url".to_string(),
                text: None,
                image_url: Some(ImageUrl::Plain("https://example.com/cat.jpg".to_string())),
            }])),
        };
        let out = openai_to_gemini(&request_with(vec![message]));
        let file = out.body.contents[0].parts[0]
            .file_data
            .clone()
            .expect("file data");
        assert_eq!(file.mime_type, "image/jpeg");
        assert_eq!(file.file_uri, "https://example.com/cat.jpg");
    }

    #[test]
    fn generation_parameters_map_one_to_one() {
        let mut request = request_with(vec![text_message("user", "hi")]);
        request.max_tokens = Some(100);
        request.max_completion_tokens = Some(200);
        request.temperature = Some(0.5);
        request.top_p = Some(0.9);
        request.stop = Some(StopSequences::Single("END".to_string()));
        request.n = Some(3);
        request.stream = Some(true);

        let out = openai_to_gemini(&request);
        assert!(out.stream);
        let config = out.body.generation_config.expect("generation config");
        assert_eq!(config.max_output_tokens, Some(200));
        assert_eq!(config.temperature, Some(0.5));
        assert_eq!(config.top_p, Some(0.9));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));
        assert_eq!(config.candidate_count, Some(3));
    }

    #[test]
    fn single_candidate_and_absent_parameters_are_omitted() {
        let mut request = request_with(vec![text_message("user", "hi")]);
        request.n = Some(1);
        let out = openai_to_gemini(&request);
        assert!(out.body.generation_config.is_none());
        assert!(!out.stream);

        let json = serde_json::to_value(&out.body).unwrap();
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("systemInstruction").is_none());
    }
}
