use super::{GenerateMethod, Headers, UpstreamAuth};
use crate::config::AuthMode;
use crate::error::{BridgeError, BridgeResult};

const GLOBAL_HOST: &str = "https://aiplatform.googleapis.com";

/// Static API-key identity (express mode). The key travels in the URL, so
/// `headers` is empty and there is no refresh lifecycle.
pub struct ApiKeyAuth {
    api_key: String,
}

impl ApiKeyAuth {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }

    fn append_key(&self, url: String) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}key={}", self.api_key)
    }
}

#[async_trait::async_trait]
impl UpstreamAuth for ApiKeyAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::ApiKey
    }

    async fn headers(&self) -> BridgeResult<Headers> {
        Ok(Vec::new())
    }

    fn completions_url(&self, _path: &str) -> BridgeResult<String> {
        // Express mode has no OpenAI-compatible endpoint; callers must
        // translate the body and hit the generate endpoint instead.
        Err(BridgeError::Unsupported(
            "api-key mode has no OpenAI-compatible completions endpoint",
        ))
    }

    fn generate_url(&self, model: &str, method: GenerateMethod) -> String {
        self.append_key(format!(
            "{GLOBAL_HOST}/v1/publishers/google/models/{model}:{}",
            method.as_str()
        ))
    }

    fn models_url(&self, publisher: &str) -> String {
        self.append_key(format!("{GLOBAL_HOST}/v1beta1/publishers/{publisher}/models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn headers_are_empty() {
        let auth = ApiKeyAuth::new("secret".to_string());
        assert!(auth.headers().await.unwrap().is_empty());
    }

    #[test]
    fn key_travels_in_the_url() {
        let auth = ApiKeyAuth::new("secret".to_string());
        assert_eq!(
            auth.generate_url("gemini-2.0-flash", GenerateMethod::Generate),
            "https://aiplatform.googleapis.com/v1/publishers/google/models/gemini-2.0-flash:generateContent?key=secret"
        );
        assert_eq!(
            auth.models_url("google"),
            "https://aiplatform.googleapis.com/v1beta1/publishers/google/models?key=secret"
        );
    }

    #[test]
    fn appends_with_ampersand_when_query_exists() {
        let auth = ApiKeyAuth::new("secret".to_string());
        assert_eq!(
            auth.append_key("https://example.com/x?alt=sse".to_string()),
            "https://example.com/x?alt=sse&key=secret"
        );
    }

    #[test]
    fn completions_url_is_unsupported() {
        let auth = ApiKeyAuth::new("secret".to_string());
        assert!(matches!(
            auth.completions_url("/chat/completions"),
            Err(BridgeError::Unsupported(_))
        ));
    }
}
