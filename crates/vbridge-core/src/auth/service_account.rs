use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::oauth::{AccessToken, TokenSource};
use super::{GenerateMethod, Headers, ServiceAccountDeps, UpstreamAuth};
use crate::config::AuthMode;
use crate::error::{BridgeError, BridgeResult};

/// A token is treated as expired this long before its actual expiry.
pub const TOKEN_EXPIRY_BUFFER: time::Duration = time::Duration::minutes(10);
/// Cadence of the background refresh task.
pub const BACKGROUND_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

const GLOBAL_HOST: &str = "https://aiplatform.googleapis.com";

/// The bearer token pair. Mutated only under the credential mutex.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_token: Option<String>,
    /// UTC. Present whenever `access_token` is.
    pub expiry: Option<OffsetDateTime>,
}

impl Credentials {
    pub fn is_valid(&self, now: OffsetDateTime) -> bool {
        match (&self.access_token, self.expiry) {
            (Some(_), Some(expiry)) => now + TOKEN_EXPIRY_BUFFER < expiry,
            _ => false,
        }
    }
}

/// Persists a freshly obtained token so a restart need not re-authenticate.
pub trait TokenStore: Send + Sync {
    fn save(&self, token: &str, expiry: OffsetDateTime) -> std::io::Result<()>;
}

/// OAuth-style service-account identity with a refresh lifecycle.
pub struct ServiceAccountAuth {
    inner: Arc<Inner>,
    refresh_task: StdMutex<Option<JoinHandle<()>>>,
}

struct Inner {
    project_id: String,
    location: String,
    auto_refresh: bool,
    token_source: Arc<dyn TokenSource>,
    token_store: Arc<dyn TokenStore>,
    credentials: Mutex<Credentials>,
}

impl ServiceAccountAuth {
    pub fn new(
        project_id: String,
        location: String,
        auto_refresh: bool,
        deps: ServiceAccountDeps,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                project_id,
                location,
                auto_refresh,
                token_source: deps.token_source,
                token_store: deps.token_store,
                credentials: Mutex::new(deps.initial),
            }),
            refresh_task: StdMutex::new(None),
        }
    }
}

impl Inner {
    fn base_url(&self) -> String {
        if self.location == "global" {
            GLOBAL_HOST.to_string()
        } else {
            format!("https://{}-aiplatform.googleapis.com", self.location)
        }
    }

    /// Fetch a new token into the already-locked credential slot. Failure is
    /// logged and leaves the slot untouched; callers surface the miss.
    async fn refresh_slot(&self, credentials: &mut Credentials) {
        match self.token_source.fetch().await {
            Ok(AccessToken { token, expiry }) => {
                if let Err(err) = self.token_store.save(&token, expiry) {
                    warn!(error = %err, "token persistence failed");
                }
                credentials.access_token = Some(token);
                credentials.expiry = Some(expiry);
                info!(expiry = %expiry, "access token refreshed");
            }
            Err(err) => error!(error = %err, "access token refresh failed"),
        }
    }

    async fn ensure_fresh(&self) {
        let mut credentials = self.credentials.lock().await;
        if credentials.is_valid(OffsetDateTime::now_utc()) {
            return;
        }
        self.refresh_slot(&mut credentials).await;
    }
}

#[async_trait::async_trait]
impl UpstreamAuth for ServiceAccountAuth {
    fn mode(&self) -> AuthMode {
        AuthMode::ServiceAccount
    }

    async fn headers(&self) -> BridgeResult<Headers> {
        // One critical section covers validity-check-then-refresh, so a
        // caller that finds a refresh in flight waits on the lock instead of
        // issuing a duplicate.
        let mut credentials = self.inner.credentials.lock().await;
        if !credentials.is_valid(OffsetDateTime::now_utc()) {
            self.inner.refresh_slot(&mut credentials).await;
        }
        let Some(token) = credentials.access_token.clone() else {
            return Err(BridgeError::NoValidToken);
        };

        Ok(vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            (
                "x-goog-user-project".to_string(),
                self.inner.project_id.clone(),
            ),
        ])
    }

    fn completions_url(&self, path: &str) -> BridgeResult<String> {
        Ok(format!(
            "{}/v1/projects/{}/locations/{}/endpoints/openapi{path}",
            self.inner.base_url(),
            self.inner.project_id,
            self.inner.location,
        ))
    }

    fn generate_url(&self, model: &str, method: GenerateMethod) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{model}:{}",
            self.inner.base_url(),
            self.inner.project_id,
            self.inner.location,
            method.as_str(),
        )
    }

    fn models_url(&self, publisher: &str) -> String {
        format!("{}/v1beta1/publishers/{publisher}/models", self.inner.base_url())
    }

    async fn start(&self) {
        self.inner.ensure_fresh().await;
        if !self.inner.auto_refresh {
            return;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BACKGROUND_REFRESH_INTERVAL);
            // The first tick completes immediately; the initial refresh
            // already happened above.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.ensure_fresh().await;
            }
        });
        info!(
            interval_secs = BACKGROUND_REFRESH_INTERVAL.as_secs(),
            "background token refresh scheduled"
        );
        if let Ok(mut slot) = self.refresh_task.lock() {
            *slot = Some(handle);
        }
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.refresh_task.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSource {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> BridgeResult<AccessToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent callers get a chance to contend.
            tokio::task::yield_now().await;
            if self.fail {
                return Err(BridgeError::Credential("backend said no".to_string()));
            }
            Ok(AccessToken {
                token: "fresh-token".to_string(),
                expiry: OffsetDateTime::now_utc() + time::Duration::hours(1),
            })
        }
    }

    struct NullStore;

    impl TokenStore for NullStore {
        fn save(&self, _token: &str, _expiry: OffsetDateTime) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn auth_with(source: Arc<CountingSource>, initial: Credentials) -> ServiceAccountAuth {
        ServiceAccountAuth::new(
            "proj-1".to_string(),
            "us-central1".to_string(),
            false,
            ServiceAccountDeps {
                token_source: source,
                token_store: Arc::new(NullStore),
                initial,
            },
        )
    }

    fn credentials_expiring_in(minutes: i64) -> Credentials {
        Credentials {
            access_token: Some("old-token".to_string()),
            expiry: Some(OffsetDateTime::now_utc() + time::Duration::minutes(minutes)),
        }
    }

    #[tokio::test]
    async fn refreshes_inside_expiry_buffer() {
        let source = CountingSource::new(false);
        let auth = auth_with(source.clone(), credentials_expiring_in(9));
        let headers = auth.headers().await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(headers[0].1, "Bearer fresh-token");
    }

    #[tokio::test]
    async fn does_not_refresh_outside_expiry_buffer() {
        let source = CountingSource::new(false);
        let auth = auth_with(source.clone(), credentials_expiring_in(11));
        let headers = auth.headers().await.unwrap();
        assert_eq!(source.calls(), 0);
        assert_eq!(headers[0].1, "Bearer old-token");
        assert_eq!(headers[1], ("x-goog-user-project".to_string(), "proj-1".to_string()));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let source = CountingSource::new(false);
        let auth = Arc::new(auth_with(source.clone(), Credentials::default()));

        let calls = (0..8).map(|_| {
            let auth = auth.clone();
            async move { auth.headers().await }
        });
        let results = futures_util::future::join_all(calls).await;

        assert_eq!(source.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap()[0].1, "Bearer fresh-token");
        }
    }

    #[tokio::test]
    async fn failed_refresh_without_token_is_an_auth_error() {
        let source = CountingSource::new(true);
        let auth = auth_with(source.clone(), Credentials::default());
        let err = auth.headers().await.unwrap_err();
        assert!(matches!(err, BridgeError::NoValidToken));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn region_and_global_hosts() {
        let source = CountingSource::new(false);
        let auth = auth_with(source, Credentials::default());
        assert_eq!(
            auth.generate_url("gemini-2.0-flash", GenerateMethod::Generate),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/proj-1/locations/us-central1/publishers/google/models/gemini-2.0-flash:generateContent"
        );

        let global = ServiceAccountAuth::new(
            "proj-1".to_string(),
            "global".to_string(),
            false,
            ServiceAccountDeps {
                token_source: CountingSource::new(false),
                token_store: Arc::new(NullStore),
                initial: Credentials::default(),
            },
        );
        assert_eq!(
            global.generate_url("gemini-2.0-flash", GenerateMethod::StreamGenerate),
            "https://aiplatform.googleapis.com/v1/projects/proj-1/locations/global/publishers/google/models/gemini-2.0-flash:streamGenerateContent"
        );
        assert_eq!(
            global.completions_url("/chat/completions").unwrap(),
            "https://aiplatform.googleapis.com/v1/projects/proj-1/locations/global/endpoints/openapi/chat/completions"
        );
        assert_eq!(
            global.models_url("anthropic"),
            "https://aiplatform.googleapis.com/v1beta1/publishers/anthropic/models"
        );
    }
}
