use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum OmieError {
    /// Non-retryable API rejection (4xx other than 429).
    #[error("Omie API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Omie call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("rate limiter closed")]
    Limiter(#[from] tokio::sync::AcquireError),
}

/// Bounds in-flight calls and enforces a minimum delay between the start of
/// consecutive calls, process-wide for the client that owns it.
pub struct RateLimiter {
    semaphore: Semaphore,
    last_start: Mutex<Option<Instant>>,
    min_spacing: Duration,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent),
            last_start: Mutex::new(None),
            min_spacing,
        }
    }

    /// Waits for a free slot, then for the spacing window. The returned
    /// permit must be held for the duration of the request.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, tokio::sync::AcquireError> {
        let permit = self.semaphore.acquire().await?;

        // The lock is held across the sleep so that concurrent callers
        // serialize their start times instead of waking together.
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        Ok(permit)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(300))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with random jitter: base * 2^attempt + jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay * 2u32.saturating_pow(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

enum AttemptError {
    Fatal(OmieError),
    Retryable(String),
}

/// Client for the Omie REST API.
///
/// All calls are POSTs with a fixed envelope carrying the credentials and a
/// single-element `param` array. Transport failures, 429 and 5xx responses
/// are retried with exponential backoff; other 4xx responses fail at once.
pub struct OmieApiClient {
    http: reqwest::Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl OmieApiClient {
    pub fn new(config: &crate::shared::config::OmieConfig) -> Self {
        Self::with_policy(config, RetryPolicy::default(), Arc::new(RateLimiter::default()))
    }

    pub fn with_policy(
        config: &crate::shared::config::OmieConfig,
        policy: RetryPolicy,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            limiter,
            policy,
            timeout: Duration::from_secs(30),
        }
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Execute one Omie call and return the raw response JSON.
    pub async fn call(
        &self,
        endpoint_path: &str,
        call_name: &str,
        params: Value,
    ) -> Result<Value, OmieError> {
        let url = self.endpoint_url(endpoint_path);
        let body = json!({
            "call": call_name,
            "app_key": self.app_key,
            "app_secret": self.app_secret,
            "param": [params],
        });

        let mut last_error = String::new();
        for attempt in 0..=self.policy.max_retries {
            match self.execute(&url, &body).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(msg)) => {
                    last_error = msg;
                    if attempt < self.policy.max_retries {
                        let delay = self.policy.backoff_delay(attempt);
                        tracing::warn!(
                            call = call_name,
                            attempt = attempt + 1,
                            "Omie call failed ({}), retrying in {:?}",
                            last_error,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(OmieError::RetriesExhausted {
            attempts: self.policy.max_retries + 1,
            last_error,
        })
    }

    async fn execute(&self, url: &str, body: &Value) -> Result<Value, AttemptError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;

        let response = match self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Err(AttemptError::Retryable(format!("transport: {e}"))),
        };

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| AttemptError::Retryable(format!("body: {e}")));
        }

        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(AttemptError::Retryable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text
            )))
        } else {
            Err(AttemptError::Fatal(OmieError::Api {
                status: status.as_u16(),
                body: text,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::config::OmieConfig;
    use crate::shared::omie::endpoints;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockState {
        hits: AtomicUsize,
        failures_before_success: usize,
        fail_status: StatusCode,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        arrivals: std::sync::Mutex<Vec<std::time::Instant>>,
        last_body: std::sync::Mutex<Option<serde_json::Value>>,
    }

    impl MockState {
        fn new(failures_before_success: usize, fail_status: StatusCode) -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicUsize::new(0),
                failures_before_success,
                fail_status,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                arrivals: std::sync::Mutex::new(Vec::new()),
                last_body: std::sync::Mutex::new(None),
            })
        }
    }

    async fn mock_handler(
        State(state): State<Arc<MockState>>,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        state.arrivals.lock().unwrap().push(std::time::Instant::now());
        *state.last_body.lock().unwrap() = Some(body);

        let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let hit = state.hits.fetch_add(1, Ordering::SeqCst);
        if hit < state.failures_before_success {
            (state.fail_status, Json(serde_json::json!({"faultstring": "erro"})))
        } else {
            (StatusCode::OK, Json(serde_json::json!({"ok": true})))
        }
    }

    async fn spawn_mock(state: Arc<MockState>) -> String {
        let app = Router::new()
            .route(endpoints::CLIENTES, post(mock_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fast_client(base_url: String, limiter: Arc<RateLimiter>) -> OmieApiClient {
        let config = OmieConfig {
            base_url,
            app_key: "key".to_string(),
            app_secret: "secret".to_string(),
        };
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(5),
            max_jitter: Duration::from_millis(2),
        };
        OmieApiClient::with_policy(&config, policy, limiter)
    }

    #[tokio::test]
    async fn test_retries_recover_from_429() {
        let state = MockState::new(2, StatusCode::TOO_MANY_REQUESTS);
        let base = spawn_mock(state.clone()).await;
        let client = fast_client(base, Arc::new(RateLimiter::new(3, Duration::ZERO)));

        let result = client
            .call(endpoints::CLIENTES, "ListarClientes", serde_json::json!({"pagina": 1}))
            .await
            .unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(state.hits.load(Ordering::SeqCst), 3);

        let body = state.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["call"], "ListarClientes");
        assert_eq!(body["app_key"], "key");
        assert_eq!(body["param"][0]["pagina"], 1);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let state = MockState::new(usize::MAX, StatusCode::BAD_REQUEST);
        let base = spawn_mock(state.clone()).await;
        let client = fast_client(base, Arc::new(RateLimiter::new(3, Duration::ZERO)));

        let err = client
            .call(endpoints::CLIENTES, "ListarClientes", serde_json::json!({}))
            .await
            .unwrap_err();

        match err {
            OmieError::Api { status, .. } => assert_eq!(status, 400),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retry_budget() {
        let state = MockState::new(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR);
        let base = spawn_mock(state.clone()).await;
        let client = fast_client(base, Arc::new(RateLimiter::new(3, Duration::ZERO)));

        let err = client
            .call(endpoints::CLIENTES, "ListarClientes", serde_json::json!({}))
            .await
            .unwrap_err();

        match err {
            OmieError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(state.hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let state = MockState::new(0, StatusCode::OK);
        let base = spawn_mock(state.clone()).await;
        let client = Arc::new(fast_client(
            base,
            Arc::new(RateLimiter::new(3, Duration::from_millis(1))),
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .call(endpoints::CLIENTES, "ListarClientes", serde_json::json!({}))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(state.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(state.hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_call_starts_are_spaced() {
        let state = MockState::new(0, StatusCode::OK);
        let base = spawn_mock(state.clone()).await;
        let client = Arc::new(fast_client(
            base,
            Arc::new(RateLimiter::new(3, Duration::from_millis(50))),
        ));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .call(endpoints::CLIENTES, "ListarClientes", serde_json::json!({}))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut arrivals = state.arrivals.lock().unwrap().clone();
        arrivals.sort();
        for pair in arrivals.windows(2) {
            // Small tolerance for scheduling noise between limiter and socket.
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(40));
        }
    }
}
