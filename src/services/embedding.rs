//! Embedding client: batching, timeouts, retry and response integrity.
//!
//! [`EmbeddingService`] is a single request/response round trip to some
//! provider. [`EmbeddingClient`] wraps any service with the policies every
//! provider needs, so fakes in tests get exactly the production behavior.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, EmbeddingProtocol};
use crate::utils::retry::{RetryConfig, with_retry};

/// Hint telling the provider what the vector will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Text being indexed.
    RetrievalDocument,
    /// Text being searched for.
    RetrievalQuery,
}

impl TaskType {
    fn gemini_name(self) -> &'static str {
        match self {
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }

    fn tei_name(self) -> &'static str {
        match self {
            TaskType::RetrievalDocument => "document",
            TaskType::RetrievalQuery => "query",
        }
    }
}

/// One embedding round trip. Implementations must return one vector per
/// input text, in input order; the client verifies this.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_batch(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Identifies the model; part of every chunk fingerprint.
    fn model_id(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct TeiRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
    instruction_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    requests: Vec<GeminiEmbedRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiEmbedRequest<'a> {
    model: &'a str,
    content: GeminiContent<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

/// HTTP embedding provider.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingService {
    client: Client,
    base_url: String,
    protocol: EmbeddingProtocol,
    model: String,
    model_path: String,
    api_key: Option<String>,
    dimension: Option<u32>,
}

impl HttpEmbeddingService {
    /// Build from configuration, reading the API key from the configured
    /// environment variable.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &EmbeddingConfig,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingError> {
        if config.protocol == EmbeddingProtocol::Gemini && api_key.is_none() {
            return Err(EmbeddingError::Config(format!(
                "{} is not set",
                config.api_key_env
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        let model = config.model.trim_start_matches("models/").to_string();
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            protocol: config.protocol,
            model_path: format!("models/{model}"),
            model,
            api_key,
            dimension: Some(config.dimension),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        match self.protocol {
            EmbeddingProtocol::Gemini => {
                format!("{}/{}:batchEmbedContents", self.base_url, self.model_path)
            }
            EmbeddingProtocol::Tei => format!("{}/embed", self.base_url),
        }
    }

    fn gemini_body<'a>(&'a self, texts: &'a [String], task: TaskType) -> GeminiRequest<'a> {
        GeminiRequest {
            requests: texts
                .iter()
                .map(|text| GeminiEmbedRequest {
                    model: &self.model_path,
                    content: GeminiContent {
                        parts: [GeminiPart { text }],
                    },
                    task_type: task.gemini_name(),
                    output_dimensionality: self.dimension,
                })
                .collect(),
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        body: &B,
    ) -> Result<reqwest::Response, EmbeddingError> {
        let mut request = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            request = match self.protocol {
                EmbeddingProtocol::Gemini => request.header("x-goog-api-key", key),
                EmbeddingProtocol::Tei => request.bearer_auth(key),
            };
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else if e.is_connect() {
                EmbeddingError::ConnectionError(e.to_string())
            } else {
                EmbeddingError::RequestError(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let header_delay = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(
            status,
            body.clone(),
            header_delay.or_else(|| parse_retry_delay(&body)),
        ))
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed_batch(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self.protocol {
            EmbeddingProtocol::Gemini => {
                let response = self.post(&self.gemini_body(texts, task)).await?;
                let parsed: GeminiResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
            }
            EmbeddingProtocol::Tei => {
                let body = TeiRequest {
                    inputs: texts,
                    truncate: true,
                    instruction_type: task.tei_name(),
                    dimensions: None,
                };
                let response = self.post(&body).await?;
                response
                    .json::<Vec<Vec<f32>>>()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Map an HTTP failure onto the transient/fatal taxonomy.
fn classify_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> EmbeddingError {
    let code = status.as_u16();
    match status {
        StatusCode::TOO_MANY_REQUESTS => EmbeddingError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EmbeddingError::Unauthorized { status: code }
        }
        StatusCode::REQUEST_TIMEOUT => EmbeddingError::ServerError { status: code, body },
        s if s.is_server_error() => EmbeddingError::ServerError { status: code, body },
        _ => EmbeddingError::Rejected { status: code, body },
    }
}

/// Extract `RetryInfo.retryDelay` (e.g. `"12s"`, `"1.5s"`) from a Google error body.
fn parse_retry_delay(body: &str) -> Option<Duration> {
    let envelope: GoogleErrorEnvelope = serde_json::from_str(body).ok()?;
    envelope.error.details.iter().find_map(|detail| {
        let is_retry_info = detail
            .get("@type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.ends_with("RetryInfo"));
        if !is_retry_info {
            return None;
        }
        let raw = detail.get("retryDelay")?.as_str()?;
        let secs: f64 = raw.trim().trim_end_matches('s').parse().ok()?;
        (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
    })
}

/// Batching, retrying, integrity-checking front end over an [`EmbeddingService`].
#[derive(Clone)]
pub struct EmbeddingClient {
    service: Arc<dyn EmbeddingService>,
    batch_size: usize,
    timeout: Duration,
    retry: RetryConfig,
    dimension: Option<usize>,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("model", &self.service.model_id())
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EmbeddingClient {
    pub fn new(service: Arc<dyn EmbeddingService>, config: &EmbeddingConfig) -> Self {
        Self {
            service,
            batch_size: (config.batch_size as usize).max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryConfig::new(config.max_retries)
                .with_initial_delay(Duration::from_millis(config.initial_backoff_ms))
                .with_max_delay(Duration::from_secs(config.max_backoff_secs)),
            dimension: Some(config.dimension as usize),
        }
    }

    /// Client backed by the configured HTTP provider.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let service = HttpEmbeddingService::new(config)?;
        Ok(Self::new(Arc::new(service), config))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_id(&self) -> &str {
        self.service.model_id()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Vector length every response is checked against.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Embed `texts` in order, issuing as many batch calls as needed.
    pub async fn embed(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_single_batch(batch, task).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    /// Generate the embedding for a search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self
            .embed_single_batch(&[text.to_string()], TaskType::RetrievalQuery)
            .await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_single_batch(
        &self,
        batch: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = with_retry(&self.retry, || async {
            tokio::time::timeout(self.timeout, self.service.embed_batch(batch, task))
                .await
                .map_err(|_| EmbeddingError::Timeout)?
        })
        .await
        .into_result()?;

        self.check_integrity(batch.len(), &vectors)?;
        Ok(vectors)
    }

    fn check_integrity(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        if let Some(dimension) = self.dimension
            && let Some(bad) = vectors.iter().find(|v| v.len() != dimension)
        {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns `[index, len]` per text and records each batch it saw.
    #[derive(Default)]
    struct EchoService {
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingService for EchoService {
        async fn embed_batch(
            &self,
            texts: &[String],
            _task: TaskType,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.batches.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| vec![t.parse::<f32>().unwrap_or(-1.0), t.len() as f32])
                .collect())
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    /// Fails with `error()` for the first `failures` calls.
    struct FlakyService {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> EmbeddingError,
    }

    #[async_trait]
    impl EmbeddingService for FlakyService {
        async fn embed_batch(
            &self,
            texts: &[String],
            _task: TaskType,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err((self.error)());
            }
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }

        fn model_id(&self) -> &str {
            "flaky"
        }
    }

    struct ShortService;

    #[async_trait]
    impl EmbeddingService for ShortService {
        async fn embed_batch(
            &self,
            texts: &[String],
            _task: TaskType,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_id(&self) -> &str {
            "short"
        }
    }

    struct SlowService;

    #[async_trait]
    impl EmbeddingService for SlowService {
        async fn embed_batch(
            &self,
            texts: &[String],
            _task: TaskType,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_id(&self) -> &str {
            "slow"
        }
    }

    fn config(batch_size: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            dimension: 2,
            initial_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let service = Arc::new(EchoService::default());
        let client = EmbeddingClient::new(service.clone(), &config(3));

        let vectors = client
            .embed(&texts(8), TaskType::RetrievalDocument)
            .await
            .unwrap();

        let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let sizes: Vec<usize> = service.batches.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 2]);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let service = Arc::new(EchoService::default());
        let client = EmbeddingClient::new(service.clone(), &config(3));
        assert!(client.embed(&[], TaskType::RetrievalDocument).await.unwrap().is_empty());
        assert!(service.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_mismatch_is_integrity_error() {
        let client = EmbeddingClient::new(Arc::new(ShortService), &config(10));
        let err = client
            .embed(&texts(3), TaskType::RetrievalDocument)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_integrity_error() {
        let mut cfg = config(10);
        cfg.dimension = 3;
        let client = EmbeddingClient::new(Arc::new(EchoService::default()), &cfg);
        let err = client
            .embed(&texts(2), TaskType::RetrievalDocument)
            .await
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let service = Arc::new(FlakyService {
            calls: AtomicU32::new(0),
            failures: 2,
            error: || EmbeddingError::ServerError {
                status: 503,
                body: "unavailable".into(),
            },
        });
        let client = EmbeddingClient::new(service.clone(), &config(10));

        let vectors = client
            .embed(&texts(2), TaskType::RetrievalDocument)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let service = Arc::new(FlakyService {
            calls: AtomicU32::new(0),
            failures: 5,
            error: || EmbeddingError::Unauthorized { status: 401 },
        });
        let client = EmbeddingClient::new(service.clone(), &config(10));

        let err = client
            .embed(&texts(2), TaskType::RetrievalDocument)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Unauthorized { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let service = Arc::new(FlakyService {
            calls: AtomicU32::new(0),
            failures: 100,
            error: || EmbeddingError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            },
        });
        let client = EmbeddingClient::new(service.clone(), &config(10));

        let err = client
            .embed(&texts(1), TaskType::RetrievalDocument)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::RateLimited { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_batch_timeout() {
        let client = EmbeddingClient::new(Arc::new(SlowService), &config(10))
            .with_timeout(Duration::from_millis(20))
            .with_retry_config(RetryConfig::new(1));

        let err = client
            .embed(&texts(2), TaskType::RetrievalDocument)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Timeout));
    }

    #[test]
    fn test_base_url_trimming() {
        let cfg = EmbeddingConfig {
            protocol: EmbeddingProtocol::Tei,
            url: "http://localhost:11411/".to_string(),
            ..Default::default()
        };
        let service = HttpEmbeddingService::with_api_key(&cfg, None).unwrap();
        assert_eq!(service.base_url(), "http://localhost:11411");
        assert_eq!(service.endpoint(), "http://localhost:11411/embed");
    }

    #[test]
    fn test_gemini_requires_api_key() {
        let cfg = EmbeddingConfig::default();
        assert!(matches!(
            HttpEmbeddingService::with_api_key(&cfg, None),
            Err(EmbeddingError::Config(_))
        ));
    }

    #[test]
    fn test_gemini_request_shape() {
        let cfg = EmbeddingConfig {
            model: "models/gemini-embedding-001".to_string(),
            ..Default::default()
        };
        let service = HttpEmbeddingService::with_api_key(&cfg, Some("k".into())).unwrap();
        assert!(
            service
                .endpoint()
                .ends_with("/models/gemini-embedding-001:batchEmbedContents")
        );

        let input = vec!["hello".to_string()];
        let body = serde_json::to_value(service.gemini_body(&input, TaskType::RetrievalQuery)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "requests": [{
                    "model": "models/gemini-embedding-001",
                    "content": {"parts": [{"text": "hello"}]},
                    "taskType": "RETRIEVAL_QUERY",
                    "outputDimensionality": 768
                }]
            })
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new(), None),
            EmbeddingError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new(), None),
            EmbeddingError::Unauthorized { status: 403 }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new(), None),
            EmbeddingError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new(), None),
            EmbeddingError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_parse_retry_delay() {
        let body = r#"{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "details": [
            {"@type": "type.googleapis.com/google.rpc.QuotaFailure"},
            {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "12s"}
        ]}}"#;
        assert_eq!(parse_retry_delay(body), Some(Duration::from_secs(12)));
        assert_eq!(
            parse_retry_delay(
                r#"{"error": {"details": [{"@type": "x.RetryInfo", "retryDelay": "1.5s"}]}}"#
            ),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_delay("not json"), None);
        assert_eq!(parse_retry_delay(r#"{"error": {}}"#), None);
    }
}
