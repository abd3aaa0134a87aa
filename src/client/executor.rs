//! Request Executor Module
//!
//! Top-level entry point for callers. Every call goes through the same pipeline:
//! cache check, in-flight deduplication, concurrency gate, rate limiter, the
//! network call with retries, then a cache write (queries) or invalidation
//! (mutations).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheOrchestrator};
use crate::client::{
    classify_response, AuthProvider, ConcurrencyGate, HttpTransport, InvalidationRules,
    RateLimiter, RetryPolicy, Transport,
};
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::tasks::spawn_cleanup_task;

type SharedResult = Shared<BoxFuture<'static, Result<Value>>>;

// == Query Context ==
/// Everything an executor depends on, passed in explicitly.
#[derive(Clone)]
pub struct QueryContext {
    pub config: Config,
    pub cache: Arc<CacheOrchestrator>,
    pub auth: Arc<dyn AuthProvider>,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl QueryContext {
    pub fn new(
        config: Config,
        cache: Arc<CacheOrchestrator>,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            cache,
            auth,
            transport,
        }
    }

    /// Builds the cache tiers from `config` and talks HTTP to the configured endpoint.
    pub fn from_config(config: Config, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let cache = Arc::new(CacheOrchestrator::from_config(&config.cache)?);
        Ok(Self::new(config, cache, auth, Arc::new(HttpTransport::new())))
    }
}

// == Operation ==
/// A named query or mutation document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub document: String,
}

impl Operation {
    pub fn new(name: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document: document.into(),
        }
    }
}

// == Request Options ==
/// Per-call overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Read from and write to the cache (queries only)
    pub cache: bool,
    /// TTL for the cached result instead of the operation TTL
    pub cache_ttl: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Invalidation tags replacing the registered or inferred ones (mutations only)
    pub invalidates: Option<Vec<String>>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            cache: true,
            cache_ttl: None,
            timeout: None,
            retries: None,
            invalidates: None,
        }
    }
}

impl RequestOptions {
    pub fn no_cache() -> Self {
        Self {
            cache: false,
            ..Self::default()
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_invalidates<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidates = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

/// Lifecycle of one request, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Running,
    RetryWait,
    Done,
    Failed,
}

/// One entry of [`RequestExecutor::batch_query`].
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub operation: Operation,
    pub variables: Value,
    pub options: RequestOptions,
}

impl BatchRequest {
    pub fn new(operation: Operation, variables: Value) -> Self {
        Self {
            operation,
            variables,
            options: RequestOptions::default(),
        }
    }
}

// == Executor Internals ==
struct ExecutorInner {
    ctx: QueryContext,
    limiter: RateLimiter,
    gate: ConcurrencyGate,
    retry: RetryPolicy,
    rules: InvalidationRules,
    /// In-flight queries by cache key
    pending: Mutex<HashMap<String, SharedResult>>,
    network_calls: AtomicU64,
}

impl ExecutorInner {
    /// Executes a query and caches its result. Removes its own pending entry
    /// before the result is published.
    async fn run_query(
        &self,
        operation: Operation,
        variables: Value,
        options: RequestOptions,
        key: String,
    ) -> Result<Value> {
        let result = self.execute(&operation, &variables, &options).await;

        if let Ok(data) = &result {
            if options.cache {
                if let Err(e) = self.ctx.cache.set(&key, data.clone(), options.cache_ttl) {
                    warn!(key = %key, error = %e, "failed to cache query result");
                }
            }
        }

        self.pending.lock().remove(&key);
        result
    }

    /// Gate admission, then the attempt loop.
    async fn execute(
        &self,
        operation: &Operation,
        variables: &Value,
        options: &RequestOptions,
    ) -> Result<Value> {
        let max_retries = options.retries.unwrap_or(self.retry.max_retries);
        let timeout = options.timeout.unwrap_or(self.ctx.config.executor.timeout);

        debug!(operation = %operation.name, state = ?RequestState::Queued, "request queued");
        self.gate
            .run(async {
                let mut attempt = 0;
                loop {
                    debug!(
                        operation = %operation.name,
                        state = ?RequestState::Running,
                        attempt,
                        "sending request"
                    );

                    let err = match self.attempt(operation, variables, timeout).await {
                        Ok(data) => {
                            debug!(operation = %operation.name, state = ?RequestState::Done, "request succeeded");
                            return Ok(data);
                        }
                        Err(err) => err,
                    };

                    if err.is_auth() {
                        warn!(operation = %operation.name, error = %err, "authentication failed, invalidating session");
                        self.ctx.auth.invalidate_session().await;
                        return Err(err);
                    }

                    if !self.retry.should_retry(&err, attempt, max_retries) {
                        warn!(
                            operation = %operation.name,
                            state = ?RequestState::Failed,
                            attempts = attempt + 1,
                            error = %err,
                            "request failed"
                        );
                        return Err(err);
                    }

                    let delay = self.retry.delay_for(attempt, &err);
                    info!(
                        operation = %operation.name,
                        state = ?RequestState::RetryWait,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            })
            .await?
    }

    /// One network round trip.
    async fn attempt(
        &self,
        operation: &Operation,
        variables: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let auth = &self.ctx.auth;
        auth.ensure_valid_session().await?;
        let token = auth
            .token()
            .await
            .ok_or_else(|| ApiError::Config("no credential available for request".to_string()))?;

        let mut headers = vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(device_id) = auth.device_id().await {
            headers.push(("Device-UUID".to_string(), device_id));
        }

        let body = json!({
            "operationName": operation.name,
            "query": operation.document,
            "variables": variables,
        });

        self.limiter.acquire().await;
        self.network_calls.fetch_add(1, Ordering::SeqCst);

        let endpoint = &self.ctx.config.executor.endpoint;
        let response = tokio::time::timeout(timeout, self.ctx.transport.send(endpoint, &headers, &body))
            .await
            .map_err(|_| {
                ApiError::Network(format!("request timed out after {}ms", timeout.as_millis()))
            })??;

        classify_response(response)
    }

    fn invalidate_after_write(
        &self,
        operation: &str,
        variables: &Value,
        explicit: Option<&[String]>,
    ) -> usize {
        let plan = self.rules.plan(operation, variables, explicit);
        if plan.is_empty() {
            debug!(operation = %operation, "write has no invalidation rules");
            return 0;
        }

        let mut removed = 0;
        for pattern in &plan.patterns {
            removed += self.ctx.cache.invalidate_regex(pattern);
        }
        for key in &plan.keys {
            removed += usize::from(self.ctx.cache.delete(key));
        }

        info!(operation = %operation, removed, "invalidated cache after write");
        removed
    }
}

// == Request Executor ==
/// Cached, deduplicated, paced and retried access to the remote API.
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("ctx", &self.inner.ctx)
            .field("gate", &self.inner.gate)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Creates an executor. Inside a tokio runtime this also starts the
    /// periodic cache cleanup task.
    pub fn new(ctx: QueryContext) -> Self {
        let cleanup = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| spawn_cleanup_task(ctx.cache.clone(), ctx.cache.cleanup_interval()));

        let inner = ExecutorInner {
            limiter: RateLimiter::new(ctx.config.rate_limit.clone()),
            gate: ConcurrencyGate::new(ctx.config.executor.max_concurrent),
            retry: RetryPolicy::from_config(&ctx.config.executor),
            rules: InvalidationRules::new(),
            pending: Mutex::new(HashMap::new()),
            network_calls: AtomicU64::new(0),
            ctx,
        };

        Self {
            inner: Arc::new(inner),
            cleanup: Mutex::new(cleanup),
        }
    }

    // == Query ==
    /// Runs a read operation.
    ///
    /// A cached result is returned without touching the network. Otherwise an
    /// identical query already in flight is joined, and only when there is none
    /// a new call is started. The call runs on its own task, so it completes
    /// and is cached even if every caller stops waiting.
    pub async fn query(
        &self,
        operation: &Operation,
        variables: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let key = cache_key(&operation.name, &variables);

        if options.cache {
            if let Some(hit) = self.inner.ctx.cache.get(&key) {
                debug!(key = %key, "cache hit");
                return Ok(hit);
            }
        }

        let shared = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&key) {
                Some(in_flight) => {
                    debug!(key = %key, "joining in-flight request");
                    in_flight.clone()
                }
                None => {
                    // A call for this key may have settled since the first lookup
                    if options.cache {
                        if let Some(hit) = self.inner.ctx.cache.get(&key) {
                            debug!(key = %key, "cache hit after in-flight request settled");
                            return Ok(hit);
                        }
                    }
                    let inner = self.inner.clone();
                    let task = tokio::spawn({
                        let operation = operation.clone();
                        let key = key.clone();
                        async move { inner.run_query(operation, variables, options, key).await }
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ApiError::Network(format!("request task aborted: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    // == Mutation ==
    /// Runs a write operation. Never cached or deduplicated; on success the
    /// cached reads it affects are invalidated.
    pub async fn mutation(
        &self,
        operation: &Operation,
        variables: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let data = self.inner.execute(operation, &variables, &options).await?;
        self.inner
            .invalidate_after_write(&operation.name, &variables, options.invalidates.as_deref());
        Ok(data)
    }

    // == Batch Query ==
    /// Runs every request concurrently.
    ///
    /// When more than half fail, the first failure in input order is returned.
    /// Otherwise the results are aligned with the input, `None` marking a failure.
    pub async fn batch_query(&self, requests: Vec<BatchRequest>) -> Result<Vec<Option<Value>>> {
        let total = requests.len();
        let results = join_all(requests.into_iter().map(|request| async move {
            self.query(&request.operation, request.variables, request.options)
                .await
        }))
        .await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures * 2 > total {
            warn!(failures, total, "batch query failed");
            return Err(results
                .into_iter()
                .find_map(|r| r.err())
                .unwrap_or_else(|| ApiError::Validation("batch query failed".to_string())));
        }
        if failures > 0 {
            debug!(failures, total, "batch query partially failed");
        }

        Ok(results.into_iter().map(|r| r.ok()).collect())
    }

    // == Invalidation ==
    /// Attaches explicit invalidation tags to a write operation.
    pub fn register_invalidation<I, S>(&self, operation: impl Into<String>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .rules
            .register(operation, tags.into_iter().map(Into::into).collect());
    }

    /// See [`CacheOrchestrator::invalidate_operation`].
    pub fn invalidate_operation(&self, operation: &str, params: Option<&Value>) -> usize {
        self.inner.ctx.cache.invalidate_operation(operation, params)
    }

    pub fn clear_cache(&self) {
        self.inner.ctx.cache.clear();
    }

    // == Introspection ==
    pub fn cache(&self) -> &Arc<CacheOrchestrator> {
        &self.inner.ctx.cache
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// Network attempts issued so far, retries included.
    pub fn network_calls(&self) -> u64 {
        self.inner.network_calls.load(Ordering::SeqCst)
    }

    /// Distinct queries currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    // == Shutdown ==
    /// Rejects queued requests, stops the cleanup task and flushes the cache.
    pub fn close(&self) -> Result<()> {
        self.inner.gate.close();
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
        self.inner.ctx.cache.close()?;
        info!("request executor closed");
        Ok(())
    }
}

impl Drop for RequestExecutor {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_use_cache() {
        let options = RequestOptions::default();
        assert!(options.cache);
        assert!(options.invalidates.is_none());
        assert!(!RequestOptions::no_cache().cache);
    }

    #[test]
    fn test_option_builders() {
        let options = RequestOptions::default()
            .with_cache_ttl(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(2))
            .with_retries(0)
            .with_invalidates(["budgets"]);

        assert_eq!(options.cache_ttl, Some(Duration::from_secs(5)));
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.retries, Some(0));
        assert_eq!(options.invalidates, Some(vec!["budgets".to_string()]));
    }

    #[test]
    fn test_executor_without_runtime_has_no_cleanup_task() {
        let cache = Arc::new(CacheOrchestrator::in_memory(
            10,
            crate::cache::TtlPolicy::default(),
        ));
        let ctx = QueryContext::new(
            Config::default(),
            cache,
            Arc::new(crate::client::StaticTokenAuth::new("t")),
            Arc::new(HttpTransport::new()),
        );

        let executor = RequestExecutor::new(ctx);
        assert!(executor.cleanup.lock().is_none());
        assert_eq!(executor.pending_requests(), 0);
        assert_eq!(executor.gate().max_concurrent(), 3);
    }
}
