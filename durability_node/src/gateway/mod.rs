// Gateway routing for the durability node
//
// Reads that cannot be served by our own nodes go out through public HTTP
// gateways. The router keeps a smoothed latency and success rate per gateway,
// fed by synthetic probes and by every real fetch, and picks an endpoint with
// one of four strategies. Fetches fall back along a latency-ordered chain.

pub mod transport;

pub use transport::{GatewayTransport, HttpGatewayTransport};

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{DurabilityError, Result};
use crate::events::{DurabilityEvent, EventBus};
use crate::types::now_millis;

/// Weight given to gateways without latency or success history
const UNPROVEN_WEIGHT: f64 = 0.001;

/// Upper bound on cached selections between sweeps
const MAX_CACHED_SELECTIONS: usize = 10_000;

/// Endpoint selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Lowest smoothed latency
    #[default]
    Fastest,
    /// Uniform random pick
    Random,
    /// Rotating pointer over the candidates
    #[serde(alias = "round-robin")]
    RoundRobin,
    /// Random pick weighted by success rate over latency
    Weighted,
}

/// One public or custom gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEndpoint {
    /// Base URL ending in `/ipfs/`
    pub url: String,
    /// Smoothed latency; `None` until the first success
    pub latency_ms: Option<f64>,
    pub last_checked_at: Option<u64>,
    /// Smoothed success rate in `0..=1`
    pub success_rate: f64,
    pub available: bool,
    pub consecutive_failures: u32,
    /// Added by an operator rather than the built-in list
    pub custom: bool,
}

impl GatewayEndpoint {
    fn new(url: &str, custom: bool) -> Self {
        Self {
            url: url.to_string(),
            latency_ms: None,
            last_checked_at: None,
            success_rate: 0.0,
            available: true,
            consecutive_failures: 0,
            custom,
        }
    }

    /// Fold one outcome into the smoothed statistics. Returns true if the
    /// availability flag changed.
    fn record(&mut self, success: bool, latency_ms: f64, failure_threshold: u32) -> bool {
        let was_available = self.available;
        if success {
            self.latency_ms = Some(match self.latency_ms {
                None => latency_ms,
                Some(old) => 0.7 * old + 0.3 * latency_ms,
            });
            self.success_rate = 0.9 * self.success_rate + 0.1;
            self.consecutive_failures = 0;
            self.available = true;
        } else {
            self.consecutive_failures += 1;
            self.success_rate *= 0.9;
            if self.consecutive_failures >= failure_threshold {
                self.available = false;
            }
        }
        self.last_checked_at = Some(now_millis());
        was_available != self.available
    }

    fn effective_latency(&self) -> f64 {
        self.latency_ms.unwrap_or(f64::INFINITY)
    }

    fn weight(&self) -> f64 {
        match self.latency_ms {
            Some(latency) if self.success_rate > 0.0 => self.success_rate / latency.max(1.0),
            _ => UNPROVEN_WEIGHT,
        }
    }
}

/// Options for a single selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelectOptions {
    /// Strategy; the configured default when absent
    pub strategy: Option<SelectionStrategy>,
    /// Gateways to use ahead of the strategy when they are candidates
    pub preferred: Vec<String>,
    /// Gateways to exclude
    pub avoid: Vec<String>,
}

/// Options for a fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub select: SelectOptions,
    /// Endpoints tried in total; the configured fallback count when absent
    pub max_attempts: Option<usize>,
}

/// Outcome of probing one gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayProbe {
    pub url: String,
    pub ok: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub total: usize,
    pub available: usize,
    pub custom: usize,
    /// Mean smoothed latency over available gateways with history
    pub average_latency_ms: Option<f64>,
    pub endpoints: Vec<GatewayEndpoint>,
}

type SelectionKey = (String, SelectionStrategy);

/// Recent selections per (cid, strategy). Expired entries are swept on
/// insert, at most once per TTL unless the cache is full.
struct SelectionCache {
    entries: HashMap<SelectionKey, (String, Instant)>,
    last_sweep: Instant,
}

impl SelectionCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    fn get(&self, key: &SelectionKey, ttl: Duration) -> Option<&String> {
        self.entries
            .get(key)
            .filter(|(_, at)| at.elapsed() < ttl)
            .map(|(url, _)| url)
    }

    fn insert(&mut self, key: SelectionKey, url: String, ttl: Duration) {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) >= ttl || self.entries.len() >= MAX_CACHED_SELECTIONS {
            self.entries.retain(|_, (_, at)| now.duration_since(*at) < ttl);
            if self.entries.len() >= MAX_CACHED_SELECTIONS {
                debug!("Selection cache full, dropping {} entries", self.entries.len());
                self.entries.clear();
            }
            self.last_sweep = now;
        }
        self.entries.insert(key, (url, now));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Gateway router
pub struct GatewayRouter {
    /// Gateway pool
    endpoints: RwLock<Vec<GatewayEndpoint>>,

    /// Round-robin pointer
    cursor: AtomicUsize,

    /// Selection cache keyed by (cid, strategy)
    cache: Mutex<SelectionCache>,

    /// HTTP access
    transport: Arc<dyn GatewayTransport>,

    config: GatewayConfig,
    events: EventBus,
}

impl GatewayRouter {
    /// Create a router over the configured public and custom gateways
    pub fn new(config: GatewayConfig, transport: Arc<dyn GatewayTransport>, events: EventBus) -> Self {
        let mut endpoints: Vec<GatewayEndpoint> = Vec::new();
        let listed = config
            .public
            .iter()
            .map(|u| (u, false))
            .chain(config.custom.iter().map(|u| (u, true)));
        for (url, custom) in listed {
            if !endpoints.iter().any(|e| &e.url == url) {
                endpoints.push(GatewayEndpoint::new(url, custom));
            }
        }

        info!("Gateway router initialized with {} gateways", endpoints.len());
        Self {
            endpoints: RwLock::new(endpoints),
            cursor: AtomicUsize::new(0),
            cache: Mutex::new(SelectionCache::new()),
            transport,
            config,
            events,
        }
    }

    /// Select one endpoint for a CID with the given strategy
    pub async fn select_endpoint(&self, cid: &str, strategy: SelectionStrategy) -> Result<String> {
        self.select_with(
            cid,
            &SelectOptions {
                strategy: Some(strategy),
                ..SelectOptions::default()
            },
        )
        .await
    }

    /// Select one endpoint honoring preferred and avoided gateways
    pub async fn select_with(&self, cid: &str, options: &SelectOptions) -> Result<String> {
        let strategy = options.strategy.unwrap_or(self.config.default_strategy);
        let candidates = self.candidates(&options.avoid);
        if candidates.is_empty() {
            return Err(DurabilityError::NoHealthyGateways {
                attempted: Vec::new(),
            });
        }

        if let Some(url) = options
            .preferred
            .iter()
            .find(|p| candidates.iter().any(|c| &c.url == *p))
        {
            return Ok(url.clone());
        }

        let ttl = self.config.selection_cache_ttl();
        let key = (cid.to_string(), strategy);
        if let Some(url) = self.cache.lock().get(&key, ttl) {
            if candidates.iter().any(|c| &c.url == url) {
                return Ok(url.clone());
            }
        }

        let url = self.pick(&candidates, strategy);
        debug!("Selected gateway {} for {} ({:?})", url, cid, strategy);
        self.cache.lock().insert(key, url.clone(), ttl);
        Ok(url)
    }

    /// Available gateways minus `avoid`, widening to every gateway when none qualify
    fn candidates(&self, avoid: &[String]) -> Vec<GatewayEndpoint> {
        let endpoints = self.endpoints.read();
        let not_avoided = |e: &&GatewayEndpoint| !avoid.contains(&e.url);

        let available: Vec<GatewayEndpoint> = endpoints
            .iter()
            .filter(|e| e.available)
            .filter(not_avoided)
            .cloned()
            .collect();
        if !available.is_empty() {
            return available;
        }

        let any: Vec<GatewayEndpoint> = endpoints.iter().filter(not_avoided).cloned().collect();
        if !any.is_empty() {
            return any;
        }
        endpoints.clone()
    }

    fn pick(&self, candidates: &[GatewayEndpoint], strategy: SelectionStrategy) -> String {
        let index = match strategy {
            SelectionStrategy::Fastest => candidates
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.effective_latency().total_cmp(&b.effective_latency()))
                .map(|(i, _)| i)
                .unwrap_or(0),
            SelectionStrategy::Random => thread_rng().gen_range(0..candidates.len()),
            SelectionStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len()
            }
            SelectionStrategy::Weighted => {
                match WeightedIndex::new(candidates.iter().map(|c| c.weight())) {
                    Ok(dist) => dist.sample(&mut thread_rng()),
                    Err(_) => 0,
                }
            }
        };
        candidates[index].url.clone()
    }

    /// Primary endpoint for the CID followed by fallbacks, available first and
    /// then by latency, at most `count` entries
    pub async fn select_fallback_chain(&self, cid: &str, count: usize) -> Result<Vec<String>> {
        self.chain(cid, &SelectOptions::default(), count).await
    }

    async fn chain(&self, cid: &str, options: &SelectOptions, count: usize) -> Result<Vec<String>> {
        let primary = self.select_with(cid, options).await?;

        let mut rest: Vec<GatewayEndpoint> = self
            .endpoints
            .read()
            .iter()
            .filter(|e| e.url != primary && !options.avoid.contains(&e.url))
            .cloned()
            .collect();
        rest.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then(a.effective_latency().total_cmp(&b.effective_latency()))
        });

        let mut chain = vec![primary];
        chain.extend(rest.into_iter().map(|e| e.url));
        chain.truncate(count.max(1));
        Ok(chain)
    }

    /// Fetch content through the gateway chain
    pub async fn fetch(&self, cid: &str, options: &FetchOptions) -> Result<Bytes> {
        let count = options.max_attempts.unwrap_or(self.config.fallback_count);
        let chain = self.chain(cid, &options.select, count).await?;

        let mut attempted = Vec::with_capacity(chain.len());
        for gateway in chain {
            let started = Instant::now();
            let url = format!("{}{}", gateway, cid);
            let outcome = match timeout(self.config.request_timeout(), self.transport.get(&url)).await {
                Ok(result) => result,
                Err(_) => Err(DurabilityError::Timeout),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(bytes) => {
                    self.record_outcome(&gateway, true, latency_ms);
                    debug!("Fetched {} via {} in {:.0}ms", cid, gateway, latency_ms);
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("Fetch of {} via {} failed: {}", cid, gateway, e);
                    self.record_outcome(&gateway, false, latency_ms);
                    self.invalidate(cid, &gateway);
                    attempted.push(gateway);
                }
            }
        }

        Err(DurabilityError::NoHealthyGateways { attempted })
    }

    fn invalidate(&self, cid: &str, gateway: &str) {
        self.cache
            .lock()
            .entries
            .retain(|(c, _), (url, _)| !(c.as_str() == cid && url.as_str() == gateway));
    }

    /// Fold an observed outcome into a gateway's statistics
    pub fn record_outcome(&self, url: &str, success: bool, latency_ms: f64) {
        let flipped = {
            let mut endpoints = self.endpoints.write();
            match endpoints.iter_mut().find(|e| e.url == url) {
                Some(endpoint) => endpoint
                    .record(success, latency_ms, self.config.failure_threshold)
                    .then_some(endpoint.available),
                None => {
                    debug!("Ignoring outcome for unknown gateway {}", url);
                    None
                }
            }
        };

        if let Some(available) = flipped {
            info!(
                "Gateway {} is now {}",
                url,
                if available { "available" } else { "unavailable" }
            );
            self.events.emit(DurabilityEvent::GatewayAvailabilityChanged {
                url: url.to_string(),
                available,
            });
        }
    }

    /// Probe latency of any gateway URL without touching the pool
    pub async fn check_gateway(&self, url: &str) -> Option<f64> {
        let started = Instant::now();
        let target = format!("{}{}", url, self.config.probe_cid);
        match timeout(self.config.request_timeout(), self.transport.head(&target)).await {
            Ok(Ok(())) => Some(started.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => {
                debug!("Gateway check of {} failed: {}", url, e);
                None
            }
            Err(_) => None,
        }
    }

    /// Probe one pooled gateway and record the outcome
    pub async fn probe(&self, url: &str) -> GatewayProbe {
        let started = Instant::now();
        let target = format!("{}{}", url, self.config.probe_cid);
        let outcome = match timeout(self.config.request_timeout(), self.transport.head(&target)).await {
            Ok(result) => result,
            Err(_) => Err(DurabilityError::Timeout),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.record_outcome(url, outcome.is_ok(), latency_ms);
        GatewayProbe {
            url: url.to_string(),
            ok: outcome.is_ok(),
            latency_ms,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Probe every gateway concurrently
    pub async fn probe_all(&self) -> Vec<GatewayProbe> {
        let urls: Vec<String> = self.endpoints.read().iter().map(|e| e.url.clone()).collect();
        let probes = join_all(urls.iter().map(|u| self.probe(u))).await;

        let healthy = probes.iter().filter(|p| p.ok).count();
        info!("Gateway probe complete: {}/{} reachable", healthy, probes.len());
        probes
    }

    /// Add an operator gateway. Returns false if it is already known or unreachable.
    pub async fn add_custom(&self, url: &str) -> Result<bool> {
        if !url.ends_with("/ipfs/") {
            return Err(DurabilityError::InvalidRequest(format!(
                "Gateway URL must end with /ipfs/: {}",
                url
            )));
        }
        url::Url::parse(url)
            .map_err(|e| DurabilityError::InvalidRequest(format!("Invalid gateway URL {}: {}", url, e)))?;

        if self.endpoints.read().iter().any(|e| e.url == url) {
            return Ok(false);
        }

        let Some(latency_ms) = self.check_gateway(url).await else {
            warn!("Custom gateway {} failed its probe, not adding", url);
            return Ok(false);
        };

        let mut endpoints = self.endpoints.write();
        if endpoints.iter().any(|e| e.url == url) {
            return Ok(false);
        }
        let mut endpoint = GatewayEndpoint::new(url, true);
        endpoint.latency_ms = Some(latency_ms);
        endpoint.success_rate = 1.0;
        endpoint.last_checked_at = Some(now_millis());
        endpoints.push(endpoint);

        info!("Added custom gateway {} ({:.0}ms)", url, latency_ms);
        Ok(true)
    }

    /// Pool statistics
    pub fn stats(&self) -> GatewayStats {
        let endpoints = self.endpoints.read().clone();
        let latencies: Vec<f64> = endpoints
            .iter()
            .filter(|e| e.available)
            .filter_map(|e| e.latency_ms)
            .collect();
        let average_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        GatewayStats {
            total: endpoints.len(),
            available: endpoints.iter().filter(|e| e.available).count(),
            custom: endpoints.iter().filter(|e| e.custom).count(),
            average_latency_ms,
            endpoints,
        }
    }

    /// Available gateways, fastest first
    pub fn active(&self) -> Vec<GatewayEndpoint> {
        let mut active: Vec<GatewayEndpoint> = self
            .endpoints
            .read()
            .iter()
            .filter(|e| e.available)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.effective_latency().total_cmp(&b.effective_latency()));
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    const A: &str = "https://a.example/ipfs/";
    const B: &str = "https://b.example/ipfs/";
    const C: &str = "https://c.example/ipfs/";

    /// Gateways listed in `down` fail every request
    #[derive(Default)]
    struct FakeTransport {
        down: Mutex<HashSet<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn respond(&self, url: &str) -> Result<()> {
            self.requests.lock().push(url.to_string());
            if self.down.lock().iter().any(|g| url.starts_with(g.as_str())) {
                Err(DurabilityError::Network("down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl GatewayTransport for FakeTransport {
        async fn head(&self, url: &str) -> Result<()> {
            self.respond(url)
        }

        async fn get(&self, url: &str) -> Result<Bytes> {
            self.respond(url)?;
            Ok(Bytes::from(url.to_string()))
        }
    }

    fn router(transport: Arc<FakeTransport>) -> GatewayRouter {
        let config = GatewayConfig {
            public: vec![A.to_string(), B.to_string(), C.to_string()],
            ..GatewayConfig::default()
        };
        GatewayRouter::new(config, transport, EventBus::default())
    }

    fn endpoint(router: &GatewayRouter, url: &str) -> GatewayEndpoint {
        router
            .stats()
            .endpoints
            .into_iter()
            .find(|e| e.url == url)
            .unwrap()
    }

    #[test]
    fn test_outcome_smoothing() {
        let router = router(Arc::new(FakeTransport::default()));

        router.record_outcome(A, true, 100.0);
        let a = endpoint(&router, A);
        assert_eq!(a.latency_ms, Some(100.0));
        assert!((a.success_rate - 0.1).abs() < 1e-9);

        router.record_outcome(A, true, 200.0);
        let a = endpoint(&router, A);
        assert!((a.latency_ms.unwrap() - 130.0).abs() < 1e-9);
        assert!((a.success_rate - 0.19).abs() < 1e-9);

        router.record_outcome(A, false, 0.0);
        let a = endpoint(&router, A);
        assert!((a.success_rate - 0.171).abs() < 1e-9);
        assert_eq!(a.consecutive_failures, 1);
        assert!(a.available);
    }

    #[test]
    fn test_three_failures_mark_unavailable() {
        let router = router(Arc::new(FakeTransport::default()));
        for _ in 0..2 {
            router.record_outcome(B, false, 0.0);
        }
        assert!(endpoint(&router, B).available);
        router.record_outcome(B, false, 0.0);
        assert!(!endpoint(&router, B).available);

        router.record_outcome(B, true, 50.0);
        let b = endpoint(&router, B);
        assert!(b.available);
        assert_eq!(b.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_fastest_prefers_lowest_latency_and_caches() {
        let router = router(Arc::new(FakeTransport::default()));
        router.record_outcome(A, true, 300.0);
        router.record_outcome(B, true, 20.0);

        let selected = router.select_endpoint("bafy1", SelectionStrategy::Fastest).await.unwrap();
        assert_eq!(selected, B);

        // Cached for this cid even after B slows down
        router.record_outcome(B, true, 5000.0);
        let selected = router.select_endpoint("bafy1", SelectionStrategy::Fastest).await.unwrap();
        assert_eq!(selected, B);

        let other = router.select_endpoint("bafy2", SelectionStrategy::Fastest).await.unwrap();
        assert_eq!(other, A);
    }

    #[tokio::test]
    async fn test_expired_selections_are_evicted() {
        let router = router(Arc::new(FakeTransport::default()));
        for i in 0..50 {
            router
                .select_endpoint(&format!("bafy{}", i), SelectionStrategy::Random)
                .await
                .unwrap();
        }
        assert_eq!(router.cache.lock().len(), 50);

        let config = GatewayConfig {
            public: vec![A.to_string(), B.to_string()],
            selection_cache_secs: 0,
            ..GatewayConfig::default()
        };
        let router = GatewayRouter::new(config, Arc::new(FakeTransport::default()), EventBus::default());
        for i in 0..50 {
            router
                .select_endpoint(&format!("bafy{}", i), SelectionStrategy::Random)
                .await
                .unwrap();
        }
        assert_eq!(router.cache.lock().len(), 1);
    }

    #[test]
    fn test_selection_cache_is_bounded() {
        let mut cache = SelectionCache::new();
        let ttl = Duration::from_secs(3600);
        for i in 0..MAX_CACHED_SELECTIONS + 5 {
            cache.insert((format!("bafy{}", i), SelectionStrategy::Fastest), A.to_string(), ttl);
        }
        assert!(cache.len() <= MAX_CACHED_SELECTIONS);
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let router = router(Arc::new(FakeTransport::default()));
        let mut seen = Vec::new();
        for i in 0..3 {
            let cid = format!("bafy{}", i);
            seen.push(router.select_endpoint(&cid, SelectionStrategy::RoundRobin).await.unwrap());
        }
        assert_eq!(seen, vec![A.to_string(), B.to_string(), C.to_string()]);
    }

    #[tokio::test]
    async fn test_preferred_and_avoid() {
        let router = router(Arc::new(FakeTransport::default()));
        let options = SelectOptions {
            strategy: Some(SelectionStrategy::Random),
            preferred: vec!["https://unknown.example/ipfs/".to_string(), C.to_string()],
            avoid: vec![],
        };
        assert_eq!(router.select_with("bafy", &options).await.unwrap(), C);

        let options = SelectOptions {
            strategy: Some(SelectionStrategy::Fastest),
            preferred: vec![],
            avoid: vec![A.to_string(), B.to_string()],
        };
        assert_eq!(router.select_with("bafy", &options).await.unwrap(), C);
    }

    #[tokio::test]
    async fn test_all_unavailable_still_selects() {
        let router = router(Arc::new(FakeTransport::default()));
        for url in [A, B, C] {
            for _ in 0..3 {
                router.record_outcome(url, false, 0.0);
            }
        }
        assert!(router.active().is_empty());
        assert!(router.select_endpoint("bafy", SelectionStrategy::Weighted).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_falls_back_and_reports_attempts() {
        let transport = Arc::new(FakeTransport::default());
        let router = router(transport.clone());
        router.record_outcome(A, true, 10.0);
        router.record_outcome(B, true, 20.0);
        router.record_outcome(C, true, 30.0);

        transport.down.lock().insert(A.to_string());
        let body = router.fetch("bafyx", &FetchOptions::default()).await.unwrap();
        assert_eq!(body, Bytes::from(format!("{}bafyx", B)));
        assert_eq!(endpoint(&router, A).consecutive_failures, 1);

        transport.down.lock().extend([B.to_string(), C.to_string()]);
        match router.fetch("bafyy", &FetchOptions::default()).await {
            Err(DurabilityError::NoHealthyGateways { attempted }) => {
                assert_eq!(attempted.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_honors_max_attempts() {
        let transport = Arc::new(FakeTransport::default());
        transport.down.lock().extend([A.to_string(), B.to_string(), C.to_string()]);
        let router = router(transport.clone());

        let options = FetchOptions {
            max_attempts: Some(2),
            ..FetchOptions::default()
        };
        assert!(router.fetch("bafy", &options).await.is_err());
        assert_eq!(transport.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_add_custom_gateway() {
        let transport = Arc::new(FakeTransport::default());
        let router = router(transport.clone());

        assert!(router.add_custom("https://d.example/").await.is_err());
        assert!(!router.add_custom(A).await.unwrap());

        transport.down.lock().insert("https://e.example/ipfs/".to_string());
        assert!(!router.add_custom("https://e.example/ipfs/").await.unwrap());

        assert!(router.add_custom("https://d.example/ipfs/").await.unwrap());
        let d = endpoint(&router, "https://d.example/ipfs/");
        assert!(d.custom);
        assert_eq!(d.success_rate, 1.0);
        assert!(d.latency_ms.is_some());
        assert_eq!(router.stats().total, 4);
    }

    #[test]
    fn test_weight_floor_for_unproven_gateways() {
        let mut endpoint = GatewayEndpoint::new(A, false);
        assert_eq!(endpoint.weight(), UNPROVEN_WEIGHT);
        endpoint.record(true, 0.5, 3);
        assert!((endpoint.weight() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_strategy_names() {
        let parsed: SelectionStrategy = serde_json::from_str("\"round-robin\"").unwrap();
        assert_eq!(parsed, SelectionStrategy::RoundRobin);
        let parsed: SelectionStrategy = serde_json::from_str("\"weighted\"").unwrap();
        assert_eq!(parsed, SelectionStrategy::Weighted);
    }
}
