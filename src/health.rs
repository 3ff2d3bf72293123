use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use utoipa::ToSchema;

use crate::ports::LedgerStore;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DependencyStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyStatus {
    fn healthy(latency: Duration) -> Self {
        Self {
            status: "healthy".to_string(),
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            latency_ms: None,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
    fn name(&self) -> &'static str;
}

/// Pings whichever ledger backend is configured.
pub struct LedgerChecker {
    store: Arc<dyn LedgerStore>,
}

impl LedgerChecker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DependencyChecker for LedgerChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.store.ping().await {
            Ok(()) => DependencyStatus::healthy(start.elapsed()),
            Err(e) => DependencyStatus::unhealthy(e.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "ledger"
    }
}

pub struct HealthChecker {
    checkers: Vec<Box<dyn DependencyChecker>>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_checker(mut self, checker: Box<dyn DependencyChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    pub async fn check_all(&self) -> HealthResponse {
        let check_timeout = Duration::from_secs(5);
        let mut futures = Vec::new();

        for checker in &self.checkers {
            let name = checker.name().to_string();
            let future = timeout(check_timeout, checker.check());
            futures.push(async move {
                match future.await {
                    Ok(status) => (name, status),
                    Err(_) => (name, DependencyStatus::unhealthy("timeout".to_string())),
                }
            });
        }

        let results = futures::future::join_all(futures).await;
        let mut dependencies = HashMap::new();
        let mut healthy_count = 0;
        let mut total_count = 0;

        for (name, status) in results {
            if status.status == "healthy" {
                healthy_count += 1;
            }
            total_count += 1;
            dependencies.insert(name, status);
        }

        let overall_status = if healthy_count == total_count {
            "healthy"
        } else if healthy_count > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        HealthResponse {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dependencies,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}
