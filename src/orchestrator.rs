use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ProviderSettings;
use crate::errors::AppResult;
use crate::fallback::{ExtendedFallback, SimpleFallback};
use crate::keywords::{normalize_domain, CampaignIdentity, FetchAttemptResult, FetchSource};
use crate::primary::PrimaryStrategy;
use crate::strategy::{RetrievalStrategy, StrategyOutcome};
use crate::transport::SharedTransport;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub source: FetchSource,
    pub keyword_count: usize,
    pub error: Option<String>,
    pub timing_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    pub result: FetchAttemptResult,
    pub attempts: Vec<AttemptSummary>,
    pub total_ms: u64,
}

impl RetrievalOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.succeeded()
    }

    pub fn failed(error: impl Into<String>, total_ms: u64) -> Self {
        Self {
            result: FetchAttemptResult {
                source: FetchSource::Failed,
                keywords: Vec::new(),
                error: Some(error.into()),
                timing_ms: total_ms,
            },
            attempts: Vec::new(),
            total_ms,
        }
    }
}

pub struct FallbackOrchestrator {
    strategies: Vec<Arc<dyn RetrievalStrategy>>,
    overall_timeout: Option<Duration>,
}

impl FallbackOrchestrator {
    pub fn new(strategies: Vec<Arc<dyn RetrievalStrategy>>) -> Self {
        Self {
            strategies,
            overall_timeout: None,
        }
    }

    /// Ceiling for a whole chain. A tier still running at the deadline is cut
    /// off and recorded alongside the tiers that finished.
    pub fn with_overall_timeout(mut self, limit: Duration) -> Self {
        self.overall_timeout = Some(limit);
        self
    }

    pub fn standard(settings: &ProviderSettings, transport: SharedTransport) -> Self {
        Self::new(vec![
            Arc::new(PrimaryStrategy::new(settings.clone(), transport.clone())),
            Arc::new(SimpleFallback::new(settings.clone(), transport.clone())),
            Arc::new(ExtendedFallback::new(settings.clone(), transport)),
        ])
    }

    pub fn tiers(&self) -> Vec<FetchSource> {
        self.strategies.iter().map(|s| s.source()).collect()
    }

    pub async fn fetch(&self, identity: &CampaignIdentity) -> AppResult<RetrievalOutcome> {
        identity.validate()?;
        Ok(self.run(identity, |_| true).await)
    }

    pub async fn fetch_by_domain(&self, domain: &str) -> AppResult<RetrievalOutcome> {
        normalize_domain(domain)?;
        let identity = CampaignIdentity::new(String::new(), domain);
        Ok(self.run(&identity, |strategy| strategy.domain_only()).await)
    }

    async fn run(
        &self,
        identity: &CampaignIdentity,
        include: impl Fn(&dyn RetrievalStrategy) -> bool,
    ) -> RetrievalOutcome {
        let started = Instant::now();
        let deadline = self.overall_timeout.map(|limit| started + limit);
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            if !include(&**strategy) {
                continue;
            }
            let source = strategy.source();
            let attempt_started = Instant::now();
            let (outcome, cut_off) = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, strategy.attempt(identity)).await {
                        Ok(outcome) => (outcome, false),
                        Err(_) => (StrategyOutcome::missed("cut off by the overall limit"), true),
                    }
                }
                None => (strategy.attempt(identity).await, false),
            };
            let attempt = FetchAttemptResult {
                source,
                keywords: outcome.keywords,
                error: outcome.error,
                timing_ms: elapsed_ms(attempt_started),
            };
            attempts.push(AttemptSummary {
                source,
                keyword_count: attempt.keywords.len(),
                error: attempt.error.clone(),
                timing_ms: attempt.timing_ms,
            });

            if attempt.succeeded() {
                info!(
                    source = source.as_str(),
                    keywords = attempt.keywords.len(),
                    timing_ms = attempt.timing_ms,
                    "retrieval tier succeeded"
                );
                return RetrievalOutcome {
                    result: attempt,
                    attempts,
                    total_ms: elapsed_ms(started),
                };
            }
            if cut_off {
                let limit = self.overall_timeout.unwrap_or_default();
                warn!(
                    source = source.as_str(),
                    limit_secs = limit.as_secs_f64(),
                    "retrieval chain timed out"
                );
                let headline = format!(
                    "retrieval exceeded the overall limit of {}s",
                    limit.as_secs_f64()
                );
                return failure(&headline, attempts, elapsed_ms(started));
            }
            warn!(
                source = source.as_str(),
                error = attempt.error.as_deref().unwrap_or("no keywords"),
                timing_ms = attempt.timing_ms,
                "retrieval tier came back empty"
            );
        }

        failure("all retrieval tiers failed", attempts, elapsed_ms(started))
    }
}

fn failure(headline: &str, attempts: Vec<AttemptSummary>, total_ms: u64) -> RetrievalOutcome {
    let error = compose_failure(headline, &attempts);
    RetrievalOutcome {
        attempts,
        ..RetrievalOutcome::failed(error, total_ms)
    }
}

fn compose_failure(headline: &str, attempts: &[AttemptSummary]) -> String {
    if attempts.is_empty() {
        return "no retrieval tiers configured".to_string();
    }
    let tiers = attempts
        .iter()
        .map(|attempt| {
            format!(
                "{}: {}",
                attempt.source.as_str(),
                attempt.error.as_deref().unwrap_or("returned no keywords")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    format!("{headline} ({tiers})")
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
