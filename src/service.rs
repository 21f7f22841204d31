use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheEntry, KeywordCache};
use crate::campaigns::{CampaignChange, CampaignRegistry};
use crate::config::AppConfig;
use crate::db::SharedConnection;
use crate::diagnostics::DiagnosticsLog;
use crate::errors::{AppError, AppResult};
use crate::keywords::{CampaignIdentity, FetchSource, KeywordRecord};
use crate::orchestrator::{AttemptSummary, FallbackOrchestrator, RetrievalOutcome};
use crate::transport::SharedTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Cached,
    Refreshed,
    StaleOnError,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingsView {
    pub status: CacheStatus,
    pub source: FetchSource,
    pub keywords: Vec<KeywordRecord>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub attempts: Vec<AttemptSummary>,
    pub total_ms: u64,
}

impl RankingsView {
    fn from_entry(
        status: CacheStatus,
        entry: CacheEntry,
        error: Option<String>,
        outcome: Option<RetrievalOutcome>,
    ) -> Self {
        let (attempts, total_ms) = outcome
            .map(|outcome| (outcome.attempts, outcome.total_ms))
            .unwrap_or_default();
        Self {
            status,
            source: entry.source,
            keywords: entry.keywords,
            fetched_at: Some(entry.fetched_at),
            error,
            attempts,
            total_ms,
        }
    }

    fn unavailable(outcome: RetrievalOutcome) -> Self {
        Self {
            status: CacheStatus::Unavailable,
            source: outcome.result.source,
            keywords: Vec::new(),
            fetched_at: None,
            error: outcome.result.error,
            attempts: outcome.attempts,
            total_ms: outcome.total_ms,
        }
    }
}

pub struct RankingService {
    orchestrator: FallbackOrchestrator,
    cache: KeywordCache,
    campaigns: CampaignRegistry,
    diagnostics: Option<DiagnosticsLog>,
}

impl RankingService {
    pub fn new(
        orchestrator: FallbackOrchestrator,
        cache: KeywordCache,
        campaigns: CampaignRegistry,
    ) -> Self {
        Self {
            orchestrator,
            cache,
            campaigns,
            diagnostics: None,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        db: SharedConnection,
        transport: SharedTransport,
    ) -> Self {
        Self::new(
            FallbackOrchestrator::standard(&config.provider, transport)
                .with_overall_timeout(config.overall_timeout()),
            KeywordCache::new(db.clone(), config.cache_ttl_days),
            CampaignRegistry::new(db),
        )
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsLog) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn campaigns(&self) -> &CampaignRegistry {
        &self.campaigns
    }

    pub fn cache(&self) -> &KeywordCache {
        &self.cache
    }

    pub fn configure_campaign(
        &self,
        owner_id: &str,
        campaign_slot: &str,
        identity: &CampaignIdentity,
    ) -> AppResult<CampaignChange> {
        self.campaigns.save(owner_id, campaign_slot, identity)
    }

    pub async fn rankings(&self, owner_id: &str, campaign_slot: &str) -> AppResult<RankingsView> {
        self.rankings_at(owner_id, campaign_slot, Utc::now()).await
    }

    pub async fn rankings_at(
        &self,
        owner_id: &str,
        campaign_slot: &str,
        now: DateTime<Utc>,
    ) -> AppResult<RankingsView> {
        let record = self
            .campaigns
            .get(owner_id, campaign_slot)?
            .ok_or_else(|| {
                AppError::Config(format!(
                    "no campaign configured for {owner_id}/{campaign_slot}"
                ))
            })?;
        self.rankings_for(owner_id, campaign_slot, &record.identity(), now)
            .await
    }

    pub async fn rankings_for(
        &self,
        owner_id: &str,
        campaign_slot: &str,
        identity: &CampaignIdentity,
        now: DateTime<Utc>,
    ) -> AppResult<RankingsView> {
        let (key, domain) = identity.validate()?;
        let previous = self.cache.load_for(owner_id, campaign_slot, &key)?;
        if let Some(entry) = previous.as_ref() {
            if self.cache.is_fresh(entry, now) {
                info!(
                    target: "ranking_service",
                    owner_id,
                    campaign_slot,
                    "serving cached rankings"
                );
                return Ok(RankingsView::from_entry(
                    CacheStatus::Cached,
                    entry.clone(),
                    None,
                    None,
                ));
            }
        }

        let outcome = self.run_bounded(identity).await?;
        self.record_diagnostics(&format!("{owner_id}/{campaign_slot}"), &outcome);

        if outcome.succeeded() {
            let entry = self.cache.store(
                owner_id,
                campaign_slot,
                &key,
                &domain,
                &outcome.result.keywords,
                outcome.result.source,
                now,
            )?;
            return Ok(RankingsView::from_entry(
                CacheStatus::Refreshed,
                entry,
                None,
                Some(outcome),
            ));
        }

        match previous {
            Some(entry) => {
                warn!(
                    target: "ranking_service",
                    owner_id,
                    campaign_slot,
                    fetched_at = %entry.fetched_at,
                    "refresh failed; serving stale rankings"
                );
                let error = outcome.result.error.clone();
                Ok(RankingsView::from_entry(
                    CacheStatus::StaleOnError,
                    entry,
                    error,
                    Some(outcome),
                ))
            }
            None => Ok(RankingsView::unavailable(outcome)),
        }
    }

    pub async fn rankings_for_domain(&self, domain: &str) -> AppResult<RankingsView> {
        let outcome = self.orchestrator.fetch_by_domain(domain).await?;
        self.record_diagnostics(domain, &outcome);

        if !outcome.succeeded() {
            return Ok(RankingsView::unavailable(outcome));
        }
        Ok(RankingsView {
            status: CacheStatus::Refreshed,
            source: outcome.result.source,
            keywords: outcome.result.keywords,
            fetched_at: Some(Utc::now()),
            error: None,
            attempts: outcome.attempts,
            total_ms: outcome.total_ms,
        })
    }

    async fn run_bounded(&self, identity: &CampaignIdentity) -> AppResult<RetrievalOutcome> {
        match self.orchestrator.fetch(identity).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_configuration() => Err(err),
            Err(err) => {
                warn!(target: "ranking_service", %err, "retrieval chain errored");
                Ok(RetrievalOutcome::failed(err.to_string(), 0))
            }
        }
    }

    fn record_diagnostics(&self, scope: &str, outcome: &RetrievalOutcome) {
        if let Some(diagnostics) = &self.diagnostics {
            if let Err(err) = diagnostics.record_outcome(scope, outcome) {
                warn!(target: "diagnostics", ?err, "failed to record retrieval diagnostics");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::config::{ProviderSettings, DEFAULT_CACHE_TTL_DAYS};
    use crate::db::open_in_memory;
    use crate::strategy::{RetrievalStrategy, StrategyOutcome};
    use crate::testutils::{query_param, ScriptedTransport};

    fn ranked_body(keyword: &str) -> String {
        json!({
            "data": {
                "0": { "Ph": keyword, "Dt": { "20240101": 2 }, "Nq": "880" }
            }
        })
        .to_string()
    }

    fn toggled_transport(online: Arc<AtomicBool>) -> Arc<ScriptedTransport> {
        ScriptedTransport::new(move |url| {
            if !online.load(Ordering::SeqCst) {
                return Err(AppError::Provider("connection refused".into()));
            }
            match query_param(url, "type").as_deref() {
                Some("tracking_position_organic") => Ok(ranked_body("blue widgets")),
                _ => Err(AppError::Provider("unexpected request".into())),
            }
        })
    }

    fn service(transport: Arc<ScriptedTransport>) -> RankingService {
        let db = open_in_memory().unwrap();
        RankingService::new(
            FallbackOrchestrator::standard(
                &ProviderSettings::for_tests("http://provider.test"),
                transport,
            ),
            KeywordCache::new(db.clone(), DEFAULT_CACHE_TTL_DAYS),
            CampaignRegistry::new(db),
        )
    }

    fn identity() -> CampaignIdentity {
        CampaignIdentity::new("1234567_890", "example.com")
    }

    #[tokio::test]
    async fn cached_read_makes_no_new_network_call() {
        let transport = toggled_transport(Arc::new(AtomicBool::new(true)));
        let service = service(transport.clone());
        service.configure_campaign("acme", "main", &identity()).unwrap();
        let now = Utc::now();

        let first = service.rankings_at("acme", "main", now).await.unwrap();
        assert_eq!(first.status, CacheStatus::Refreshed);
        assert_eq!(first.source, FetchSource::Primary);
        assert_eq!(transport.request_count(), 1);

        let second = service
            .rankings_at("acme", "main", now + ChronoDuration::days(13))
            .await
            .unwrap();
        assert_eq!(second.status, CacheStatus::Cached);
        assert_eq!(second.keywords, first.keywords);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn expired_rows_are_refreshed() {
        let transport = toggled_transport(Arc::new(AtomicBool::new(true)));
        let service = service(transport.clone());
        let now = Utc::now();

        service
            .rankings_for("acme", "main", &identity(), now)
            .await
            .unwrap();
        let later = service
            .rankings_for("acme", "main", &identity(), now + ChronoDuration::days(15))
            .await
            .unwrap();

        assert_eq!(later.status, CacheStatus::Refreshed);
        assert_eq!(transport.request_count(), 2);
        let entry = service.cache().load("acme", "main").unwrap().unwrap();
        assert_eq!(entry.fetched_at, now + ChronoDuration::days(15));
    }

    #[tokio::test]
    async fn serves_stale_rows_when_every_tier_fails() {
        let online = Arc::new(AtomicBool::new(true));
        let service = service(toggled_transport(online.clone()));
        let now = Utc::now();
        let fresh = service
            .rankings_for("acme", "main", &identity(), now)
            .await
            .unwrap();

        online.store(false, Ordering::SeqCst);
        let stale = service
            .rankings_for("acme", "main", &identity(), now + ChronoDuration::days(20))
            .await
            .unwrap();

        assert_eq!(stale.status, CacheStatus::StaleOnError);
        assert_eq!(stale.keywords, fresh.keywords);
        assert_eq!(stale.fetched_at, Some(now));
        assert!(stale.error.unwrap().contains("all retrieval tiers failed"));
        assert_eq!(stale.attempts.len(), 3);
    }

    #[tokio::test]
    async fn reports_unavailable_without_a_previous_row() {
        let service = service(toggled_transport(Arc::new(AtomicBool::new(false))));
        let view = service
            .rankings_for("acme", "main", &identity(), Utc::now())
            .await
            .unwrap();

        assert_eq!(view.status, CacheStatus::Unavailable);
        assert_eq!(view.source, FetchSource::Failed);
        assert!(view.keywords.is_empty());
        assert!(view.error.is_some());
        assert!(service.cache().load("acme", "main").unwrap().is_none());
    }

    #[tokio::test]
    async fn identity_change_forces_a_refetch() {
        let transport = toggled_transport(Arc::new(AtomicBool::new(true)));
        let service = service(transport.clone());
        let now = Utc::now();
        service
            .rankings_for("acme", "main", &identity(), now)
            .await
            .unwrap();

        let moved = CampaignIdentity::new("1234567_891", "example.com");
        let view = service
            .rankings_for("acme", "main", &moved, now)
            .await
            .unwrap();

        assert_eq!(view.status, CacheStatus::Refreshed);
        assert_eq!(transport.request_count(), 2);
        let entry = service.cache().load("acme", "main").unwrap().unwrap();
        assert_eq!(entry.tracking_id.as_deref(), Some("891"));
    }

    #[tokio::test]
    async fn malformed_campaign_is_an_error_not_a_miss() {
        let transport = toggled_transport(Arc::new(AtomicBool::new(true)));
        let service = service(transport.clone());
        let err = service
            .rankings_for(
                "acme",
                "main",
                &CampaignIdentity::new("1234567", "example.com"),
                Utc::now(),
            )
            .await
            .unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn unknown_campaign_slot_is_a_configuration_error() {
        let service = service(ScriptedTransport::failing());
        let err = service.rankings("acme", "missing").await.unwrap_err();
        assert!(err.is_configuration());
    }

    struct StalledStrategy;

    #[async_trait]
    impl RetrievalStrategy for StalledStrategy {
        fn source(&self) -> FetchSource {
            FetchSource::Primary
        }

        async fn attempt(&self, _identity: &CampaignIdentity) -> StrategyOutcome {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StrategyOutcome::found(vec![KeywordRecord::ranked("late", 1)])
        }
    }

    #[tokio::test]
    async fn overall_ceiling_counts_as_failure() {
        let db = open_in_memory().unwrap();
        let service = RankingService::new(
            FallbackOrchestrator::new(vec![Arc::new(StalledStrategy)])
                .with_overall_timeout(Duration::from_millis(50)),
            KeywordCache::new(db.clone(), DEFAULT_CACHE_TTL_DAYS),
            CampaignRegistry::new(db),
        );

        let view = service
            .rankings_for("acme", "main", &identity(), Utc::now())
            .await
            .unwrap();

        assert_eq!(view.status, CacheStatus::Unavailable);
        assert!(view.error.unwrap().contains("overall limit"));
    }

    #[tokio::test]
    async fn domain_lookup_uses_fallbacks_and_skips_cache() {
        let transport = ScriptedTransport::new(|url| match query_param(url, "type").as_deref() {
            Some("domain_organic") => Ok("garden hose|7|2400\n".into()),
            _ => Err(AppError::Provider("unexpected request".into())),
        });
        let service = service(transport.clone());

        let view = service.rankings_for_domain("www.example.com").await.unwrap();

        assert_eq!(view.source, FetchSource::FallbackSimple);
        assert_eq!(view.keywords[0].position, 7);
        assert_eq!(transport.param_values("domain"), vec!["example.com"]);
        assert!(service.campaigns().list("acme").unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_diagnostics_for_each_refresh() {
        let dir = tempdir().unwrap();
        let config = AppConfig {
            provider: ProviderSettings::for_tests("http://provider.test"),
            overall_timeout_secs: 45,
            cache_ttl_days: DEFAULT_CACHE_TTL_DAYS,
            database_file_name: "test.db".into(),
            diagnostics_enabled: true,
            diagnostics_max_bytes: 1024 * 1024,
        };
        let diagnostics = DiagnosticsLog::new(dir.path(), &config).unwrap();
        let service = RankingService::from_config(
            &config,
            open_in_memory().unwrap(),
            toggled_transport(Arc::new(AtomicBool::new(true))),
        )
        .with_diagnostics(diagnostics.clone());

        service
            .rankings_for("acme", "main", &identity(), Utc::now())
            .await
            .unwrap();

        let contents = std::fs::read_to_string(diagnostics.path()).unwrap();
        assert!(contents.contains("fetch_attempt"));
        assert!(contents.contains("fetch_outcome"));
        assert!(contents.contains("acme/main"));
    }
}
