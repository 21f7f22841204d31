mod cache;
mod campaigns;
mod config;
mod db;
mod diagnostics;
mod errors;
mod fallback;
mod keywords;
mod normalizer;
mod orchestrator;
mod primary;
mod service;
mod strategy;
#[cfg(test)]
mod testutils;
mod transport;

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::cache::{CacheEntry, KeywordCache};
pub use crate::campaigns::{CampaignChange, CampaignRecord, CampaignRegistry};
pub use crate::config::{AppConfig, ProviderSettings, PublicAppConfig};
pub use crate::db::{bootstrap, open_in_memory, DatabaseContext, SharedConnection};
pub use crate::diagnostics::DiagnosticsLog;
pub use crate::errors::{AppError, AppResult};
pub use crate::fallback::{ExtendedFallback, SimpleFallback};
pub use crate::keywords::{
    normalize_domain, CampaignIdentity, CampaignKey, FetchAttemptResult, FetchSource,
    KeywordRecord,
};
pub use crate::normalizer::{normalize_payload, PrimaryPayload};
pub use crate::orchestrator::{AttemptSummary, FallbackOrchestrator, RetrievalOutcome};
pub use crate::primary::{PrimaryStrategy, DEFAULT_MASKS};
pub use crate::service::{CacheStatus, RankingService, RankingsView};
pub use crate::strategy::{RetrievalStrategy, StrategyOutcome};
pub use crate::transport::{HttpTransport, ProviderTransport, SharedTransport};

pub struct AppState {
    config: AppConfig,
    db_path: PathBuf,
    diagnostics: DiagnosticsLog,
    service: RankingService,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub db_path: String,
    pub diagnostics_path: String,
    pub config: PublicAppConfig,
}

impl AppState {
    pub fn initialize<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        init_tracing();
        Self::with_config(data_dir, AppConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(data_dir: P, config: AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        let context = bootstrap(data_dir, &config.database_file_name)?;
        let db_path = context.path.clone();
        let db = context.into_shared();
        let diagnostics = DiagnosticsLog::new(data_dir, &config)?;
        let transport = HttpTransport::shared(&config.provider)?;
        let service = RankingService::from_config(&config, db, transport)
            .with_diagnostics(diagnostics.clone());

        if let Err(err) = diagnostics.record(
            "app_start",
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "hasApiKey": config.provider.api_key.is_some(),
            }),
        ) {
            warn!(?err, "failed to record startup diagnostics");
        }

        Ok(Self {
            config,
            db_path,
            diagnostics,
            service,
        })
    }

    pub fn service(&self) -> &RankingService {
        &self.service
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            db_path: self.db_path.to_string_lossy().to_string(),
            diagnostics_path: self.diagnostics.path().to_string_lossy().to_string(),
            config: self.config.public_profile(),
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,keyword_rankings=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
