use std::future::Future;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use reqwest::Url;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::ProviderSettings;
use crate::errors::{AppError, AppResult};
use crate::keywords::{
    normalize_domain, CampaignIdentity, CampaignKey, FetchSource, KeywordRecord,
};
use crate::normalizer::{date_key, normalize_payload, PrimaryPayload};
use crate::strategy::{RetrievalStrategy, StrategyOutcome};
use crate::transport::{parse_base_url, SharedTransport};

const REPORT_TYPE: &str = "tracking_position_organic";
const DATE_WINDOW_DAYS: i64 = 7;

pub type MaskBuilder = fn(&str) -> String;

pub const DEFAULT_MASKS: &[MaskBuilder] = &[wildcard_with_path, wildcard_host, bare_domain];

fn wildcard_with_path(domain: &str) -> String {
    format!("*.{domain}/*")
}

fn wildcard_host(domain: &str) -> String {
    format!("*.{domain}")
}

fn bare_domain(domain: &str) -> String {
    domain.to_string()
}

pub struct PrimaryStrategy {
    settings: ProviderSettings,
    transport: SharedTransport,
    masks: Vec<MaskBuilder>,
}

impl PrimaryStrategy {
    pub fn new(settings: ProviderSettings, transport: SharedTransport) -> Self {
        Self {
            settings,
            transport,
            masks: DEFAULT_MASKS.to_vec(),
        }
    }

    pub fn with_masks(mut self, masks: Vec<MaskBuilder>) -> Self {
        self.masks = masks;
        self
    }

    pub async fn fetch(&self, campaign_id: &str, domain: &str) -> StrategyOutcome {
        let key = match CampaignKey::parse(campaign_id) {
            Ok(key) => key,
            Err(err) => return StrategyOutcome::missed(err.to_string()),
        };
        let domain = match normalize_domain(domain) {
            Ok(domain) => domain,
            Err(err) => return StrategyOutcome::missed(err.to_string()),
        };
        let today = Utc::now().date_naive();
        debug!(
            project_id = %key.project_id,
            tracking_id = %key.tracking_id,
            %domain,
            "querying primary tracking report"
        );

        let outcome = first_success(&self.masks, |build| {
            self.try_mask(&key, build(domain.as_str()), today)
        })
        .await;
        if !outcome.keywords.is_empty() {
            info!(
                project_id = %key.project_id,
                keywords = outcome.keywords.len(),
                "primary tracking report returned rankings"
            );
        }
        outcome
    }

    async fn try_mask(
        &self,
        key: &CampaignKey,
        mask: String,
        today: NaiveDate,
    ) -> AppResult<Vec<KeywordRecord>> {
        let url = self.report_url(key, &mask, today)?;
        let body = self.transport.get_text(url).await?;
        let payload = PrimaryPayload::parse(&body)?;
        if payload.is_empty() {
            return Err(AppError::Provider(format!("no data for url mask `{mask}`")));
        }
        Ok(normalize_payload(&payload, today))
    }

    fn report_url(&self, key: &CampaignKey, mask: &str, today: NaiveDate) -> AppResult<Url> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Config("RANK_API_KEY is not configured".into()))?;
        let mut url = parse_base_url(&self.settings.primary_base_url)?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid primary base URL".into()))?
            .pop_if_empty()
            .push(&key.project_id)
            .push("tracking")
            .push("");
        url.query_pairs_mut()
            .append_pair("key", api_key.expose_secret())
            .append_pair("action", "report")
            .append_pair("type", REPORT_TYPE)
            .append_pair("url", mask)
            .append_pair(
                "date_begin",
                &date_key(today - Duration::days(DATE_WINDOW_DAYS)),
            )
            .append_pair("date_end", &date_key(today))
            .append_pair("display_limit", &self.settings.display_limit.to_string());
        Ok(url)
    }
}

/// Stops at the first candidate that answers with data, even if none of it is
/// ranked. Errors and empty answers move on to the next candidate.
pub async fn first_success<T, F, Fut>(candidates: &[T], mut attempt: F) -> StrategyOutcome
where
    F: FnMut(&T) -> Fut,
    Fut: Future<Output = AppResult<Vec<KeywordRecord>>>,
{
    let mut last_error = None;
    for (index, candidate) in candidates.iter().enumerate() {
        match attempt(candidate).await {
            Ok(keywords) if keywords.is_empty() => {
                debug!(candidate = index, "candidate matched only unranked keywords");
                return StrategyOutcome::missed("matched keywords are all unranked");
            }
            Ok(keywords) => return StrategyOutcome::found(keywords),
            Err(err) => {
                debug!(candidate = index, %err, "candidate ruled out");
                last_error = Some(err.to_string());
            }
        }
    }
    StrategyOutcome::missed(last_error.unwrap_or_else(|| "no candidates to try".into()))
}

#[async_trait]
impl RetrievalStrategy for PrimaryStrategy {
    fn source(&self) -> FetchSource {
        FetchSource::Primary
    }

    async fn attempt(&self, identity: &CampaignIdentity) -> StrategyOutcome {
        self.fetch(&identity.campaign_id, &identity.domain).await
    }
}
