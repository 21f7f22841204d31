use std::collections::HashMap;

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use reqwest::Url;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::ProviderSettings;
use crate::errors::{AppError, AppResult};
use crate::keywords::{
    finalize_keywords, is_ranked, normalize_domain, CampaignIdentity, FetchSource, KeywordRecord,
};
use crate::strategy::{RetrievalStrategy, StrategyOutcome};
use crate::transport::{parse_base_url, SharedTransport};

const NO_DATA_MARKER: &str = "No data";
const RANK_REPORT: &str = "domain_organic";
const VOLUME_REPORT: &str = "domain_organic_phrases";

#[derive(Clone)]
struct FallbackClient {
    settings: ProviderSettings,
    transport: SharedTransport,
}

impl FallbackClient {
    async fn fetch_report(&self, domain: &str, report: &str, columns: &str) -> AppResult<String> {
        let url = self.report_url(domain, report, columns)?;
        let body = self.transport.get_text(url).await?;
        if body.trim_start().starts_with(NO_DATA_MARKER) {
            return Err(AppError::Provider(format!(
                "{report} has no data for `{domain}`"
            )));
        }
        Ok(body)
    }

    async fn fetch_ranks(&self, domain: &str, columns: &str) -> AppResult<Vec<KeywordRecord>> {
        let body = self.fetch_report(domain, RANK_REPORT, columns).await?;
        let keywords = finalize_keywords(parse_rank_lines(&body));
        if keywords.is_empty() {
            return Err(AppError::Provider(format!(
                "no usable ranking lines for `{domain}`"
            )));
        }
        Ok(keywords)
    }

    async fn fetch_volumes(&self, domain: &str) -> AppResult<HashMap<String, u64>> {
        let body = self.fetch_report(domain, VOLUME_REPORT, "Ph,Nq").await?;
        Ok(parse_volume_lines(&body))
    }

    fn report_url(&self, domain: &str, report: &str, columns: &str) -> AppResult<Url> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Config("RANK_API_KEY is not configured".into()))?;
        let mut url = parse_base_url(&self.settings.fallback_base_url)?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid fallback base URL".into()))?
            .pop_if_empty()
            .push("");
        url.query_pairs_mut()
            .append_pair("type", report)
            .append_pair("key", api_key.expose_secret())
            .append_pair("domain", domain)
            .append_pair("database", &self.settings.database)
            .append_pair("display_limit", &self.settings.display_limit.to_string())
            .append_pair("export_columns", columns);
        Ok(url)
    }
}

pub struct SimpleFallback {
    client: FallbackClient,
}

impl SimpleFallback {
    pub fn new(settings: ProviderSettings, transport: SharedTransport) -> Self {
        Self {
            client: FallbackClient {
                settings,
                transport,
            },
        }
    }

    pub async fn fetch(&self, domain: &str) -> StrategyOutcome {
        let domain = match normalize_domain(domain) {
            Ok(domain) => domain,
            Err(err) => return StrategyOutcome::missed(err.to_string()),
        };
        match self.client.fetch_ranks(&domain, "Ph,Po,Nq").await {
            Ok(keywords) => {
                info!(%domain, keywords = keywords.len(), "simple fallback returned rankings");
                StrategyOutcome::found(keywords)
            }
            Err(err) => StrategyOutcome::missed(err.to_string()),
        }
    }
}

pub struct ExtendedFallback {
    client: FallbackClient,
}

impl ExtendedFallback {
    pub fn new(settings: ProviderSettings, transport: SharedTransport) -> Self {
        Self {
            client: FallbackClient {
                settings,
                transport,
            },
        }
    }

    pub async fn fetch(&self, domain: &str) -> StrategyOutcome {
        let domain = match normalize_domain(domain) {
            Ok(domain) => domain,
            Err(err) => return StrategyOutcome::missed(err.to_string()),
        };
        let mut keywords = match self.client.fetch_ranks(&domain, "Ph,Po").await {
            Ok(keywords) => keywords,
            Err(err) => return StrategyOutcome::missed(err.to_string()),
        };

        match self.client.fetch_volumes(&domain).await {
            Ok(volumes) => join_volumes(&mut keywords, &volumes),
            Err(err) => {
                warn!(%domain, %err, "volume lookup failed; keeping rankings without volumes");
            }
        }
        info!(%domain, keywords = keywords.len(), "extended fallback returned rankings");
        StrategyOutcome::found(keywords)
    }
}

fn join_volumes(keywords: &mut [KeywordRecord], volumes: &HashMap<String, u64>) {
    for record in keywords.iter_mut() {
        if let Some(volume) = volumes.get(&record.keyword) {
            record.search_volume = *volume;
        }
    }
}

fn pipe_reader(body: &str) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(body.as_bytes())
}

fn rows(body: &str) -> impl Iterator<Item = StringRecord> + '_ {
    pipe_reader(body).into_records().filter_map(|row| match row {
        Ok(row) => Some(row),
        Err(err) => {
            debug!(%err, "skipping unreadable line");
            None
        }
    })
}

pub fn parse_rank_lines(body: &str) -> Vec<KeywordRecord> {
    rows(body)
        .filter_map(|row| {
            let keyword = row.get(0).filter(|k| !k.is_empty())?;
            let position = row.get(1).and_then(parse_rank)?;
            let search_volume = row
                .get(2)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            Some(KeywordRecord {
                search_volume,
                ..KeywordRecord::ranked(keyword, position)
            })
        })
        .collect()
}

pub fn parse_volume_lines(body: &str) -> HashMap<String, u64> {
    rows(body)
        .filter_map(|row| {
            let keyword = row.get(0).filter(|k| !k.is_empty())?;
            let volume = row.get(1)?.parse::<u64>().ok()?;
            Some((keyword.to_string(), volume))
        })
        .collect()
}

fn parse_rank(value: &str) -> Option<u32> {
    let position = value
        .parse::<u32>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u32::MAX as f64)
                .map(|f| f.round() as u32)
        })?;
    is_ranked(position).then_some(position)
}

#[async_trait]
impl RetrievalStrategy for SimpleFallback {
    fn source(&self) -> FetchSource {
        FetchSource::FallbackSimple
    }

    fn domain_only(&self) -> bool {
        true
    }

    async fn attempt(&self, identity: &CampaignIdentity) -> StrategyOutcome {
        self.fetch(&identity.domain).await
    }
}

#[async_trait]
impl RetrievalStrategy for ExtendedFallback {
    fn source(&self) -> FetchSource {
        FetchSource::FallbackExtended
    }

    fn domain_only(&self) -> bool {
        true
    }

    async fn attempt(&self, identity: &CampaignIdentity) -> StrategyOutcome {
        self.fetch(&identity.domain).await
    }
}
