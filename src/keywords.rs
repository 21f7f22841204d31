use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

pub const MAX_KEYWORDS: usize = 20;
pub const MAX_POSITION: u32 = 100;

const CAMPAIGN_ID_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignIdentity {
    pub campaign_id: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignKey {
    pub project_id: String,
    pub tracking_id: String,
}

impl CampaignIdentity {
    pub fn new(campaign_id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            domain: domain.into(),
        }
    }

    pub fn key(&self) -> AppResult<CampaignKey> {
        CampaignKey::parse(&self.campaign_id)
    }

    pub fn normalized_domain(&self) -> AppResult<String> {
        normalize_domain(&self.domain)
    }

    pub fn validate(&self) -> AppResult<(CampaignKey, String)> {
        Ok((self.key()?, self.normalized_domain()?))
    }
}

impl CampaignKey {
    pub fn parse(campaign_id: &str) -> AppResult<Self> {
        let parts: Vec<&str> = campaign_id.trim().split(CAMPAIGN_ID_SEPARATOR).collect();
        match parts.as_slice() {
            [project, tracking] if !project.is_empty() && !tracking.is_empty() => Ok(Self {
                project_id: project.to_string(),
                tracking_id: tracking.to_string(),
            }),
            _ => Err(AppError::InvalidCampaignId(campaign_id.to_string())),
        }
    }

    pub fn campaign_id(&self) -> String {
        format!(
            "{}{CAMPAIGN_ID_SEPARATOR}{}",
            self.project_id, self.tracking_id
        )
    }
}

pub fn normalize_domain(raw: &str) -> AppResult<String> {
    let mut host = raw.trim().to_ascii_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = host.strip_prefix(scheme) {
            host = rest.to_string();
            break;
        }
    }
    if let Some(end) = host.find(['/', '?', '#']) {
        host.truncate(end);
    }
    if let Some(rest) = host.strip_prefix("www.") {
        host = rest.to_string();
    }
    let host = host.trim_end_matches('.').to_string();
    if host.is_empty() {
        return Err(AppError::MissingDomain);
    }
    Ok(host)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRecord {
    pub keyword: String,
    pub position: u32,
    pub previous_position: Option<u32>,
    pub search_volume: u64,
    pub url: String,
    pub traffic_percent: f64,
}

impl KeywordRecord {
    pub fn ranked(keyword: impl Into<String>, position: u32) -> Self {
        Self {
            keyword: keyword.into(),
            position,
            previous_position: None,
            search_volume: 0,
            url: String::new(),
            traffic_percent: 0.0,
        }
    }
}

pub fn is_ranked(position: u32) -> bool {
    position > 0 && position <= MAX_POSITION
}

pub fn finalize_keywords(mut keywords: Vec<KeywordRecord>) -> Vec<KeywordRecord> {
    keywords.retain(|record| is_ranked(record.position));
    keywords.sort_by_key(|record| record.position);
    keywords.truncate(MAX_KEYWORDS);
    keywords
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchSource {
    Primary,
    FallbackSimple,
    FallbackExtended,
    Failed,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchSource::Primary => "primary",
            FetchSource::FallbackSimple => "fallback-simple",
            FetchSource::FallbackExtended => "fallback-extended",
            FetchSource::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim() {
            "primary" => Ok(FetchSource::Primary),
            "fallback-simple" => Ok(FetchSource::FallbackSimple),
            "fallback-extended" => Ok(FetchSource::FallbackExtended),
            "failed" => Ok(FetchSource::Failed),
            other => Err(AppError::Config(format!("unknown fetch source: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAttemptResult {
    pub source: FetchSource,
    pub keywords: Vec<KeywordRecord>,
    pub error: Option<String>,
    pub timing_ms: u64,
}

impl FetchAttemptResult {
    pub fn succeeded(&self) -> bool {
        !self.keywords.is_empty()
    }
}
