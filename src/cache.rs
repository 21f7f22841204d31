use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::SharedConnection;
use crate::errors::AppResult;
use crate::keywords::{CampaignKey, FetchSource, KeywordRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub keywords: Vec<KeywordRecord>,
    pub source: FetchSource,
    pub fetched_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub tracking_id: Option<String>,
    pub domain: Option<String>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at <= ttl
    }

    pub fn belongs_to(&self, key: &CampaignKey) -> bool {
        self.project_id.as_deref() == Some(key.project_id.as_str())
            && self.tracking_id.as_deref() == Some(key.tracking_id.as_str())
    }
}

struct CacheRow {
    keywords_json: String,
    fetched_at: String,
    source: String,
    project_id: Option<String>,
    tracking_id: Option<String>,
    domain: Option<String>,
}

#[derive(Clone)]
pub struct KeywordCache {
    db: SharedConnection,
    ttl: Duration,
}

impl KeywordCache {
    pub fn new(db: SharedConnection, ttl_days: i64) -> Self {
        Self {
            db,
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_fresh(now, self.ttl)
    }

    pub fn load(&self, owner_id: &str, campaign_slot: &str) -> AppResult<Option<CacheEntry>> {
        let row = {
            let conn = self.db.lock();
            conn.query_row(
                "SELECT keywords_json, fetched_at, source, project_id, tracking_id, domain
                FROM keyword_cache
                WHERE owner_id = ?1 AND campaign_slot = ?2",
                (owner_id, campaign_slot),
                |row| {
                    Ok(CacheRow {
                        keywords_json: row.get(0)?,
                        fetched_at: row.get(1)?,
                        source: row.get(2)?,
                        project_id: row.get(3)?,
                        tracking_id: row.get(4)?,
                        domain: row.get(5)?,
                    })
                },
            )
            .optional()?
        };
        let Some(row) = row else {
            return Ok(None);
        };

        match decode_row(row) {
            Some(entry) => Ok(Some(entry)),
            None => {
                warn!(
                    target: "keyword_cache",
                    owner_id,
                    campaign_slot,
                    "discarding undecodable cache row"
                );
                self.invalidate(owner_id, campaign_slot)?;
                Ok(None)
            }
        }
    }

    pub fn load_for(
        &self,
        owner_id: &str,
        campaign_slot: &str,
        key: &CampaignKey,
    ) -> AppResult<Option<CacheEntry>> {
        match self.load(owner_id, campaign_slot)? {
            Some(entry) if entry.belongs_to(key) => Ok(Some(entry)),
            Some(_) => {
                info!(
                    target: "keyword_cache",
                    owner_id,
                    campaign_slot,
                    "campaign identity changed; dropping cached rankings"
                );
                self.invalidate(owner_id, campaign_slot)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn store(
        &self,
        owner_id: &str,
        campaign_slot: &str,
        key: &CampaignKey,
        domain: &str,
        keywords: &[KeywordRecord],
        source: FetchSource,
        fetched_at: DateTime<Utc>,
    ) -> AppResult<CacheEntry> {
        let keywords_json = serde_json::to_string(keywords)?;
        {
            let conn = self.db.lock();
            conn.execute(
                "INSERT INTO keyword_cache
                    (owner_id, campaign_slot, keywords_json, fetched_at, source, project_id, tracking_id, domain)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(owner_id, campaign_slot) DO UPDATE SET
                    keywords_json = excluded.keywords_json,
                    fetched_at = excluded.fetched_at,
                    source = excluded.source,
                    project_id = excluded.project_id,
                    tracking_id = excluded.tracking_id,
                    domain = excluded.domain",
                (
                    owner_id,
                    campaign_slot,
                    keywords_json.as_str(),
                    fetched_at.to_rfc3339(),
                    source.as_str(),
                    key.project_id.as_str(),
                    key.tracking_id.as_str(),
                    domain,
                ),
            )?;
        }
        debug!(
            target: "keyword_cache",
            owner_id,
            campaign_slot,
            keywords = keywords.len(),
            source = source.as_str(),
            "cached rankings"
        );
        Ok(CacheEntry {
            keywords: keywords.to_vec(),
            source,
            fetched_at,
            project_id: Some(key.project_id.clone()),
            tracking_id: Some(key.tracking_id.clone()),
            domain: Some(domain.to_string()),
        })
    }

    pub fn invalidate(&self, owner_id: &str, campaign_slot: &str) -> AppResult<bool> {
        let conn = self.db.lock();
        let removed = conn.execute(
            "DELETE FROM keyword_cache WHERE owner_id = ?1 AND campaign_slot = ?2",
            (owner_id, campaign_slot),
        )?;
        Ok(removed > 0)
    }
}

fn decode_row(row: CacheRow) -> Option<CacheEntry> {
    let keywords = serde_json::from_str::<Vec<KeywordRecord>>(&row.keywords_json).ok()?;
    let fetched_at = DateTime::parse_from_rfc3339(&row.fetched_at)
        .ok()?
        .with_timezone(&Utc);
    let source = FetchSource::parse(&row.source).ok()?;
    Some(CacheEntry {
        keywords,
        source,
        fetched_at,
        project_id: row.project_id,
        tracking_id: row.tracking_id,
        domain: row.domain,
    })
}
