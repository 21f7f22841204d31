use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

use crate::db::SharedConnection;
use crate::errors::AppResult;
use crate::keywords::{CampaignIdentity, CampaignKey};

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecord {
    pub owner_id: String,
    pub campaign_slot: String,
    pub project_id: String,
    pub tracking_id: String,
    pub domain: String,
    pub updated_at: String,
}

impl CampaignRecord {
    pub fn key(&self) -> CampaignKey {
        CampaignKey {
            project_id: self.project_id.clone(),
            tracking_id: self.tracking_id.clone(),
        }
    }

    pub fn identity(&self) -> CampaignIdentity {
        CampaignIdentity::new(self.key().campaign_id(), self.domain.clone())
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignChange {
    pub created: bool,
    pub identity_changed: bool,
    pub cache_invalidated: bool,
}

#[derive(Clone)]
pub struct CampaignRegistry {
    db: SharedConnection,
}

impl CampaignRegistry {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    pub fn get(&self, owner_id: &str, campaign_slot: &str) -> AppResult<Option<CampaignRecord>> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                "SELECT owner_id, campaign_slot, project_id, tracking_id, domain, updated_at
                FROM campaigns
                WHERE owner_id = ?1 AND campaign_slot = ?2",
                params![owner_id, campaign_slot],
                campaign_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list(&self, owner_id: &str) -> AppResult<Vec<CampaignRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT owner_id, campaign_slot, project_id, tracking_id, domain, updated_at
            FROM campaigns
            WHERE owner_id = ?1
            ORDER BY campaign_slot ASC",
        )?;
        let rows = stmt
            .query_map([owner_id], campaign_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Upserts the campaign. When the project or tracking id differs from the
    /// stored one, this (owner, slot) cache row is deleted in the same
    /// transaction. Rows for other slots and owners are never touched.
    pub fn save(
        &self,
        owner_id: &str,
        campaign_slot: &str,
        identity: &CampaignIdentity,
    ) -> AppResult<CampaignChange> {
        let (key, domain) = identity.validate()?;

        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let previous: Option<(String, String)> = tx
            .query_row(
                "SELECT project_id, tracking_id FROM campaigns
                WHERE owner_id = ?1 AND campaign_slot = ?2",
                params![owner_id, campaign_slot],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO campaigns (owner_id, campaign_slot, project_id, tracking_id, domain, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, DATETIME('now'))
            ON CONFLICT(owner_id, campaign_slot) DO UPDATE SET
                project_id = excluded.project_id,
                tracking_id = excluded.tracking_id,
                domain = excluded.domain,
                updated_at = excluded.updated_at",
            params![
                owner_id,
                campaign_slot,
                key.project_id,
                key.tracking_id,
                domain
            ],
        )?;

        let identity_changed = previous
            .as_ref()
            .map(|(project_id, tracking_id)| {
                *project_id != key.project_id || *tracking_id != key.tracking_id
            })
            .unwrap_or(false);
        let cache_invalidated = if identity_changed {
            tx.execute(
                "DELETE FROM keyword_cache WHERE owner_id = ?1 AND campaign_slot = ?2",
                params![owner_id, campaign_slot],
            )? > 0
        } else {
            false
        };
        tx.commit()?;

        if identity_changed {
            info!(
                target: "campaigns",
                owner_id,
                campaign_slot,
                cache_invalidated,
                "campaign identity changed"
            );
        }
        Ok(CampaignChange {
            created: previous.is_none(),
            identity_changed,
            cache_invalidated,
        })
    }

    pub fn remove(&self, owner_id: &str, campaign_slot: &str) -> AppResult<bool> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM keyword_cache WHERE owner_id = ?1 AND campaign_slot = ?2",
            params![owner_id, campaign_slot],
        )?;
        let removed = tx.execute(
            "DELETE FROM campaigns WHERE owner_id = ?1 AND campaign_slot = ?2",
            params![owner_id, campaign_slot],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }
}

fn campaign_from_row(row: &Row<'_>) -> rusqlite::Result<CampaignRecord> {
    Ok(CampaignRecord {
        owner_id: row.get(0)?,
        campaign_slot: row.get(1)?,
        project_id: row.get(2)?,
        tracking_id: row.get(3)?,
        domain: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
