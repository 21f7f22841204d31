use async_trait::async_trait;

use crate::keywords::{CampaignIdentity, FetchSource, KeywordRecord};

#[derive(Debug, Clone, Default)]
pub struct StrategyOutcome {
    pub keywords: Vec<KeywordRecord>,
    pub error: Option<String>,
}

impl StrategyOutcome {
    pub fn found(keywords: Vec<KeywordRecord>) -> Self {
        Self {
            keywords,
            error: None,
        }
    }

    pub fn missed(error: impl Into<String>) -> Self {
        Self {
            keywords: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn source(&self) -> FetchSource;

    fn domain_only(&self) -> bool {
        false
    }

    async fn attempt(&self, identity: &CampaignIdentity) -> StrategyOutcome;
}
