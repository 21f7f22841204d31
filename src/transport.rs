use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::trace;

use crate::config::ProviderSettings;
use crate::errors::{AppError, AppResult};

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn get_text(&self, url: Url) -> AppResult<String>;
}

pub type SharedTransport = Arc<dyn ProviderTransport>;

pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(settings: &ProviderSettings) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("keyword-rankings/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self { http })
    }

    pub fn shared(settings: &ProviderSettings) -> AppResult<SharedTransport> {
        Ok(Arc::new(Self::new(settings)?))
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn get_text(&self, url: Url) -> AppResult<String> {
        trace!(path = url.path(), "provider request");
        // Request URLs carry the API key; keep it out of error text.
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| err.without_url())?;
        response.text().await.map_err(|err| err.without_url().into())
    }
}

pub fn parse_base_url(base: &str) -> AppResult<Url> {
    Url::parse(base.trim_end_matches('/'))
        .map_err(|err| AppError::Config(format!("invalid provider base URL `{base}`: {err}")))
}
