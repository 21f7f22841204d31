use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;

use crate::errors::{AppError, AppResult};
use crate::transport::ProviderTransport;

type Responder = dyn Fn(&Url) -> AppResult<String> + Send + Sync;

pub struct ScriptedTransport {
    responder: Box<Responder>,
    requests: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&Url) -> AppResult<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(AppError::Provider("connection refused".into())))
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn param_values(&self, param: &str) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|url| query_param(url, param))
            .collect()
    }
}

#[async_trait]
impl ProviderTransport for ScriptedTransport {
    async fn get_text(&self, url: Url) -> AppResult<String> {
        self.requests.lock().push(url.clone());
        (self.responder)(&url)
    }
}

pub fn query_param(url: &Url, param: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == param)
        .map(|(_, value)| value.into_owned())
}
