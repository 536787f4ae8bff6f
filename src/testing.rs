//! In-memory doubles for the network capability.
//!
//! Used by the crate's own tests and by hosts that want to simulate
//! connectivity without a real origin server.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{OfflineError, Result};
use crate::fetch::Fetcher;
use crate::http::{resolve_url, FetchRequest, HttpResponse};

#[derive(Debug, Clone)]
enum Script {
    Respond(HttpResponse),
    Fail(String),
    Delayed(Duration, HttpResponse),
}

/// Fetcher answering from a per-URL script and recording every call.
///
/// URLs are resolved against the base before lookup, so `/orders` and
/// `http://localhost:8000/orders` address the same script. Unscripted URLs
/// fail with a network error.
#[derive(Debug)]
pub struct ScriptedFetcher {
    base: Option<Url>,
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new(base: &str) -> Self {
        Self {
            base: Url::parse(base).ok(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.script(url, Script::Respond(response));
    }

    pub fn respond_ok(&self, url: &str, body: &str) {
        self.respond(url, HttpResponse::new(200, body.to_string()));
    }

    pub fn fail(&self, url: &str) {
        self.script(url, Script::Fail("connection refused".to_string()));
    }

    /// Answers after `delay` (tokio time, so paused-clock tests advance it).
    pub fn respond_after(&self, url: &str, delay: Duration, response: HttpResponse) {
        self.script(url, Script::Delayed(delay, response));
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        let key = self.key(url);
        self.calls()
            .iter()
            .filter(|call| self.key(&call.url) == key)
            .count()
    }

    fn script(&self, url: &str, script: Script) {
        let key = self.key(url);
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, script);
    }

    fn key(&self, url: &str) -> String {
        self.base
            .as_ref()
            .and_then(|base| resolve_url(base, url))
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string())
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<HttpResponse> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.key(&request.url))
            .cloned();

        match script {
            Some(Script::Respond(response)) => Ok(response),
            Some(Script::Fail(reason)) => Err(OfflineError::Network(reason)),
            Some(Script::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => Err(OfflineError::Network(format!("no route to {}", request.url))),
        }
    }
}
