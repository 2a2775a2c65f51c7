//! `pug me`: answers with a random pug picture.

use std::sync::OnceLock;
use std::time::Duration;

use nobot_xmpp::{Jid, Plugin, PluginCatalog, SessionHandle};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

pub const PLUGIN_ID: &str = "pugme";

pub const DEFAULT_ENDPOINT: &str = "http://pugme.herokuapp.com";

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PugError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected API response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Deserialize)]
struct RandomPugResponse {
    pug: String,
}

fn trigger_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^pug me").expect("pug trigger regex is valid"))
}

/// `GET {endpoint}/random`, returning the picture URL.
pub async fn fetch_random_pug(client: &Client, endpoint: &str) -> Result<String, PugError> {
    let response = client
        .get(format!("{}/random", endpoint.trim_end_matches('/')))
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(PugError::BadResponse(format!(
            "status {}",
            response.status()
        )));
    }

    let body: RandomPugResponse = response.json().await?;
    if body.pug.trim().is_empty() {
        return Err(PugError::BadResponse("empty pug url".to_string()));
    }
    Ok(body.pug)
}

pub struct PugMe {
    handle: SessionHandle,
    client: Client,
    endpoint: String,
}

impl PugMe {
    pub fn new(handle: SessionHandle, endpoint: impl Into<String>) -> Self {
        Self {
            handle,
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Plugin for PugMe {
    fn name(&self) -> &str {
        PLUGIN_ID
    }

    fn matches(&self, text: &str) -> bool {
        trigger_regex().is_match(text)
    }

    fn respond(&self, sender: &Jid, _text: &str) {
        let handle = self.handle.clone();
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let recipient = sender.clone();

        tokio::spawn(async move {
            match fetch_random_pug(&client, &endpoint).await {
                Ok(url) => {
                    debug!(%recipient, %url, "sending pug");
                    if let Err(error) = handle.send_message(&recipient, &url) {
                        debug!(%error, "session gone before pug could be sent");
                    }
                }
                Err(error) => warn!(%error, %recipient, "pug fetch failed"),
            }
        });
    }
}

/// Register `pugme` against `endpoint`.
pub fn register(catalog: &mut PluginCatalog, endpoint: impl Into<String>) {
    let endpoint = endpoint.into();
    catalog.register(PLUGIN_ID, move |handle| {
        Box::new(PugMe::new(handle, endpoint.clone()))
    });
}
