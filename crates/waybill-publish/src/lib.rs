//! Publication of shipment records to an IPFS node over its HTTP API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use waybill_core::{
    publish::ContentPublisher,
    record::{ContentId, ShipmentRecord},
};

/// IPFS HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IpfsConfig {
    /// Base URL of the node's RPC API, e.g. `http://127.0.0.1:5001`.
    pub api_base: String,
    #[serde(default = "default_pin")]
    pub pin: bool,
}

fn default_pin() -> bool {
    true
}

impl IpfsConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            pin: default_pin(),
        }
    }
}

pub struct IpfsPublisher {
    cfg: IpfsConfig,
    client: reqwest::Client,
}

impl IpfsPublisher {
    pub fn new(cfg: IpfsConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
        }
    }

    fn add_url(&self) -> String {
        format!(
            "{}/api/v0/add?pin={}",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.pin
        )
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("waybill"));
        headers
    }
}

#[async_trait]
impl ContentPublisher for IpfsPublisher {
    fn name(&self) -> &'static str {
        "ipfs"
    }

    #[instrument(skip_all, fields(api = %self.cfg.api_base, product_id = %record.product_id))]
    async fn publish(&self, record: &ShipmentRecord) -> Result<ContentId> {
        let body = record.to_json().context("serialize record")?;
        let part = Part::bytes(body)
            .file_name(format!("{}.json", record.product_id))
            .mime_str("application/json")?;
        let form = Form::new().part("file", part);

        let text = self
            .client
            .post(self.add_url())
            .headers(Self::headers())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let id = parse_add_response(&text)?;
        info!(%id, "record published");
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

/// `add` answers with one JSON object per line; the last one names the root.
fn parse_add_response(body: &str) -> Result<ContentId> {
    let line = body
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow!("empty response from ipfs add"))?;
    let resp: AddResponse =
        serde_json::from_str(line).with_context(|| format!("unexpected ipfs add response: {line}"))?;
    Ok(ContentId(resp.hash))
}
