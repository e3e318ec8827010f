use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::ClientError;
use crate::address::with_address_prefix;
use crate::objects::{
    AddressBalances, Block, CoinInfo, Event, EventsResult, NodeResponse, Status,
};

/// Typed HTTP client for the node JSON API.
#[derive(Debug, Clone)]
pub struct NodeClient {
    http: Client,
    base_url: Url,
}

impl NodeClient {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new `NodeClient`.
    ///
    /// * `base_url` – root URL of the node API (e.g. `http://127.0.0.1:8841`).
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::builder()
                .timeout(Self::DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `GET /status` – latest block height known to the node.
    pub async fn latest_height(&self) -> Result<u64, ClientError> {
        let status: Status = self.get("status", &[]).await?;
        parse_u64("latest_block_height", &status.latest_block_height)
    }

    /// `GET /block?height=` – block with its transactions.
    pub async fn block(&self, height: u64) -> Result<Block, ClientError> {
        self.get("block", &[("height", height.to_string())]).await
    }

    /// `GET /events?height=` – consensus events of a block.
    pub async fn events(&self, height: u64) -> Result<Vec<Event>, ClientError> {
        let result: EventsResult = self.get("events", &[("height", height.to_string())]).await?;
        Ok(result.events)
    }

    /// `GET /addresses?addresses=[..]&height=` – balances of many addresses
    /// at a given height.
    ///
    /// Addresses may be passed with or without the network prefix.
    pub async fn address_balances(
        &self,
        addresses: &[String],
        height: u64,
    ) -> Result<Vec<AddressBalances>, ClientError> {
        let list = addresses
            .iter()
            .map(|a| format!("\"{}\"", with_address_prefix(a)))
            .collect::<Vec<_>>()
            .join(",");
        self.get(
            "addresses",
            &[("addresses", format!("[{list}]")), ("height", height.to_string())],
        )
        .await
    }

    /// `GET /coin_info?symbol=` – live state of a coin.
    pub async fn coin_info(&self, symbol: &str) -> Result<CoinInfo, ClientError> {
        self.get("coin_info", &[("symbol", symbol.to_string())]).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let url = self.base_url.join(path)?;
        let resp = self.http.get(url).query(query).send().await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    match serde_json::from_slice::<NodeResponse<T>>(&bytes) {
        Ok(envelope) => envelope
            .into_result()
            .map_err(|e| ClientError::Node {
                code: e.code,
                message: e.message,
            }),
        Err(_) if !status.is_success() => Err(ClientError::Api {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }),
        Err(e) => Err(ClientError::Json(e)),
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ClientError> {
    value.parse().map_err(|_| ClientError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
