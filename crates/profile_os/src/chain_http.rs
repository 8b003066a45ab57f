#![forbid(unsafe_code)]

//! Access-node REST transport.
//!
//! Scripts go to `POST {access}/v1/scripts` with base64 cadence and base64
//! JSON-Cadence arguments and come back as a base64 JSON-Cadence string.
//! Transactions are handed to the wallet authorization service, which signs,
//! submits and answers with the transaction id. Status is polled from
//! `GET {access}/v1/transaction_results/{id}`.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use profile_kernel_contracts::chain::{decode_json_cadence, ChainMutation, ChainQuery};
use profile_kernel_contracts::txlife::{
    TransactionId, TxPhase, TxStatusUpdate, RAW_STATUS_EXECUTED, RAW_STATUS_EXPIRED,
    RAW_STATUS_FINALIZED, RAW_STATUS_PENDING, RAW_STATUS_SEALED, RAW_STATUS_UNKNOWN,
};
use profile_kernel_contracts::{ContractViolation, Validate};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use crate::chain::{ChainTransport, TransportError, TxStatusStream};

pub const DEFAULT_WALLET_AUTHZ_ENDPOINT: &str = "http://localhost:8701/v1/authz";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 1_000;

/// Any status label outside the fixed table. Classifies as ERROR.
pub const RAW_STATUS_UNRECOGNIZED: i32 = i32::MAX;

const ERROR_BODY_MAX_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHttpConfig {
    pub access_node_api: Url,
    pub wallet_authz_endpoint: Url,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub status_poll_interval_ms: u64,
}

impl ChainHttpConfig {
    /// `Ok(None)` when `PROFILE_ACCESS_NODE_API` is unset. Any configured URL
    /// that does not parse as http(s) is an error.
    pub fn from_env() -> Result<Option<Self>, ContractViolation> {
        Self::from_env_lookup(|key| env::var(key).ok())
    }

    pub fn from_env_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ContractViolation> {
        let Some(access_node_api) = parse_url(
            &lookup,
            "PROFILE_ACCESS_NODE_API",
            "chain_http_config.access_node_api",
        )?
        else {
            return Ok(None);
        };
        let wallet_authz_endpoint = match parse_url(
            &lookup,
            "PROFILE_WALLET_AUTHZ_ENDPOINT",
            "chain_http_config.wallet_authz_endpoint",
        )? {
            Some(url) => url,
            None => Url::parse(DEFAULT_WALLET_AUTHZ_ENDPOINT).map_err(|_| {
                ContractViolation::InvalidValue {
                    field: "chain_http_config.wallet_authz_endpoint",
                    reason: "default endpoint must parse",
                }
            })?,
        };
        Ok(Some(Self {
            access_node_api,
            wallet_authz_endpoint,
            connect_timeout_ms: parse_ms(
                &lookup,
                "PROFILE_CONNECT_TIMEOUT_MS",
                100..=60_000,
                DEFAULT_CONNECT_TIMEOUT_MS,
            ),
            request_timeout_ms: parse_ms(
                &lookup,
                "PROFILE_REQUEST_TIMEOUT_MS",
                100..=120_000,
                DEFAULT_REQUEST_TIMEOUT_MS,
            ),
            status_poll_interval_ms: parse_ms(
                &lookup,
                "PROFILE_STATUS_POLL_INTERVAL_MS",
                100..=60_000,
                DEFAULT_STATUS_POLL_INTERVAL_MS,
            ),
        }))
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.access_node_api.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Blank counts as unset.
fn parse_url(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &'static str,
) -> Result<Option<Url>, ContractViolation> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Some(url)),
        Ok(url) => {
            tracing::error!(key, scheme = url.scheme(), "unsupported url scheme");
            Err(ContractViolation::InvalidValue {
                field,
                reason: "must be an http(s) url",
            })
        }
        Err(err) => {
            tracing::error!(key, %err, "invalid url");
            Err(ContractViolation::InvalidValue {
                field,
                reason: "must be an http(s) url",
            })
        }
    }
}

fn parse_ms(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    range: std::ops::RangeInclusive<u64>,
    default: u64,
) -> u64 {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
        .unwrap_or(default)
}

pub struct HttpChainTransport {
    config: ChainHttpConfig,
    agent: ureq::Agent,
}

impl HttpChainTransport {
    pub fn new(config: ChainHttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout_read(Duration::from_millis(config.request_timeout_ms))
            .timeout_write(Duration::from_millis(config.request_timeout_ms))
            .build();
        Self { config, agent }
    }

    pub fn config(&self) -> &ChainHttpConfig {
        &self.config
    }
}

pub fn script_request_body(query: &ChainQuery) -> Value {
    json!({
        "script": B64.encode(query.cadence.as_bytes()),
        "arguments": query
            .args
            .iter()
            .map(|a| B64.encode(a.to_json_cadence().to_string()))
            .collect::<Vec<_>>(),
    })
}

pub fn authz_request_body(mutation: &ChainMutation) -> Value {
    json!({
        "script": B64.encode(mutation.cadence.as_bytes()),
        "arguments": mutation
            .args
            .iter()
            .map(|a| B64.encode(a.to_json_cadence().to_string()))
            .collect::<Vec<_>>(),
        "proposer": mutation.authorizations.proposer.as_str(),
        "payer": mutation.authorizations.payer.as_str(),
        "authorizers": mutation
            .authorizations
            .authorizers
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>(),
        "gas_limit": mutation.compute_limit,
    })
}

/// Decodes a script response body into plain JSON. `None` for a void or nil result.
pub fn decode_script_response(body: &str) -> Result<Option<Value>, TransportError> {
    let encoded: String = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("script result is not a json string: {e}")))?;
    let raw = B64
        .decode(encoded.trim())
        .map_err(|e| TransportError::Malformed(format!("script result is not base64: {e}")))?;
    let cadence: Value = serde_json::from_slice(&raw)
        .map_err(|e| TransportError::Malformed(format!("script result is not json-cadence: {e}")))?;
    let plain = decode_json_cadence(&cadence)
        .map_err(|v| TransportError::Malformed(v.to_string()))?;
    Ok(if plain.is_null() { None } else { Some(plain) })
}

#[derive(Debug, Deserialize)]
struct AuthzResponse {
    #[serde(alias = "id")]
    transaction_id: String,
}

pub fn decode_authz_response(body: &str) -> Result<TransactionId, TransportError> {
    let resp: AuthzResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("authz response: {e}")))?;
    Ok(TransactionId::new(resp.transaction_id)?)
}

pub fn raw_status_from_label(label: &str) -> i32 {
    match label.trim() {
        "Unknown" => RAW_STATUS_UNKNOWN,
        "Pending" => RAW_STATUS_PENDING,
        "Finalized" => RAW_STATUS_FINALIZED,
        "Executed" => RAW_STATUS_EXECUTED,
        "Sealed" => RAW_STATUS_SEALED,
        "Expired" => RAW_STATUS_EXPIRED,
        _ => RAW_STATUS_UNRECOGNIZED,
    }
}

#[derive(Debug, Deserialize)]
struct TransactionResultBody {
    status: String,
    #[serde(default)]
    error_message: String,
}

pub fn decode_transaction_result(body: &str) -> Result<TxStatusUpdate, TransportError> {
    let result: TransactionResultBody = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("transaction result: {e}")))?;
    let status = raw_status_from_label(&result.status);
    let message = result.error_message.trim();
    Ok(if message.is_empty() {
        TxStatusUpdate::new(status)
    } else {
        TxStatusUpdate::with_error(status, bounded(message))
    })
}

fn bounded(s: &str) -> String {
    s.chars().take(ERROR_BODY_MAX_CHARS).collect()
}

fn map_ureq_error(context: &str, err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            TransportError::Rejected(format!(
                "{context} failed with http status {code}: {}",
                bounded(body.trim())
            ))
        }
        ureq::Error::Transport(err) => {
            TransportError::Unavailable(format!("{context} transport error: {err}"))
        }
    }
}

fn post_json(agent: &ureq::Agent, url: &str, context: &str, body: &Value) -> Result<String, TransportError> {
    let resp = agent
        .post(url)
        .set("content-type", "application/json")
        .send_string(&body.to_string())
        .map_err(|e| map_ureq_error(context, e))?;
    resp.into_string()
        .map_err(|e| TransportError::Malformed(format!("{context} body unreadable: {e}")))
}

fn fetch_transaction_status(agent: &ureq::Agent, url: &str) -> Result<TxStatusUpdate, TransportError> {
    let resp = agent
        .get(url)
        .call()
        .map_err(|e| map_ureq_error("transaction status", e))?;
    let body = resp
        .into_string()
        .map_err(|e| TransportError::Malformed(format!("transaction status body unreadable: {e}")))?;
    decode_transaction_result(&body)
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, TransportError> + Send + 'static,
) -> Result<T, TransportError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Unavailable(format!("blocking http task failed: {e}")))?
}

#[async_trait]
impl ChainTransport for HttpChainTransport {
    async fn query(&self, query: &ChainQuery) -> Result<Option<Value>, TransportError> {
        query.validate()?;
        let agent = self.agent.clone();
        let url = self.config.endpoint("v1/scripts");
        let body = script_request_body(query);
        let text = blocking(move || post_json(&agent, &url, "script", &body)).await?;
        decode_script_response(&text)
    }

    async fn mutate(&self, mutation: &ChainMutation) -> Result<TransactionId, TransportError> {
        mutation.validate()?;
        let agent = self.agent.clone();
        let url = self.config.wallet_authz_endpoint.to_string();
        let body = authz_request_body(mutation);
        let text = blocking(move || post_json(&agent, &url, "authorization", &body)).await?;
        let id = decode_authz_response(&text)?;
        tracing::info!(tx_id = %id, program = mutation.program.as_str(), "transaction submitted");
        Ok(id)
    }

    fn subscribe_transaction(&self, id: &TransactionId) -> Result<TxStatusStream, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Unavailable(format!("no async runtime for polling: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = self.agent.clone();
        let url = self.config.endpoint(&format!("v1/transaction_results/{id}"));
        let interval = Duration::from_millis(self.config.status_poll_interval_ms);
        let tx_id = id.clone();
        runtime.spawn(async move {
            let mut last_status: Option<i32> = None;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    tracing::debug!(tx_id = %tx_id, "status subscriber dropped; polling stopped");
                    break;
                }
                let (agent, url) = (agent.clone(), url.clone());
                match blocking(move || fetch_transaction_status(&agent, &url)).await {
                    Ok(update) => {
                        let status = update.status;
                        if last_status != Some(status) {
                            last_status = Some(status);
                            if tx.send(update).is_err() {
                                break;
                            }
                        }
                        if TxPhase::from_raw_status(status).is_terminal() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(tx_id = %tx_id, %err, "status poll failed; retrying");
                    }
                }
            }
        });
        Ok(rx)
    }
}
