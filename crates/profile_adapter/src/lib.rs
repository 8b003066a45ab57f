#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use profile_kernel_contracts::profile::ProfileDraft;
use profile_os::chain::{ChainTransport, LoopbackChain};
use profile_os::chain_http::{ChainHttpConfig, HttpChainTransport};
use profile_os::identity::{IdentityProvider, LoopbackIdentityProvider};
use profile_os::profile_ctl::{
    ProfileActionError, ProfileController, ProfileControllerConfig, SubmissionReceipt, ViewState,
};
use url::Url;

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_DISCOVERY_WALLET: &str = "http://localhost:8701/fcl/authn";
pub const DEFAULT_APP_TITLE: &str = "Flow Next.js Quick Start";
pub const DEFAULT_APP_ICON: &str = "http://localhost:3000/flow-logo.svg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: SocketAddr,
    pub discovery_wallet: Url,
    pub app_title: String,
    pub app_icon: String,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_env_lookup(|key| env::var(key).ok())
    }

    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let value = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let bind = value("PROFILE_HTTP_BIND", DEFAULT_HTTP_BIND);
        let http_bind = bind
            .parse::<SocketAddr>()
            .map_err(|err| format!("PROFILE_HTTP_BIND {bind:?}: {err}"))?;
        let wallet = value("PROFILE_DISCOVERY_WALLET", DEFAULT_DISCOVERY_WALLET);
        let discovery_wallet =
            Url::parse(&wallet).map_err(|err| format!("PROFILE_DISCOVERY_WALLET {wallet:?}: {err}"))?;
        Ok(Self {
            http_bind,
            discovery_wallet,
            app_title: value("PROFILE_APP_TITLE", DEFAULT_APP_TITLE),
            app_icon: value("PROFILE_APP_ICON", DEFAULT_APP_ICON),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    Loopback,
    Http,
}

impl ChainMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loopback => "LOOPBACK",
            Self::Http => "HTTP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub chain_mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterConfigResponse {
    pub chain_mode: String,
    pub access_node_api: Option<String>,
    pub wallet_authz_endpoint: Option<String>,
    pub discovery_wallet: String,
    pub contract_address: String,
    pub explorer_base: String,
    pub app_title: String,
    pub app_icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProfileActionResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub error_code: Option<String>,
    pub ticket: Option<u64>,
    pub transaction_id: Option<String>,
    pub state: ViewState,
}

pub fn status_for_error(err: &ProfileActionError) -> StatusCode {
    match err {
        ProfileActionError::AuthRequired => StatusCode::UNAUTHORIZED,
        ProfileActionError::ProfileRequired | ProfileActionError::Busy => StatusCode::CONFLICT,
        ProfileActionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProfileActionError::SubmitFailed(_)
        | ProfileActionError::QueryFailed(_)
        | ProfileActionError::IdentityFailed(_) => StatusCode::BAD_GATEWAY,
        ProfileActionError::TrackerMisuse(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct AdapterRuntime {
    config: AdapterConfig,
    chain_mode: ChainMode,
    access: Option<ChainHttpConfig>,
    controller: Arc<ProfileController>,
}

impl AdapterRuntime {
    pub fn new(
        config: AdapterConfig,
        controller_config: ProfileControllerConfig,
        chain: Arc<dyn ChainTransport>,
        identity: Arc<dyn IdentityProvider>,
        access: Option<ChainHttpConfig>,
    ) -> Self {
        let chain_mode = if access.is_some() {
            ChainMode::Http
        } else {
            ChainMode::Loopback
        };
        Self {
            config,
            chain_mode,
            access,
            controller: ProfileController::new(controller_config, chain, identity),
        }
    }

    /// Uses the access node when `PROFILE_ACCESS_NODE_API` is set, the in-memory chain otherwise.
    pub fn default_from_env() -> Result<Self, String> {
        Self::from_env_lookup(|key| env::var(key).ok())
    }

    /// A configured but malformed access node or wallet endpoint is an error,
    /// never a silent switch to the in-memory chain.
    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let config = AdapterConfig::from_env_lookup(&lookup)?;
        let controller_config =
            ProfileControllerConfig::from_env_lookup(&lookup).map_err(|v| v.to_string())?;
        let identity: Arc<dyn IdentityProvider> = Arc::new(
            LoopbackIdentityProvider::from_env_lookup(&lookup).map_err(|e| e.to_string())?,
        );
        let access = ChainHttpConfig::from_env_lookup(&lookup).map_err(|v| v.to_string())?;
        let chain: Arc<dyn ChainTransport> = match &access {
            Some(http) => Arc::new(HttpChainTransport::new(http.clone())),
            None => Arc::new(LoopbackChain::new()),
        };
        Ok(Self::new(config, controller_config, chain, identity, access))
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn chain_mode(&self) -> ChainMode {
        self.chain_mode
    }

    pub fn controller(&self) -> &Arc<ProfileController> {
        &self.controller
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            chain_mode: self.chain_mode.as_str().to_string(),
        }
    }

    pub fn config_report(&self) -> AdapterConfigResponse {
        let controller_config = self.controller.config();
        AdapterConfigResponse {
            chain_mode: self.chain_mode.as_str().to_string(),
            access_node_api: self.access.as_ref().map(|a| a.access_node_api.to_string()),
            wallet_authz_endpoint: self
                .access
                .as_ref()
                .map(|a| a.wallet_authz_endpoint.to_string()),
            discovery_wallet: self.config.discovery_wallet.to_string(),
            contract_address: controller_config.contract_address.to_string(),
            explorer_base: controller_config.explorer_base.clone(),
            app_title: self.config.app_title.clone(),
            app_icon: self.config.app_icon.clone(),
        }
    }

    pub fn state(&self) -> ViewState {
        self.controller.view_state()
    }

    pub async fn log_in(&self) -> Result<ProfileActionResponse, ProfileActionError> {
        self.controller.log_in().await?;
        Ok(self.accepted("LOGGED_IN", None))
    }

    pub async fn sign_up(&self) -> Result<ProfileActionResponse, ProfileActionError> {
        self.controller.sign_up().await?;
        Ok(self.accepted("LOGGED_IN", None))
    }

    pub async fn log_out(&self) -> Result<ProfileActionResponse, ProfileActionError> {
        self.controller.log_out().await?;
        Ok(self.accepted("LOGGED_OUT", None))
    }

    pub async fn load_profile(&self) -> Result<ProfileActionResponse, ProfileActionError> {
        self.controller.load_profile().await?;
        Ok(self.accepted("LOADED", None))
    }

    pub async fn create_profile(&self) -> Result<ProfileActionResponse, ProfileActionError> {
        let receipt = self.controller.create_profile().await?;
        Ok(self.accepted("SUBMITTED", Some(&receipt)))
    }

    pub async fn update_profile(
        &self,
        draft: ProfileDraft,
    ) -> Result<ProfileActionResponse, ProfileActionError> {
        let receipt = self.controller.update_profile(draft).await?;
        Ok(self.accepted("SUBMITTED", Some(&receipt)))
    }

    pub fn dismiss_transaction(&self) -> ProfileActionResponse {
        self.controller.dismiss_transaction();
        self.accepted("DISMISSED", None)
    }

    pub fn respond(
        &self,
        result: Result<ProfileActionResponse, ProfileActionError>,
    ) -> (StatusCode, ProfileActionResponse) {
        match result {
            Ok(response) => (StatusCode::OK, response),
            Err(err) => {
                let status = status_for_error(&err);
                tracing::debug!(code = err.code(), http_status = status.as_u16(), %err, "profile action rejected");
                (
                    status,
                    ProfileActionResponse {
                        status: "error".to_string(),
                        outcome: "REJECTED".to_string(),
                        reason: Some(err.to_string()),
                        error_code: Some(err.code().to_string()),
                        ticket: None,
                        transaction_id: None,
                        state: self.state(),
                    },
                )
            }
        }
    }

    // The tracking task keeps running after the receipt's handle is dropped here.
    fn accepted(&self, outcome: &str, receipt: Option<&SubmissionReceipt>) -> ProfileActionResponse {
        ProfileActionResponse {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            reason: None,
            error_code: None,
            ticket: receipt.map(|r| r.ticket.0),
            transaction_id: receipt.map(|r| r.transaction_id.to_string()),
            state: self.state(),
        }
    }
}
