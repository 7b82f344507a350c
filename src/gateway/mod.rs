//! Payment provider gateways
//!
//! Each provider integration implements [`PaymentGateway`]. The
//! [`engine::GatewayEngine`] drives bank transfers through the provider
//! queue chosen by [`strategy::StrategyPlanner`].

pub mod engine;
pub mod http;
pub mod sandbox;
pub mod strategy;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core_types::{ProviderCode, TransactionCode};
use crate::transaction::{ProviderStatus, Transaction};

pub use engine::{
    AccountInquiry, CallbackOutcome, CompensationOutcome, DispatchMode, DispatchOutcome,
    GatewayEngine,
};
pub use http::{HttpGateway, ProviderEndpoint};
pub use strategy::{RoutingConfig, StrategyPlanner};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    Timeout {
        provider: ProviderCode,
        timeout_ms: u64,
    },

    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected {
        provider: ProviderCode,
        reason: String,
    },

    #[error("Transport error calling {provider}: {message}")]
    Transport {
        provider: ProviderCode,
        message: String,
    },

    #[error("Invalid callback payload: {0}")]
    InvalidCallback(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(ProviderCode),
}

/// Parsed provider callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    /// Our transaction code, when the provider echoes it back
    pub transaction_code: Option<TransactionCode>,
    /// Provider-side reference of the transfer
    pub reference: String,
    pub status: ProviderStatus,
}

/// Provider integration contract
///
/// `create_transfer` must be idempotent on the transaction code: the same
/// transaction may be submitted again after a crash.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn code(&self) -> &ProviderCode;

    /// Submit a disbursement. Returns the provider reference.
    async fn create_transfer(&self, transaction: &Transaction) -> Result<String, GatewayError>;

    /// Resolve the holder name of a bank account
    async fn inquiry(&self, bank_code: &str, account_number: &str)
    -> Result<String, GatewayError>;

    fn parse_callback(&self, payload: &[u8]) -> Result<CallbackResult, GatewayError>;
}

/// Provider integrations keyed by provider code
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: FxHashMap<ProviderCode, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`HttpGateway`] per configured endpoint
    pub fn from_endpoints(endpoints: &[ProviderEndpoint]) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for endpoint in endpoints {
            registry.register(Arc::new(HttpGateway::new(endpoint.clone())?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.code().clone(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, code: &ProviderCode) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(code)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider(code.clone()))
    }

    pub fn contains(&self, code: &ProviderCode) -> bool {
        self.gateways.contains_key(code)
    }

    pub fn codes(&self) -> Vec<ProviderCode> {
        let mut codes: Vec<_> = self.gateways.keys().cloned().collect();
        codes.sort();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::sandbox::SandboxGateway;
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = GatewayRegistry::new()
            .with(Arc::new(SandboxGateway::new("p1")))
            .with(Arc::new(SandboxGateway::new("p2")));
        assert!(registry.get(&ProviderCode::new("p1")).is_ok());
        assert!(registry.contains(&ProviderCode::new("p2")));
        assert_eq!(
            registry.get(&ProviderCode::new("p9")).err(),
            Some(GatewayError::UnknownProvider(ProviderCode::new("p9")))
        );
        assert_eq!(
            registry.codes(),
            vec![ProviderCode::new("p1"), ProviderCode::new("p2")]
        );
    }
}
