//! Sandbox provider
//!
//! In-process [`PaymentGateway`] with scriptable outcomes. Used by tests and
//! by the `sandbox` run mode, where no real provider is reachable.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use super::http::normalize_status;
use super::{CallbackResult, GatewayError, PaymentGateway};
use crate::core_types::{ProviderCode, TransactionCode};
use crate::transaction::Transaction;

/// Scripted result of one `create_transfer` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// Return reference `"{provider}-{transaction code}"`
    Accept,
    Reject(String),
    /// Never answer; the engine's call timeout fires
    Hang,
}

pub struct SandboxGateway {
    code: ProviderCode,
    default_outcome: Mutex<SandboxOutcome>,
    scripted: Mutex<VecDeque<SandboxOutcome>>,
    calls: Mutex<Vec<TransactionCode>>,
    call_count: AtomicU64,
    /// (bank code, account number) -> holder name
    accounts: Mutex<FxHashMap<(String, String), String>>,
}

impl SandboxGateway {
    pub fn new(code: impl Into<ProviderCode>) -> Self {
        Self {
            code: code.into(),
            default_outcome: Mutex::new(SandboxOutcome::Accept),
            scripted: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicU64::new(0),
            accounts: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn rejecting(code: impl Into<ProviderCode>, reason: impl Into<String>) -> Self {
        let gateway = Self::new(code);
        gateway.set_default(SandboxOutcome::Reject(reason.into()));
        gateway
    }

    /// Queue an outcome for the next call; the default applies once drained
    pub fn push_outcome(&self, outcome: SandboxOutcome) {
        self.scripted.lock().push_back(outcome);
    }

    pub fn set_default(&self, outcome: SandboxOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    /// Transaction codes submitted so far, in call order
    pub fn calls(&self) -> Vec<TransactionCode> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn register_account(&self, bank_code: &str, account_number: &str, name: &str) {
        self.accounts.lock().insert(
            (bank_code.to_string(), account_number.to_string()),
            name.to_string(),
        );
    }

    fn next_outcome(&self) -> SandboxOutcome {
        match self.scripted.lock().pop_front() {
            Some(outcome) => outcome,
            None => self.default_outcome.lock().clone(),
        }
    }
}

#[derive(Deserialize)]
struct SandboxCallback {
    transaction_code: Option<String>,
    reference: String,
    status: String,
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn code(&self) -> &ProviderCode {
        &self.code
    }

    async fn create_transfer(&self, transaction: &Transaction) -> Result<String, GatewayError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(transaction.code.clone());
        match self.next_outcome() {
            SandboxOutcome::Accept => Ok(format!("{}-{}", self.code, transaction.code)),
            SandboxOutcome::Reject(reason) => Err(GatewayError::Rejected {
                provider: self.code.clone(),
                reason,
            }),
            SandboxOutcome::Hang => std::future::pending().await,
        }
    }

    async fn inquiry(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> Result<String, GatewayError> {
        self.accounts
            .lock()
            .get(&(bank_code.to_string(), account_number.to_string()))
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                provider: self.code.clone(),
                reason: format!("account {} not found at bank {}", account_number, bank_code),
            })
    }

    fn parse_callback(&self, payload: &[u8]) -> Result<CallbackResult, GatewayError> {
        let raw: SandboxCallback = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidCallback(e.to_string()))?;
        Ok(CallbackResult {
            transaction_code: raw.transaction_code.map(TransactionCode::new),
            reference: raw.reference,
            status: normalize_status(&raw.status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ProviderStatus;

    #[test]
    fn test_parse_callback() {
        let gateway = SandboxGateway::new("p1");
        let parsed = gateway
            .parse_callback(br#"{"transaction_code":"TRB1","reference":"p1-TRB1","status":"success"}"#)
            .unwrap();
        assert_eq!(parsed.transaction_code, Some(TransactionCode::new("TRB1")));
        assert_eq!(parsed.status, ProviderStatus::Completed);

        let err = gateway.parse_callback(b"not json").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCallback(_)));
    }

    #[tokio::test]
    async fn test_scripted_outcomes_then_default() {
        let gateway = SandboxGateway::rejecting("p1", "closed");
        gateway.push_outcome(SandboxOutcome::Accept);
        assert_eq!(gateway.next_outcome(), SandboxOutcome::Accept);
        assert_eq!(
            gateway.next_outcome(),
            SandboxOutcome::Reject("closed".into())
        );
    }

    #[tokio::test]
    async fn test_inquiry_uses_registered_accounts() {
        let gateway = SandboxGateway::new("p1");
        gateway.register_account("014", "123", "SITI");
        assert_eq!(gateway.inquiry("014", "123").await.unwrap(), "SITI");
        assert!(gateway.inquiry("014", "999").await.is_err());
    }
}
