//! HTTP provider integration
//!
//! Generic JSON-over-HTTPS disbursement provider. Each configured endpoint
//! becomes one [`HttpGateway`] registered under its provider code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{CallbackResult, GatewayError, PaymentGateway};
use crate::core_types::{ProviderCode, TransactionCode};
use crate::transaction::{ProviderStatus, Transaction};

/// Provider endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub code: ProviderCode,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Map a provider status word onto [`ProviderStatus`].
///
/// Unknown words are treated as still pending.
pub fn normalize_status(raw: &str) -> ProviderStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SUCCESS" | "SUCCEEDED" | "COMPLETED" | "DONE" => ProviderStatus::Completed,
        "FAILED" | "REJECTED" | "CANCELLED" => ProviderStatus::Failed,
        "REFUND" | "REFUNDED" | "REVERSED" => ProviderStatus::Refund,
        _ => ProviderStatus::Pending,
    }
}

#[derive(Serialize)]
struct DisbursementRequest<'a> {
    transaction_code: &'a str,
    amount: i64,
    currency: &'a str,
    bank_code: &'a str,
    account_number: &'a str,
    account_name: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct DisbursementResponse {
    reference: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct InquiryRequest<'a> {
    bank_code: &'a str,
    account_number: &'a str,
}

#[derive(Deserialize)]
struct InquiryResponse {
    account_name: String,
}

#[derive(Deserialize)]
struct CallbackPayload {
    #[serde(default)]
    transaction_code: Option<String>,
    reference: String,
    status: String,
}

pub struct HttpGateway {
    endpoint: ProviderEndpoint,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(endpoint.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport {
                provider: endpoint.code.clone(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.base_url.trim_end_matches('/'), path)
    }

    fn map_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                provider: self.endpoint.code.clone(),
                timeout_ms: self.endpoint.timeout_ms,
            }
        } else {
            GatewayError::Transport {
                provider: self.endpoint.code.clone(),
                message: e.to_string(),
            }
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.endpoint.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                provider: self.endpoint.code.clone(),
                reason: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }
        response.json::<Resp>().await.map_err(|e| self.map_error(e))
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    fn code(&self) -> &ProviderCode {
        &self.endpoint.code
    }

    async fn create_transfer(&self, transaction: &Transaction) -> Result<String, GatewayError> {
        let destination =
            transaction
                .bank_destination
                .as_ref()
                .ok_or_else(|| GatewayError::Rejected {
                    provider: self.endpoint.code.clone(),
                    reason: "transaction has no bank destination".into(),
                })?;
        let request = DisbursementRequest {
            transaction_code: transaction.code.as_str(),
            amount: transaction.sub_amount,
            currency: &transaction.currency,
            bank_code: &destination.bank_code,
            account_number: &destination.account_number,
            account_name: &destination.account_name,
            description: &transaction.description,
        };
        let response: DisbursementResponse = self.post("disbursements", &request).await?;
        debug!(
            provider = %self.endpoint.code,
            code = %transaction.code,
            reference = %response.reference,
            "Disbursement submitted"
        );

        if response
            .status
            .as_deref()
            .is_some_and(|s| normalize_status(s).is_failure())
        {
            return Err(GatewayError::Rejected {
                provider: self.endpoint.code.clone(),
                reason: response
                    .message
                    .unwrap_or_else(|| "rejected by provider".into()),
            });
        }
        Ok(response.reference)
    }

    async fn inquiry(
        &self,
        bank_code: &str,
        account_number: &str,
    ) -> Result<String, GatewayError> {
        let request = InquiryRequest {
            bank_code,
            account_number,
        };
        let response: InquiryResponse = self.post("account-inquiry", &request).await?;
        Ok(response.account_name)
    }

    fn parse_callback(&self, payload: &[u8]) -> Result<CallbackResult, GatewayError> {
        let raw: CallbackPayload = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::InvalidCallback(e.to_string()))?;
        if raw.reference.is_empty() {
            return Err(GatewayError::InvalidCallback("empty reference".into()));
        }
        Ok(CallbackResult {
            transaction_code: raw.transaction_code.map(TransactionCode::new),
            reference: raw.reference,
            status: normalize_status(&raw.status),
        })
    }
}
