pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::types::{Money, Msisdn};

pub use http::HttpMomoGateway;

/// The two token scopes of the mobile-money network. Disbursements push
/// money out; collections pull repayments in. Each scope has its own
/// subscription key and bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayScope {
    Collection,
    Disbursement,
}

impl GatewayScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Disbursement => "disbursement",
        }
    }
}

/// Counter-party on a transfer. `party_id_type` is always "MSISDN": the
/// gateway addresses accounts by phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub party_id_type: String,
    pub party_id: String,
}

impl Party {
    pub fn msisdn(phone: &Msisdn) -> Self {
        Self {
            party_id_type: "MSISDN".to_string(),
            party_id: phone.as_party_id().to_string(),
        }
    }
}

/// Disbursement transfer request body, field-for-field what the gateway
/// expects. `external_id` is the caller-generated idempotency key; it is
/// also sent as the `X-Reference-Id` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub amount: Money,
    pub currency: String,
    pub external_id: String,
    pub payee: Party,
    pub payer_message: String,
    pub payee_note: String,
}

/// Collection request-to-pay body: same shape as a transfer with `payer`
/// instead of `payee`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    pub amount: Money,
    pub currency: String,
    pub external_id: String,
    pub payer: Party,
    pub payer_message: String,
    pub payee_note: String,
}

/// Transfer status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayTransferStatus {
    Successful,
    Failed,
    Pending,
}

/// Response of the status-check endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferStatusResponse {
    pub status: GatewayTransferStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, rename = "financialTransactionId")]
    pub financial_transaction_id: Option<String>,
}

/// Connection settings for the mobile-money network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Target environment header value (e.g. "sandbox").
    pub environment: String,
    pub api_user: String,
    pub api_key: String,
    /// Subscription key for the disbursement scope.
    pub disbursement_key: String,
    /// Subscription key for the collection scope.
    pub collection_key: String,
    pub timeout_secs: u64,
    /// Tokens are refreshed this many seconds before they would expire.
    pub token_refresh_margin_secs: u64,
}

impl GatewayConfig {
    pub fn subscription_key(&self, scope: GatewayScope) -> &str {
        match scope {
            GatewayScope::Collection => &self.collection_key,
            GatewayScope::Disbursement => &self.disbursement_key,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            environment: "sandbox".to_string(),
            api_user: String::new(),
            api_key: String::new(),
            disbursement_key: String::new(),
            collection_key: String::new(),
            timeout_secs: 30,
            token_refresh_margin_secs: 60,
        }
    }
}

/// Outbound seam to the mobile-money network. The HTTP implementation lives
/// in [`http`]; tests substitute stubs.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Push a disbursement transfer. Accepted means the gateway is
    /// processing it; the terminal outcome arrives via webhook or polling.
    async fn transfer(&self, request: &TransferRequest) -> Result<(), GatewayError>;

    /// Ask the payer's wallet for a repayment.
    async fn request_to_pay(&self, request: &CollectionRequest) -> Result<(), GatewayError>;

    /// Poll the status of a previously submitted request.
    async fn status(
        &self,
        scope: GatewayScope,
        reference: &str,
    ) -> Result<TransferStatusResponse, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transfer_request_wire_shape() {
        let phone = Msisdn::new("+250788123456").unwrap();
        let request = TransferRequest {
            amount: dec!(500.00),
            currency: "EUR".into(),
            external_id: "11f9e3c2-0f3a-4e5d-9a1b-2c3d4e5f6a7b".into(),
            payee: Party::msisdn(&phone),
            payer_message: "Loan Disbursement".into(),
            payee_note: "Farm Loan".into(),
        };
        let value = serde_json::to_value(&request).unwrap();

        // Bit-exact field names expected by the gateway.
        assert_eq!(value["amount"], "500.00");
        assert_eq!(value["currency"], "EUR");
        assert_eq!(value["externalId"], "11f9e3c2-0f3a-4e5d-9a1b-2c3d4e5f6a7b");
        assert_eq!(value["payee"]["partyIdType"], "MSISDN");
        assert_eq!(value["payee"]["partyId"], "250788123456");
        assert_eq!(value["payerMessage"], "Loan Disbursement");
        assert_eq!(value["payeeNote"], "Farm Loan");
    }

    #[test]
    fn test_collection_request_uses_payer() {
        let phone = Msisdn::new("250788123456").unwrap();
        let request = CollectionRequest {
            amount: dec!(120.50),
            currency: "EUR".into(),
            external_id: "ref".into(),
            payer: Party::msisdn(&phone),
            payer_message: "Loan Repayment".into(),
            payee_note: "Farm Loan Repayment".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("payee").is_none());
        assert_eq!(value["payer"]["partyId"], "250788123456");
    }

    #[test]
    fn test_status_parses_screaming_case() {
        let response: TransferStatusResponse =
            serde_json::from_str(r#"{"status": "SUCCESSFUL"}"#).unwrap();
        assert_eq!(response.status, GatewayTransferStatus::Successful);

        let response: TransferStatusResponse = serde_json::from_str(
            r#"{"status": "FAILED", "reason": "PAYEE_NOT_FOUND"}"#,
        )
        .unwrap();
        assert_eq!(response.status, GatewayTransferStatus::Failed);
        assert_eq!(response.reason.as_deref(), Some("PAYEE_NOT_FOUND"));
    }
}
