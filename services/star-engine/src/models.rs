use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Success envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// XLM to STAR mint request
#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    #[validate(length(min = 1, max = 128))]
    pub wallet_address: String,
    pub xlm_amount: Decimal,
    #[validate(length(min = 1, max = 256))]
    pub transaction_hash: String,
}

/// Request carrying only a wallet
#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    #[validate(length(min = 1, max = 128))]
    pub wallet_address: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReferralRequest {
    #[validate(length(min = 1, max = 32))]
    pub referral_code: String,
    /// The wallet being referred
    #[validate(length(min = 1, max = 128))]
    pub wallet_address: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    #[validate(length(min = 1, max = 128))]
    pub wallet_address: String,
    pub task_id: Uuid,
    pub proof_data: Option<serde_json::Value>,
}

/// Point burn request
#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BurnRequest {
    #[validate(length(min = 1, max = 128))]
    pub wallet_address: String,
    pub project_id: Uuid,
    pub star_amount: Decimal,
    #[validate(length(min = 1, max = 256))]
    pub request_id: String,
}

impl From<BurnRequest> for point_ledger::BurnRequest {
    fn from(req: BurnRequest) -> Self {
        Self {
            wallet_address: req.wallet_address,
            project_id: req.project_id,
            star_amount: req.star_amount,
            request_id: req.request_id,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParticipateRequest {
    #[validate(length(min = 1, max = 128))]
    pub participant_wallet_address: String,
    pub xlm_amount: Decimal,
    #[validate(length(min = 1, max = 256))]
    pub transaction_hash: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    #[validate(length(min = 1, max = 128))]
    pub distributor_public_key: String,
}

/// Health check body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_request_accepts_string_and_number_amounts() {
        let from_str: BurnRequest = serde_json::from_value(serde_json::json!({
            "walletAddress": "GUSER",
            "projectId": Uuid::nil(),
            "starAmount": "12.50",
            "requestId": "r-1"
        }))
        .unwrap();
        let from_num: BurnRequest = serde_json::from_value(serde_json::json!({
            "walletAddress": "GUSER",
            "projectId": Uuid::nil(),
            "starAmount": 60,
            "requestId": "r-1"
        }))
        .unwrap();

        assert_eq!(from_str.star_amount, Decimal::new(1250, 2));
        assert_eq!(from_num.star_amount, Decimal::from(60));
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let req = MintRequest {
            wallet_address: String::new(),
            xlm_amount: Decimal::ONE,
            transaction_hash: "h".into(),
        };
        assert!(req.validate().is_err());
    }
}
