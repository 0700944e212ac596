use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub const RESULT_CODE_SUCCESS: &str = "0";
pub const RESULT_CODE_CANCELLED: &str = "1032";
pub const RESULT_CODE_INSUFFICIENT: &str = "1";
pub const RESPONSE_CODE_ACCEPTED: &str = "0";

pub const TRANSACTION_TYPE_PAYBILL: &str = "CustomerPayBillOnline";

/// Canonical payment status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Idle,
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Insufficient,
}

impl PaymentStatus {
    /// Map a raw Daraja result code. `None` means no result has been reported yet.
    pub fn from_result_code(code: Option<&str>) -> Self {
        match code.map(str::trim) {
            None => PaymentStatus::Pending,
            Some(RESULT_CODE_SUCCESS) => PaymentStatus::Success,
            Some(RESULT_CODE_CANCELLED) => PaymentStatus::Cancelled,
            Some(RESULT_CODE_INSUFFICIENT) => PaymentStatus::Insufficient,
            Some(_) => PaymentStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Insufficient
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Idle => "idle",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Insufficient => "insufficient",
        }
    }

    /// Coarse status exposed on the query-status endpoint.
    pub fn wire_status(&self) -> WireStatus {
        match self {
            PaymentStatus::Success => WireStatus::Completed,
            PaymentStatus::Idle | PaymentStatus::Pending | PaymentStatus::Processing => {
                WireStatus::Pending
            }
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Insufficient => {
                WireStatus::Failed
            }
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Pending,
    Completed,
    Failed,
}

// Daraja sends ResultCode as a number in callbacks and as a string in query responses.
fn code_to_string(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_optional_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(code_to_string))
}

// ---- Daraja wire types ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    pub amount: u64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default, deserialize_with = "deserialize_optional_code")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkQueryRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode", default, deserialize_with = "deserialize_optional_code")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "ResultCode", default, deserialize_with = "deserialize_optional_code")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// `{"Body": {"stkCallback": {...}}}` as posted to the callback URL.
#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode", default, deserialize_with = "deserialize_optional_code")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<JsonValue>,
}

// ---- Domain types ----

/// A validated STK push, ready to be signed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushCommand {
    /// International format without a leading zero, e.g. 2547XXXXXXXX.
    pub phone_number: String,
    pub amount: u64,
    pub account_reference: String,
    pub transaction_desc: String,
    pub callback_url: String,
}

/// Correlation pair returned when Daraja accepts a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIds {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StkQueryOutcome {
    pub response_code: Option<String>,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
}

impl StkQueryOutcome {
    /// Request accepted by Daraja but the payer has not answered yet.
    pub fn is_awaiting_result(&self) -> bool {
        self.response_code.as_deref() == Some(RESPONSE_CODE_ACCEPTED) && self.result_code.is_none()
    }

    pub fn status(&self) -> PaymentStatus {
        if self.is_awaiting_result() {
            PaymentStatus::Pending
        } else {
            PaymentStatus::from_result_code(self.result_code.as_deref())
        }
    }
}

impl From<StkQueryResponse> for StkQueryOutcome {
    fn from(response: StkQueryResponse) -> Self {
        Self {
            response_code: response.response_code,
            result_code: response.result_code,
            result_desc: response.result_desc.or(response.response_description),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    /// Stored callback result
    Callback,
    /// Live STK query
    Query,
    /// Query failed; reported as pending
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatus {
    pub checkout_request_id: String,
    pub status: PaymentStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub source: StatusSource,
    pub message: Option<String>,
}

// ---- HTTP contract shared by the server and its clients ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_desc: Option<String>,
}

pub const STK_PUSH_SENT_MESSAGE: &str = "STK Push sent successfully";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InitiatePaymentResponse {
    pub fn accepted(ids: CheckoutIds) -> Self {
        Self {
            success: true,
            checkout_request_id: Some(ids.checkout_request_id),
            merchant_request_id: Some(ids.merchant_request_id),
            message: Some(
                ids.customer_message
                    .unwrap_or_else(|| STK_PUSH_SENT_MESSAGE.to_string()),
            ),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            checkout_request_id: None,
            merchant_request_id: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusQueryResponse {
    pub success: bool,
    pub status: WireStatus,
    /// Fine-grained status, absent from older servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusQueryResponse {
    /// A fallback answer (live query failed) is reported with `success: false`.
    pub fn from_resolved(resolved: ResolvedStatus) -> Self {
        Self {
            success: resolved.source != StatusSource::Fallback,
            status: resolved.status.wire_status(),
            payment_status: Some(resolved.status),
            result_code: resolved.result_code,
            result_desc: resolved.result_desc,
            message: resolved.message,
        }
    }
}
