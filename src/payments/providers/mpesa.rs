use crate::config::MpesaConfig;
use crate::middleware::logging::log_external_call;
use crate::payments::error::{
    PaymentError, PaymentResult, SETTING_PASSKEY, SETTING_SHORTCODE,
};
use crate::payments::provider::MpesaGateway;
use crate::payments::token::AccessTokenProvider;
use crate::payments::types::{
    CheckoutIds, StkPushCommand, StkPushRequest, StkPushResponse, StkQueryOutcome,
    StkQueryRequest, StkQueryResponse, RESPONSE_CODE_ACCEPTED, TRANSACTION_TYPE_PAYBILL,
};
use crate::payments::utils::{daraja_timestamp, generate_password, PaymentHttpClient, RequestAuth};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const STK_QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";

/// Signed request material shared by push and query.
struct Signature {
    shortcode: String,
    password: String,
    timestamp: String,
}

/// Daraja (Lipa na M-Pesa Online) client
pub struct MpesaProvider {
    base_url: String,
    business_shortcode: Option<String>,
    passkey: Option<String>,
    tokens: AccessTokenProvider,
    http: PaymentHttpClient,
}

impl MpesaProvider {
    pub fn new(config: &MpesaConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            config.timeout_secs.map(Duration::from_secs),
            config.max_retries,
        )?;
        Ok(Self {
            base_url: config.base_url.clone(),
            business_shortcode: config.business_shortcode.clone(),
            passkey: config.passkey.clone(),
            tokens: AccessTokenProvider::new(config, http.clone()),
            http,
        })
    }

    fn sign(&self) -> PaymentResult<Signature> {
        let shortcode = self
            .business_shortcode
            .clone()
            .ok_or_else(|| PaymentError::missing_setting(SETTING_SHORTCODE))?;
        let passkey = self
            .passkey
            .as_deref()
            .ok_or_else(|| PaymentError::missing_setting(SETTING_PASSKEY))?;

        let timestamp = daraja_timestamp();
        Ok(Signature {
            password: generate_password(&shortcode, passkey, &timestamp),
            shortcode,
            timestamp,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// Daraja error bodies look like {"requestId": "...", "errorCode": "...", "errorMessage": "..."}.
fn rejected_or_unavailable(
    status: u16,
    error_code: Option<String>,
    error_message: Option<String>,
) -> PaymentError {
    match error_message {
        Some(message) => PaymentError::UpstreamRejected {
            message,
            provider_code: error_code,
        },
        None => PaymentError::UpstreamUnavailable {
            message: format!("M-Pesa returned HTTP {}", status),
        },
    }
}

#[async_trait]
impl MpesaGateway for MpesaProvider {
    async fn initiate_stk_push(&self, command: StkPushCommand) -> PaymentResult<CheckoutIds> {
        // Business credentials are checked before any network call.
        let signature = self.sign()?;
        let token = self.tokens.fetch_token().await?;

        let request = StkPushRequest {
            business_short_code: signature.shortcode.clone(),
            password: signature.password,
            timestamp: signature.timestamp,
            transaction_type: TRANSACTION_TYPE_PAYBILL.to_string(),
            amount: command.amount,
            party_a: command.phone_number.clone(),
            party_b: signature.shortcode,
            phone_number: command.phone_number,
            callback_url: command.callback_url,
            account_reference: command.account_reference,
            transaction_desc: command.transaction_desc,
        };

        let url = self.url(STK_PUSH_PATH);
        let reply = log_external_call(
            "M-Pesa",
            STK_PUSH_PATH,
            self.http.send(
                reqwest::Method::POST,
                &url,
                &RequestAuth::Bearer(&token),
                Some(&request),
            ),
        )
        .await?;

        if !reply.is_success() {
            let body = reply.json::<StkPushResponse>().unwrap_or_default();
            warn!(
                status = reply.status,
                error_code = ?body.error_code,
                "STK push rejected by M-Pesa"
            );
            return Err(rejected_or_unavailable(
                reply.status,
                body.error_code,
                body.error_message,
            ));
        }

        let body: StkPushResponse = reply.json()?;
        if body.response_code.as_deref() != Some(RESPONSE_CODE_ACCEPTED) {
            return Err(PaymentError::UpstreamRejected {
                message: body
                    .error_message
                    .or(body.response_description)
                    .or(body.customer_message)
                    .unwrap_or_else(|| "Failed to initiate payment".to_string()),
                provider_code: body.response_code.or(body.error_code),
            });
        }

        let checkout_request_id = body
            .checkout_request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PaymentError::UpstreamUnavailable {
                message: "accepted STK push without a CheckoutRequestID".to_string(),
            })?;

        info!(
            checkout_request_id = %checkout_request_id,
            "STK push accepted"
        );

        Ok(CheckoutIds {
            checkout_request_id,
            merchant_request_id: body.merchant_request_id.unwrap_or_default(),
            customer_message: body.customer_message,
        })
    }

    async fn query_stk_status(&self, checkout_request_id: &str) -> PaymentResult<StkQueryOutcome> {
        let signature = self.sign()?;
        let token = self.tokens.fetch_token().await?;

        let request = StkQueryRequest {
            business_short_code: signature.shortcode,
            password: signature.password,
            timestamp: signature.timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let url = self.url(STK_QUERY_PATH);
        let reply = log_external_call(
            "M-Pesa",
            STK_QUERY_PATH,
            self.http.send(
                reqwest::Method::POST,
                &url,
                &RequestAuth::Bearer(&token),
                Some(&request),
            ),
        )
        .await?;

        if !reply.is_success() {
            // "The transaction is being processed" arrives here as a 500 with errorMessage.
            let body = reply.json::<StkQueryResponse>().unwrap_or_default();
            return Err(rejected_or_unavailable(
                reply.status,
                body.error_code,
                body.error_message,
            ));
        }

        let body: StkQueryResponse = reply.json()?;
        Ok(StkQueryOutcome::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MpesaEnvironment, DEFAULT_ACCOUNT_REFERENCE};

    fn config(shortcode: Option<&str>, passkey: Option<&str>) -> MpesaConfig {
        MpesaConfig {
            environment: MpesaEnvironment::Sandbox,
            base_url: "http://127.0.0.1:9".to_string(),
            consumer_key: Some("key".to_string()),
            consumer_secret: Some("secret".to_string()),
            business_shortcode: shortcode.map(str::to_string),
            passkey: passkey.map(str::to_string),
            callback_url: "http://127.0.0.1/api/mpesa/callback".to_string(),
            account_reference: DEFAULT_ACCOUNT_REFERENCE.to_string(),
            timeout_secs: Some(1),
            max_retries: 0,
        }
    }

    fn command() -> StkPushCommand {
        StkPushCommand {
            phone_number: "254712345678".to_string(),
            amount: 99,
            account_reference: DEFAULT_ACCOUNT_REFERENCE.to_string(),
            transaction_desc: DEFAULT_ACCOUNT_REFERENCE.to_string(),
            callback_url: "http://127.0.0.1/api/mpesa/callback".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_passkey_fails_before_network() {
        let provider = MpesaProvider::new(&config(Some("174379"), None)).unwrap();
        let err = provider.initiate_stk_push(command()).await.unwrap_err();
        assert!(err.is_missing_business_credentials());
        assert_eq!(err.http_status_code(), 500);
    }

    #[tokio::test]
    async fn missing_shortcode_fails_query() {
        let provider = MpesaProvider::new(&config(None, Some("passkey"))).unwrap();
        let err = provider.query_stk_status("ws_CO_123").await.unwrap_err();
        assert!(err.is_missing_business_credentials());
    }

    #[test]
    fn error_body_with_message_is_rejection() {
        let err = rejected_or_unavailable(
            400,
            Some("400.002.02".to_string()),
            Some("Bad Request - Invalid PhoneNumber".to_string()),
        );
        assert!(matches!(err, PaymentError::UpstreamRejected { .. }));
        assert_eq!(err.user_message(), "Bad Request - Invalid PhoneNumber");

        let err = rejected_or_unavailable(503, None, None);
        assert!(matches!(err, PaymentError::UpstreamUnavailable { .. }));
    }
}
