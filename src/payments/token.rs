//! OAuth client-credentials exchange for Daraja.
//!
//! A fresh token is fetched per call; nothing is cached.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::MpesaConfig;
use crate::middleware::logging::log_external_call;
use crate::payments::error::{
    PaymentError, PaymentResult, SETTING_CONSUMER_KEY, SETTING_CONSUMER_SECRET,
};
use crate::payments::utils::{PaymentHttpClient, RequestAuth};

const OAUTH_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Clone)]
pub struct AccessTokenProvider {
    base_url: String,
    consumer_key: Option<String>,
    consumer_secret: Option<String>,
    http: PaymentHttpClient,
}

impl AccessTokenProvider {
    pub fn new(config: &MpesaConfig, http: PaymentHttpClient) -> Self {
        Self {
            base_url: config.base_url.clone(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            http,
        }
    }

    pub async fn fetch_token(&self) -> PaymentResult<String> {
        let key = self
            .consumer_key
            .as_deref()
            .ok_or_else(|| PaymentError::missing_setting(SETTING_CONSUMER_KEY))?;
        let secret = self
            .consumer_secret
            .as_deref()
            .ok_or_else(|| PaymentError::missing_setting(SETTING_CONSUMER_SECRET))?;

        let url = format!("{}{}", self.base_url, OAUTH_PATH);
        let auth = RequestAuth::Basic {
            username: key,
            password: secret,
        };
        let reply = log_external_call(
            "M-Pesa",
            "oauth/v1/generate",
            self.http.send(reqwest::Method::GET, &url, &auth, None::<&()>),
        )
        .await?;

        if !reply.is_success() {
            warn!(status = reply.status, "M-Pesa OAuth request rejected");
            let message = serde_json::from_str::<OAuthResponse>(&reply.body)
                .ok()
                .and_then(|r| r.error_message)
                .unwrap_or_else(|| format!("token request failed with HTTP {}", reply.status));
            return Err(PaymentError::UpstreamAuthError {
                message,
                http_status: Some(reply.status),
            });
        }

        let token = reply
            .json::<OAuthResponse>()
            .ok()
            .and_then(|r| r.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaymentError::UpstreamAuthError {
                message: "token response did not contain an access_token".to_string(),
                http_status: Some(reply.status),
            })?;

        debug!("M-Pesa access token obtained");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MpesaEnvironment, DEFAULT_ACCOUNT_REFERENCE};
    use std::time::Duration;

    #[tokio::test]
    async fn missing_consumer_key_is_configuration_error() {
        let config = MpesaConfig {
            environment: MpesaEnvironment::Sandbox,
            // Unroutable; the request must never be sent.
            base_url: "http://127.0.0.1:9".to_string(),
            consumer_key: None,
            consumer_secret: Some("secret".to_string()),
            business_shortcode: None,
            passkey: None,
            callback_url: "http://127.0.0.1/api/mpesa/callback".to_string(),
            account_reference: DEFAULT_ACCOUNT_REFERENCE.to_string(),
            timeout_secs: Some(1),
            max_retries: 0,
        };
        let http = PaymentHttpClient::new(Some(Duration::from_secs(1)), 0).unwrap();
        let provider = AccessTokenProvider::new(&config, http);

        let err = provider.fetch_token().await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::ConfigurationError { ref setting, .. } if setting == SETTING_CONSUMER_KEY
        ));
    }
}
