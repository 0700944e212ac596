use crate::payments::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Credentials attached to an outbound Daraja call.
pub enum RequestAuth<'a> {
    Basic { username: &'a str, password: &'a str },
    Bearer(&'a str),
}

/// Raw provider answer; callers decide what a non-2xx status means.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub status: u16,
    pub body: String,
}

impl ProviderReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> PaymentResult<T> {
        serde_json::from_str::<T>(&self.body).map_err(|e| PaymentError::UpstreamUnavailable {
            message: format!("invalid provider JSON response (HTTP {}): {}", self.status, e),
        })
    }
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Option<Duration>,
    max_retries: u32,
}

impl PaymentHttpClient {
    /// Without `timeout`, requests run under reqwest's defaults (no overall deadline).
    pub fn new(timeout: Option<Duration>, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder().build().map_err(|e| {
            PaymentError::UpstreamUnavailable {
                message: format!("failed to initialize HTTP client: {}", e),
            }
        })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Send a request, retrying transport errors, 429 and 5xx up to `max_retries` times.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: &RequestAuth<'_>,
        body: Option<&B>,
    ) -> PaymentResult<ProviderReply> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), url);
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }
            request = match auth {
                RequestAuth::Basic { username, password } => {
                    request.basic_auth(username, Some(password))
                }
                RequestAuth::Bearer(token) => request.bearer_auth(token),
            };
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let retry_left = attempt < self.max_retries;
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && retry_left {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "provider error, retrying"
                        );
                    } else {
                        return Ok(ProviderReply {
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                }
                Err(e) => {
                    if !retry_left {
                        return Err(PaymentError::UpstreamUnavailable {
                            message: format!("provider request failed: {}", e),
                        });
                    }
                    warn!(attempt = attempt + 1, error = %e, "provider request failed, retrying");
                }
            }

            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            attempt += 1;
        }
    }
}

/// `07XXXXXXXX` becomes `2547XXXXXXXX`; anything else is passed through trimmed.
pub fn normalize_phone_number(phone: &str) -> String {
    let phone = phone.trim();
    match phone.strip_prefix('0') {
        Some(rest) => format!("254{}", rest),
        None => phone.to_string(),
    }
}

/// Daraja request timestamp, `YYYYMMDDHHMMSS` in local time.
pub fn daraja_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// STK password: base64(shortcode + passkey + timestamp).
pub fn generate_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_base64_of_concatenation() {
        let password = generate_password("174379", "passkey", "20240101120000");
        let decoded = STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }

    #[test]
    fn timestamp_has_fourteen_digits() {
        let ts = daraja_timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone_number("0712345678"), "254712345678");
        assert_eq!(normalize_phone_number("254712345678"), "254712345678");
        assert_eq!(normalize_phone_number(" 0712345678 "), "254712345678");
    }

    #[test]
    fn reply_json_errors_are_upstream_unavailable() {
        let reply = ProviderReply {
            status: 200,
            body: "<html>".to_string(),
        };
        let result: PaymentResult<serde_json::Value> = reply.json();
        assert!(matches!(
            result,
            Err(PaymentError::UpstreamUnavailable { .. })
        ));
    }
}
