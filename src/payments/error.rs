use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

pub const SETTING_CONSUMER_KEY: &str = "MPESA_CONSUMER_KEY";
pub const SETTING_CONSUMER_SECRET: &str = "MPESA_CONSUMER_SECRET";
pub const SETTING_SHORTCODE: &str = "MPESA_BUSINESS_SHORTCODE";
pub const SETTING_PASSKEY: &str = "MPESA_PASSKEY";

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// A required secret or setting is absent.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String, setting: String },

    /// The OAuth exchange was refused by the provider.
    #[error("Upstream auth error: {message}")]
    UpstreamAuthError {
        message: String,
        http_status: Option<u16>,
    },

    /// The provider answered but declined the request.
    #[error("Upstream rejected request: {message}")]
    UpstreamRejected {
        message: String,
        provider_code: Option<String>,
    },

    /// Transport failure, unexpected HTTP status or unreadable body.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },
}

impl PaymentError {
    pub fn missing_setting(setting: &str) -> Self {
        PaymentError::ConfigurationError {
            message: format!("{} is not configured", setting),
            setting: setting.to_string(),
        }
    }

    /// Shortcode or passkey missing: no request to the provider can be signed.
    pub fn is_missing_business_credentials(&self) -> bool {
        matches!(
            self,
            PaymentError::ConfigurationError { setting, .. }
                if setting == SETTING_SHORTCODE || setting == SETTING_PASSKEY
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::UpstreamAuthError { .. } => true,
            PaymentError::UpstreamRejected { .. } => false,
            PaymentError::UpstreamUnavailable { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::UpstreamAuthError { .. } => 502,
            PaymentError::UpstreamRejected { .. } => 400,
            PaymentError::UpstreamUnavailable { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ConfigurationError { .. } => "M-Pesa not configured".to_string(),
            PaymentError::UpstreamAuthError { .. } => {
                "Failed to get M-Pesa access token".to_string()
            }
            // The provider's own wording is meant for the payer.
            PaymentError::UpstreamRejected { message, .. } => message.clone(),
            PaymentError::UpstreamUnavailable { .. } => {
                "M-Pesa is temporarily unavailable. Please try again".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{
            AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError,
        };

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::ConfigurationError { message, .. } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            PaymentError::UpstreamRejected {
                message,
                provider_code,
            } => AppErrorKind::External(ExternalError::PaymentRejected {
                provider: "mpesa".to_string(),
                message,
                provider_code,
            }),
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "mpesa".to_string(),
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::missing_setting(SETTING_PASSKEY).http_status_code(),
            500
        );
        assert_eq!(
            PaymentError::UpstreamRejected {
                message: "Invalid PhoneNumber".to_string(),
                provider_code: Some("400.002.02".to_string())
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::UpstreamUnavailable {
                message: "timeout".to_string()
            }
            .http_status_code(),
            502
        );
    }

    #[test]
    fn business_credentials_are_told_apart_from_oauth_credentials() {
        assert!(PaymentError::missing_setting(SETTING_SHORTCODE).is_missing_business_credentials());
        assert!(PaymentError::missing_setting(SETTING_PASSKEY).is_missing_business_credentials());
        assert!(
            !PaymentError::missing_setting(SETTING_CONSUMER_KEY).is_missing_business_credentials()
        );
    }

    #[test]
    fn rejected_message_is_surfaced_to_user() {
        let err = PaymentError::UpstreamRejected {
            message: "Invalid PhoneNumber".to_string(),
            provider_code: None,
        };
        assert_eq!(err.user_message(), "Invalid PhoneNumber");
        assert!(!err.is_retryable());
    }

    #[test]
    fn converts_into_app_error() {
        let app: crate::error::AppError = PaymentError::missing_setting(SETTING_SHORTCODE).into();
        assert_eq!(app.status_code(), 500);

        let app: crate::error::AppError = PaymentError::UpstreamUnavailable {
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(app.status_code(), 502);
        assert!(app.is_retryable());

        let app: crate::error::AppError = PaymentError::UpstreamRejected {
            message: "Invalid PhoneNumber".to_string(),
            provider_code: Some("400.002.02".to_string()),
        }
        .into();
        assert_eq!(app.status_code(), 400);
        assert_eq!(app.user_message(), "Invalid PhoneNumber");
    }
}
