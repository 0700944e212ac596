pub mod error;
pub mod provider;
pub mod providers;
pub mod token;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::MpesaGateway;
pub use providers::MpesaProvider;
