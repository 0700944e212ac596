pub mod mpesa;

pub use mpesa::MpesaProvider;
