pub mod payment_backend;
pub mod payment_poller;
