pub mod callback_receiver;
pub mod payment_flow;
pub mod payment_initiator;
pub mod status_resolver;
