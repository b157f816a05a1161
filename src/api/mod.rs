pub mod nats;
pub mod service;
