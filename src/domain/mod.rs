// Pickup decision logic: which queued job a polling worker gets, given
// per-type concurrency limits, request filters and the configured ordering.
// Everything here is pure except the store contract in `repository`.

pub mod concurrency;
pub mod entity;
pub mod filter;
pub mod load_balance;
pub mod repository;
pub mod request;
