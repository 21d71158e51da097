pub mod idempotency;
pub mod memory;
pub mod postgres;
pub mod rate_limit;
pub mod resilience;
pub mod store;
pub mod vault;
