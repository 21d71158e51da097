pub mod events;
pub mod payments;
pub mod refunds;
pub mod registry;
pub mod routing;
pub mod webhooks;
pub mod worker;
