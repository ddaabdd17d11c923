//! Remote authority adapters.

pub mod http;

pub use http::{HttpVisitGateway, IDEMPOTENCY_HEADER};
