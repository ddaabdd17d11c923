//! # Ports Layer
//!
//! Trait definitions for the hexagonal architecture.
//! - **Inbound (Driving)**: API the admin/customer screens call
//! - **Outbound (Driven)**: storage, clock and remote authority

pub mod inbound;
pub mod outbound;

pub use inbound::VisitVerificationApi;
pub use outbound::{
    BatchOperation, KeyValueStore, RemoteError, RemoteVisitGateway, SubmissionReceipt,
    SystemTimeSource, TimeSource, VisitSubmission,
};
