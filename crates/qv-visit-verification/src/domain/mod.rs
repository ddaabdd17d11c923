//! # Domain Layer
//!
//! Pure visit-verification logic with no I/O dependencies.
//!
//! - `entities`: QrToken, ReplayRecord, VisitRecord and their state enums
//! - `codec`: wire format and digest computation
//! - `outcomes`: scan outcomes, consume results, drain reports
//! - `errors`: error enumerations

pub mod codec;
pub mod entities;
pub mod errors;
pub mod outcomes;

pub use codec::*;
pub use entities::*;
pub use errors::*;
pub use outcomes::*;
