//! Data models for the permits backend.
//!
//! Field names serialize in camelCase to match the frontend contract.

mod report;
mod request;
mod user;

pub use report::*;
pub use request::*;
pub use user::*;
