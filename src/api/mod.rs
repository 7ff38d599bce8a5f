/// Admin API client and response envelope handling
pub mod client;
pub mod envelope;

pub use client::{StreamSource, VtadminClient};
