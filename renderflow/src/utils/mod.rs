//! Shared utilities: timestamps, identifier generation, and fingerprints.

pub mod fingerprint;
pub mod ids;
pub mod timestamps;

pub use fingerprint::fingerprint;
pub use ids::{generate_id, generate_job_token};
pub use timestamps::{iso_timestamp, now, seconds_between, Timestamp};
