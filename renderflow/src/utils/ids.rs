//! Identifier generation for runs, work items, and job tokens.

use uuid::Uuid;

/// Generates a random UUIDv4 identifier string.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a job token for a stage lease.
///
/// Tokens are prefixed so they are recognizable in logs and audit trails.
#[must_use]
pub fn generate_job_token() -> String {
    format!("job:{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_job_token_prefix() {
        let token = generate_job_token();
        assert!(token.starts_with("job:"));
    }
}
