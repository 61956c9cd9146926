//! Identifier generation
//!
//! Job ids are UUIDv4-based and unique even for bursts of submissions from
//! the same user.

use uuid::Uuid;

/// Prefix carried by every training job id
pub const JOB_ID_PREFIX: &str = "train_";

/// Generate a new training job id (`train_<32 hex digits>`)
pub fn generate_job_id() -> String {
    format!("{}{}", JOB_ID_PREFIX, Uuid::new_v4().simple())
}

/// Generate a unique stem for stored files
pub fn generate_file_stem() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_job_id_has_prefix() {
        let id = generate_job_id();
        assert!(id.starts_with(JOB_ID_PREFIX));
        assert_eq!(id.len(), JOB_ID_PREFIX.len() + 32);
    }

    #[test]
    fn test_job_ids_unique_under_burst() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_job_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_file_stem_is_path_safe() {
        let stem = generate_file_stem();
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
