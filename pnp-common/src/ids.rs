//! Deterministic record identifiers
//!
//! Record IDs are derived from `(source, source-id)` by hashing, so two
//! deliveries of the same upstream record always land on the same row. This
//! is how idempotence is achieved under at-least-once delivery.

use sha2::{Digest, Sha256};

/// Compute the record ID for a `(source, source-id)` pair.
///
/// Lowercase hex SHA-256 of the concatenation `source || source-id`.
/// Deterministic and stable across restarts.
pub fn record_id(source: &str, source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(source_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_is_deterministic() {
        let a = record_id("servicenow", "INC0012345");
        let b = record_id("servicenow", "INC0012345");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn record_id_distinguishes_sources() {
        assert_ne!(
            record_id("servicenow", "INC0012345"),
            record_id("doctor", "INC0012345")
        );
        assert_ne!(
            record_id("servicenow", "INC0012345"),
            record_id("servicenow", "INC0012346")
        );
    }
}
