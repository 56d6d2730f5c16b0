//! Attachment metadata. Blob bytes live in the attachments namespace and
//! are fetched separately; the record carries a sha256 digest so content
//! can be verified and deduplicated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    /// Hex-encoded SHA-256 of the content bytes.
    pub fn digest(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self, content: &[u8]) -> bool {
        Self::digest(content) == self.sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest() {
        // echo -n "hello world" | shasum -a 256
        assert_eq!(
            Attachment::digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_verify() {
        let att = Attachment {
            id: Uuid::new_v4(),
            intent_id: Uuid::new_v4(),
            filename: "report.txt".to_string(),
            content_type: "text/plain".to_string(),
            size: 11,
            sha256: Attachment::digest(b"hello world"),
            metadata: None,
            created_by: "agent-a".to_string(),
            created_at: Utc::now(),
        };
        assert!(att.verify(b"hello world"));
        assert!(!att.verify(b"tampered"));
    }
}
