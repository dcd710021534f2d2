//! Document history validation: hash links and owner signatures.

use crate::crypto::{AgentAddress, Digest};
use crate::error::ValidationError;
use crate::types::Document;

/// Check that `document` carries a valid signature from `owner`.
pub fn verify_document_signature(owner: &AgentAddress, document: &Document) -> bool {
    owner
        .public_key()
        .verify(document.content_hash.as_bytes(), &document.signature)
        .is_ok()
}

/// Validate a complete per-type document log, oldest first.
///
/// This performs:
/// - Version contiguity from 0
/// - Doc type uniformity
/// - `prev_hash` linkage (zero at version 0)
/// - Owner signature over each `content_hash`
///
/// The first violation found is returned.
pub fn validate_history(owner: &AgentAddress, documents: &[Document]) -> Result<(), ValidationError> {
    let Some(first) = documents.first() else {
        return Ok(());
    };
    let doc_type = first.doc_type;
    let mut prev = Digest::ZERO;

    for (expected, doc) in documents.iter().enumerate() {
        let expected = expected as u32;
        if doc.version != expected {
            return Err(ValidationError::VersionGap {
                expected,
                got: doc.version,
            });
        }
        if doc.doc_type != doc_type {
            return Err(ValidationError::MixedDocType {
                expected: doc_type,
                got: doc.doc_type,
                version: doc.version,
            });
        }
        if doc.prev_hash != prev {
            return Err(ValidationError::BrokenLink {
                version: doc.version,
            });
        }
        if !verify_document_signature(owner, doc) {
            return Err(ValidationError::SignatureFailed {
                version: doc.version,
            });
        }
        prev = doc.content_hash;
    }

    Ok(())
}
