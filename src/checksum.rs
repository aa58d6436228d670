//! Document and metadata checksummers
//!
//! Checksums are opaque strings compared for equality between runs to tell
//! new, modified and unmodified documents apart.

use crate::pipeline::{Document, Metadata};
use sha2::{Digest, Sha256};

/// Creates a checksum of a document's content
pub trait DocumentChecksummer: Send + Sync {
    /// Returns `None` when no checksum can be derived for this document
    fn create_document_checksum(&self, document: &Document) -> anyhow::Result<Option<String>>;
}

/// Creates a checksum of a document's metadata
pub trait MetadataChecksummer: Send + Sync {
    fn create_metadata_checksum(&self, metadata: &Metadata) -> anyhow::Result<Option<String>>;
}

/// SHA-256 of the document content, hex encoded
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256DocumentChecksummer;

impl DocumentChecksummer for Sha256DocumentChecksummer {
    fn create_document_checksum(&self, document: &Document) -> anyhow::Result<Option<String>> {
        Ok(Some(hex::encode(Sha256::digest(&document.content))))
    }
}

/// SHA-256 over selected metadata fields
///
/// Fields are hashed in the configured order as `name=value` lines; a field
/// with several values contributes one line per value. Yields no checksum
/// when none of the fields is present.
#[derive(Debug, Clone, Default)]
pub struct FieldsMetadataChecksummer {
    fields: Vec<String>,
}

impl FieldsMetadataChecksummer {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl MetadataChecksummer for FieldsMetadataChecksummer {
    fn create_metadata_checksum(&self, metadata: &Metadata) -> anyhow::Result<Option<String>> {
        let mut hasher = Sha256::new();
        let mut found = false;

        for field in &self.fields {
            for value in metadata.get_all(field) {
                hasher.update(field.as_bytes());
                hasher.update(b"=");
                hasher.update(value.as_bytes());
                hasher.update(b"\n");
                found = true;
            }
        }

        if !found {
            return Ok(None);
        }
        Ok(Some(hex::encode(hasher.finalize())))
    }
}
