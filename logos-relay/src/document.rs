//! Document state capability.
//!
//! The relay never interprets update bytes. It only needs a document that
//! can absorb an update, encode itself, and compute a diff against a peer's
//! state vector. [`YrsDocument`] is the production implementation; tests can
//! plug in anything implementing [`DocumentState`].
//!
//! Updates use the Yrs v1 encoding (the same bytes a `y-websocket` client
//! produces with `Y.encodeStateAsUpdate`). Client bytes are structurally
//! checked against the v1 layout before Yrs decodes them.

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::{ReadTxn, StateVector, Transact, Update};

use crate::validate;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Malformed update: {0}")]
    Malformed(String),
    #[error("Malformed state vector: {0}")]
    MalformedStateVector(String),
    #[error("Failed to create document: {0}")]
    Create(String),
}

/// Mergeable document state owned by a room.
///
/// `apply` must be idempotent: the same update applied twice leaves the
/// document as if it had been applied once.
pub trait DocumentState: Send + Sync {
    /// Merge an update blob into the document.
    fn apply(&mut self, update: &[u8]) -> Result<(), DocumentError>;

    /// Encode the whole document as a single update.
    fn encode_full(&self) -> Vec<u8>;

    /// Encode everything the holder of `state_vector` is missing.
    fn encode_delta(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocumentError>;

    /// True when nothing has been applied yet.
    fn is_empty(&self) -> bool;
}

/// Creates the document for a room on first join.
pub trait DocumentFactory: Send + Sync {
    fn create(&self, room: &str) -> Result<Box<dyn DocumentState>, DocumentError>;
}

/// Yrs-backed document.
pub struct YrsDocument {
    doc: yrs::Doc,
}

impl Default for YrsDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl YrsDocument {
    pub fn new() -> Self {
        Self {
            doc: yrs::Doc::new(),
        }
    }

    /// Access the underlying Yrs document.
    pub fn doc(&self) -> &yrs::Doc {
        &self.doc
    }
}

impl DocumentState for YrsDocument {
    fn apply(&mut self, update: &[u8]) -> Result<(), DocumentError> {
        validate::check_update(update).map_err(|e| DocumentError::Malformed(e.to_string()))?;
        let update =
            Update::decode_v1(update).map_err(|e| DocumentError::Malformed(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Malformed(e.to_string()))
    }

    fn encode_full(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    fn encode_delta(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let remote = validate::check_state_vector(state_vector)
            .and_then(|()| StateVector::decode_v1(state_vector))
            .map_err(|e| DocumentError::MalformedStateVector(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&remote))
    }

    fn is_empty(&self) -> bool {
        let txn = self.doc.transact();
        txn.state_vector().is_empty()
    }
}

/// Factory producing fresh [`YrsDocument`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct YrsFactory;

impl DocumentFactory for YrsFactory {
    fn create(&self, _room: &str) -> Result<Box<dyn DocumentState>, DocumentError> {
        Ok(Box::new(YrsDocument::new()))
    }
}
