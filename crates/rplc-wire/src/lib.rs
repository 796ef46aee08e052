//! # rplc-wire: Worker and ingest wire protocol
//!
//! Every message on the wire is a 4-byte big-endian length prefix followed
//! by a `serde_json`-encoded body (spec.md §1 places byte-level
//! serialization out of scope and assumes "length-prefixed typed
//! messages"; JSON-over-length-prefix is the concrete choice documented in
//! `SPEC_FULL.md` §6). [`Frame`] implements that envelope; [`envelope`] and
//! [`ingest`] define the typed bodies carried inside it.

mod envelope;
mod frame;
pub mod ingest;

pub use envelope::{
    ManagementType, QueuedType, RequestBody, RequestHeader, RequestKind, RequestMessage, Response,
    ResponseStatus, ResponseStatusExt,
};
pub use frame::{Frame, FrameError, FRAME_HEADER_SIZE};
