//! # rplc-request: Client-side Request state machine (spec.md §4.2)
//!
//! A [`Request`] drives exactly one worker operation end to end: it builds
//! the wire message, hands it to [`rplc_messenger::Messenger`], and
//! interprets the reply via [`Request::analyze`]. Requests live in an
//! arena map keyed by [`rplc_types::RequestId`] owned by whichever `Job`
//! launched them (spec.md §9) rather than holding a reference back to
//! their owner.

mod error;
mod operation;
mod request;
mod state;

pub use error::RequestError;
pub use operation::{Operation, RequestResult};
pub use request::Request;
pub use state::{ExtendedState, PrimaryState};
