//! # rplc-messenger: Worker transport (spec.md §4.1)
//!
//! A single non-blocking `mio` event loop, running on its own background
//! thread, multiplexes every outbound connection to every worker and every
//! in-flight request across them. [`Messenger`] is the public handle:
//! `Request`/`Job` layers call [`Messenger::send`] and get back a
//! `std::sync::mpsc::Receiver<Response>` to wait on, without blocking the
//! event loop thread itself.

mod backoff;
mod connection;
mod error;
mod messenger;
mod registry;

pub use backoff::{Backoff, RetryGate};
pub use error::MessengerError;
pub use messenger::Messenger;
