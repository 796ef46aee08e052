use std::collections::VecDeque;
use std::io::{self, Read, Write};

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Interest, Token};

use rplc_wire::Frame;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One outbound TCP connection to a worker, multiplexing many in-flight
/// requests (spec.md §4.1). Mirrors the read/write buffering discipline of
/// a non-blocking mio connection: temp-buffer reads, `WouldBlock`-driven
/// writes, frame decode on whatever has accumulated so far.
pub struct WorkerConnection {
    pub token: Token,
    pub stream: TcpStream,
    read_buf: BytesMut,
    write_queue: VecDeque<u8>,
    pub closing: bool,
}

impl WorkerConnection {
    pub fn new(token: Token, stream: TcpStream) -> Self {
        Self {
            token,
            stream,
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_queue: VecDeque::new(),
            closing: false,
        }
    }

    /// Enqueues a request for sending. Encoding happens eagerly so a slow
    /// or disconnected worker never blocks the caller's thread.
    pub fn enqueue<T: Serialize>(&mut self, body: &T) -> Result<(), rplc_wire::FrameError> {
        let bytes = Frame::encode(body)?;
        self.write_queue.extend(bytes);
        Ok(())
    }

    /// Enqueues an already-encoded frame, e.g. one built on the calling
    /// thread before handing it to the event loop.
    pub fn enqueue_raw(&mut self, bytes: Vec<u8>) {
        self.write_queue.extend(bytes);
    }

    /// Drains accumulated socket input into the read buffer. Returns
    /// `false` if the peer closed the connection.
    pub fn fill_read_buf(&mut self) -> io::Result<bool> {
        let mut temp = [0u8; 4096];
        loop {
            match self.stream.read(&mut temp) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&temp[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Flushes as much of the pending write queue as the socket accepts
    /// without blocking. Returns `true` once the queue is fully drained.
    pub fn drain_writes(&mut self) -> io::Result<bool> {
        while !self.write_queue.is_empty() {
            let chunk = self.write_queue.make_contiguous().to_vec();
            match self.stream.write(&chunk) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write to worker socket")),
                Ok(n) => {
                    self.write_queue.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Decodes every complete frame currently sitting in the read buffer.
    pub fn decode_ready<T: DeserializeOwned>(&mut self) -> Result<Vec<T>, rplc_wire::FrameError> {
        let mut out = Vec::new();
        loop {
            match Frame::try_decode::<T>(&self.read_buf)? {
                Some((value, consumed)) => {
                    let _ = self.read_buf.split_to(consumed);
                    out.push(value);
                }
                None => break,
            }
        }
        Ok(out)
    }

    pub fn interest(&self) -> Interest {
        if self.write_queue.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_queue.is_empty()
    }
}
