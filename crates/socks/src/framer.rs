//! Incremental accumulation of handshake bytes.
//!
//! A byte stream may split a handshake message across any number of reads,
//! or deliver the start of the next message together with the current one.
//! [`Framer`] buffers what has arrived and hands out whole frames only.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::Result;

/// A protocol unit whose length can be discovered from a prefix of itself.
pub trait Decode: Sized {
    /// Inspects the buffered bytes. Returns `Ok(None)` if more input is
    /// needed, or the frame together with the number of bytes it occupies.
    ///
    /// Malformed fixed fields must be reported as soon as the prefix that
    /// contains them is available.
    fn decode(src: &[u8]) -> Result<Option<(Self, usize)>>;
}

#[derive(Debug, Default)]
pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extracts the next frame if it is fully buffered. Nothing is consumed
    /// when more bytes are needed or the prefix is malformed.
    pub fn try_extract<T: Decode>(&mut self) -> Result<Option<T>> {
        match T::decode(&self.buf)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Takes every remaining byte, leaving the framer empty.
    pub fn take_remaining(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
