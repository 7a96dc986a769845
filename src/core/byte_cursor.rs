//! Fragment-aware byte cursor
//!
//! Socket reads arrive in arbitrary pieces. The cursor lets a decoder ask for
//! "exactly N bytes" against the current read and answers either with the
//! bytes or with [`NeedMore`]. Bytes that cannot satisfy a request yet are
//! parked as owned fragments until the next read completes the span.
//!
//! Ownership of a successful `take` is explicit in [`Taken`]:
//! - `Borrowed`: a view straight into the current read (zero-copy, no allocation)
//! - `Owned`: fragments concatenated with the head of the current read
//!
//! ```text
//!  fragments (oldest first)          current read
//! ┌──────┐┌────────┐      ┌───────────────────────────┐
//! │ 3 B  ││  5 B   │  ++  │ consumed │   available    │
//! └──────┘└────────┘      └───────────────────────────┘
//!        pending_bytes = 8          ^ pos
//! ```

use std::collections::VecDeque;
use std::ops::Deref;

use bytes::{Bytes, BytesMut};

/// Not enough bytes buffered yet; retry after the next readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedMore;

/// Result of a successful [`Feed::take`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Taken<'a> {
    /// Slice of the current read, nothing was copied
    Borrowed(&'a [u8]),
    /// Buffer assembled from parked fragments
    Owned(Bytes),
}

impl Taken<'_> {
    #[inline(always)]
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Taken::Borrowed(_))
    }

    /// Convert to an owned buffer, copying only if the bytes are borrowed.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Taken::Borrowed(slice) => Bytes::copy_from_slice(slice),
            Taken::Owned(bytes) => bytes,
        }
    }
}

impl Deref for Taken<'_> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        match self {
            Taken::Borrowed(slice) => slice,
            Taken::Owned(bytes) => bytes,
        }
    }
}

/// Per-connection store of bytes received but not yet consumed.
///
/// Invariant: `pending_bytes == fragments.iter().map(Bytes::len).sum()`.
#[derive(Debug, Default)]
pub struct ByteCursor {
    fragments: VecDeque<Bytes>,
    pending_bytes: usize,
}

impl ByteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start consuming a fresh read.
    ///
    /// Whatever is left unconsumed in `data` when the returned [`Feed`] is
    /// dropped is parked as a fragment, so pipelined bytes survive until the
    /// next message is decoded.
    #[inline(always)]
    pub fn feed<'c, 'a>(&'c mut self, data: &'a [u8]) -> Feed<'c, 'a> {
        Feed {
            cursor: self,
            data,
            pos: 0,
        }
    }

    /// Total length of the parked fragments.
    #[inline(always)]
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    #[inline(always)]
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Drop every parked fragment.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.pending_bytes = 0;
    }

    fn park(&mut self, fragment: Bytes) {
        self.pending_bytes += fragment.len();
        self.fragments.push_back(fragment);
    }

    fn pop_front(&mut self) -> Option<Bytes> {
        let fragment = self.fragments.pop_front()?;
        self.pending_bytes -= fragment.len();
        Some(fragment)
    }

    fn push_front(&mut self, fragment: Bytes) {
        self.pending_bytes += fragment.len();
        self.fragments.push_front(fragment);
    }
}

/// View of one read event's bytes on top of a [`ByteCursor`].
pub struct Feed<'c, 'a> {
    cursor: &'c mut ByteCursor,
    data: &'a [u8],
    pos: usize,
}

impl<'c, 'a> Feed<'c, 'a> {
    /// Unconsumed bytes of the current read.
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes of the current read handed out so far.
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Parked plus available bytes.
    #[inline(always)]
    pub fn buffered(&self) -> usize {
        self.cursor.pending_bytes + self.available()
    }

    /// Take exactly `n` bytes or report [`NeedMore`].
    ///
    /// On `NeedMore` the unconsumed part of the current read is parked, so
    /// the caller must retry the same request once more bytes arrive.
    #[inline]
    pub fn take(&mut self, n: usize) -> Result<Taken<'a>, NeedMore> {
        let avail = self.available();

        if self.cursor.is_empty() {
            if avail >= n {
                // Fast path: no fragments, the whole span sits in this read
                let start = self.pos;
                self.pos += n;
                return Ok(Taken::Borrowed(&self.data[start..self.pos]));
            }
            self.park_rest();
            return Err(NeedMore);
        }

        if self.cursor.pending_bytes + avail < n {
            self.park_rest();
            return Err(NeedMore);
        }

        Ok(Taken::Owned(self.concat(n)))
    }

    /// Assemble `n` bytes from the fragments (oldest first), then the current read.
    ///
    /// Each fragment is released as soon as it is copied. A fragment is split
    /// only when it holds bytes past the request, which happens for pipelined
    /// data parked behind a finished message.
    fn concat(&mut self, n: usize) -> Bytes {
        if let Some(front) = self.cursor.fragments.front() {
            if front.len() >= n {
                if let Some(mut fragment) = self.cursor.pop_front() {
                    let head = fragment.split_to(n);
                    if !fragment.is_empty() {
                        self.cursor.push_front(fragment);
                    }
                    return head;
                }
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(mut fragment) = self.cursor.pop_front() else {
                break;
            };
            let want = n - out.len();
            if fragment.len() > want {
                let rest = fragment.split_off(want);
                self.cursor.push_front(rest);
            }
            out.extend_from_slice(&fragment);
        }

        let from_read = n - out.len();
        out.extend_from_slice(&self.data[self.pos..self.pos + from_read]);
        self.pos += from_read;

        out.freeze()
    }

    fn park_rest(&mut self) {
        if self.pos < self.data.len() {
            let rest = Bytes::copy_from_slice(&self.data[self.pos..]);
            self.pos = self.data.len();
            self.cursor.park(rest);
        }
    }
}

impl Drop for Feed<'_, '_> {
    fn drop(&mut self) {
        self.park_rest();
    }
}
