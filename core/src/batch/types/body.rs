//! Operation body streams.
//!
//! A [`BodyStream`] hands out the bytes of exactly one operation. Streams
//! obtained from a reader are tied to the reader position through a shared
//! generation counter: once the reader steps past the operation, any further
//! read fails with [`BatchError::StreamDisposed`].

use crate::batch::error::{BatchError, Result};
use bytes::{Buf, Bytes};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ties a body to the reader step that produced it.
#[derive(Clone, Debug)]
pub(crate) struct BodyGuard {
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl BodyGuard {
    pub(crate) fn new(generation: Arc<AtomicU64>) -> Self {
        let issued = generation.load(Ordering::Acquire);
        Self { generation, issued }
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.issued
    }
}

/// Single-read view over one operation body.
#[derive(Debug)]
pub struct BodyStream {
    data: Bytes,
    guard: Option<BodyGuard>,
}

impl BodyStream {
    /// A detached stream, valid for as long as it is held.
    pub fn new(data: Bytes) -> Self {
        Self { data, guard: None }
    }

    pub(crate) fn guarded(data: Bytes, guard: BodyGuard) -> Self {
        Self {
            data,
            guard: Some(guard),
        }
    }

    /// Bytes not read yet.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    /// Takes the remaining bytes in one piece.
    pub fn read_to_bytes(&mut self) -> Result<Bytes> {
        self.check_live()?;
        Ok(self.data.split_off(0))
    }

    fn check_live(&self) -> Result<()> {
        match &self.guard {
            Some(guard) if !guard.is_live() => Err(BatchError::StreamDisposed),
            _ => Ok(()),
        }
    }
}

impl io::Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_live()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let n = buf.len().min(self.data.len());
        self.data.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(feature = "async")]
impl tokio::io::AsyncRead for BodyStream {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        if let Err(e) = self.check_live() {
            return std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)));
        }
        let n = buf.remaining().min(self.data.len());
        let chunk = self.data.split_to(n);
        buf.put_slice(&chunk);
        std::task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_detached_stream_reads_all() {
        let mut body = BodyStream::new(Bytes::from_static(b"hello"));
        let mut out = String::new();
        body.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn test_guarded_stream_is_disposed_after_advance() {
        let generation = Arc::new(AtomicU64::new(0));
        let mut body =
            BodyStream::guarded(Bytes::from_static(b"abc"), BodyGuard::new(generation.clone()));

        let mut buf = [0u8; 1];
        assert_eq!(body.read(&mut buf).unwrap(), 1);

        generation.fetch_add(1, Ordering::AcqRel);
        let err = body.read(&mut buf).unwrap_err();
        assert!(err.to_string().contains("disposed"));
        assert!(matches!(body.read_to_bytes(), Err(BatchError::StreamDisposed)));
    }

    #[test]
    fn test_read_to_bytes() {
        let mut body = BodyStream::new(Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(&body.read_to_bytes().unwrap()[..], b"{\"a\":1}");
        assert!(body.read_to_bytes().unwrap().is_empty());
    }
}
