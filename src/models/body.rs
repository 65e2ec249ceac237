//! Request bodies.
//!
//! A body is either a fully buffered byte string, a blocking stream read on
//! demand, or an asynchronous stream of chunks. Streams are shared handles so
//! that a prepared request can be cloned for a redirect and still rewind the
//! same underlying reader.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

enum Source {
    Seekable(Box<dyn ReadSeek>),
    Reader {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

/// Blocking body stream.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Source>>,
}

impl BodyStream {
    /// A seekable source. Its remaining length is known and it can be rewound.
    pub fn seekable<T: Read + Seek + Send + 'static>(source: T) -> Self {
        Self::from_source(Source::Seekable(Box::new(source)))
    }

    /// A forward-only reader. `length` is the number of bytes it will yield, if known.
    pub fn reader<R: Read + Send + 'static>(reader: R, length: Option<u64>) -> Self {
        Self::from_source(Source::Reader {
            reader: Box::new(reader),
            length,
        })
    }

    fn from_source(source: Source) -> Self {
        BodyStream {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    /// Bytes left between the current position and the end, if determinable.
    pub fn remaining_len(&self) -> Option<u64> {
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *source {
            Source::Seekable(s) => {
                let current = s.stream_position().ok()?;
                let end = s.seek(SeekFrom::End(0)).ok()?;
                s.seek(SeekFrom::Start(current)).ok()?;
                Some(end.saturating_sub(current))
            }
            Source::Reader { length, .. } => *length,
        }
    }

    /// The current read position. `None` when the source cannot report one.
    pub fn position(&self) -> Option<io::Result<u64>> {
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *source {
            Source::Seekable(s) => Some(s.stream_position()),
            Source::Reader { .. } => None,
        }
    }

    /// Moves the read position back to `position`.
    pub fn rewind_to(&self, position: u64) -> io::Result<()> {
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *source {
            Source::Seekable(s) => s.seek(SeekFrom::Start(position)).map(|_| ()),
            Source::Reader { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream does not support seeking",
            )),
        }
    }

    /// Reads up to `buf.len()` bytes. Returns 0 at the end of the stream.
    pub fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *source {
            Source::Seekable(s) => s.read(buf),
            Source::Reader { reader, .. } => reader.read(buf),
        }
    }

    /// Reads until the end of the stream.
    pub fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut source = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *source {
            Source::Seekable(s) => s.read_to_end(&mut out)?,
            Source::Reader { reader, .. } => reader.read_to_end(&mut out)?,
        };
        Ok(out)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream").finish_non_exhaustive()
    }
}

/// Async body stream. Consumed once: the first taker gets the stream.
#[derive(Clone)]
pub struct AsyncBodyStream {
    inner: Arc<tokio::sync::Mutex<Option<BoxStream<'static, io::Result<Bytes>>>>>,
    length: Option<u64>,
}

impl AsyncBodyStream {
    pub fn new<S>(stream: S, length: Option<u64>) -> Self
    where
        S: futures::Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        AsyncBodyStream {
            inner: Arc::new(tokio::sync::Mutex::new(Some(stream.boxed()))),
            length,
        }
    }

    /// Builds a stream from an iterator of chunks.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::new(futures::stream::iter(chunks.into_iter().map(Ok)), None)
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Takes the stream out of the handle. Later calls return `None`.
    pub async fn take(&self) -> Option<BoxStream<'static, io::Result<Bytes>>> {
        self.inner.lock().await.take()
    }
}

impl fmt::Debug for AsyncBodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBodyStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// The body of a prepared request.
#[derive(Debug, Clone)]
pub enum Body {
    Bytes(Bytes),
    Stream(BodyStream),
    AsyncStream(AsyncBodyStream),
}

impl Body {
    /// Number of bytes the body will put on the wire, when determinable.
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Stream(s) => s.remaining_len(),
            Body::AsyncStream(s) => s.length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        !matches!(self, Body::Bytes(_))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(b))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Bytes(Bytes::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn seekable_stream_reports_remaining_length() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        cursor.set_position(6);
        let stream = BodyStream::seekable(cursor);

        assert_eq!(stream.remaining_len(), Some(5));
        assert_eq!(stream.position().unwrap().unwrap(), 6);
        assert_eq!(stream.read_to_end().unwrap(), b"world");

        stream.rewind_to(6).unwrap();
        assert_eq!(stream.read_to_end().unwrap(), b"world");
    }

    #[test]
    fn reader_cannot_rewind() {
        let stream = BodyStream::reader(&b"abc"[..], None);
        assert!(stream.position().is_none());
        assert!(stream.remaining_len().is_none());
        assert!(stream.rewind_to(0).is_err());
    }

    #[tokio::test]
    async fn async_stream_is_taken_once() {
        let stream = AsyncBodyStream::from_chunks(vec![Bytes::from_static(b"a")]);
        let copy = stream.clone();
        assert!(stream.take().await.is_some());
        assert!(copy.take().await.is_none());
    }
}
