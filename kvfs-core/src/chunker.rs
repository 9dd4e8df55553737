//! Splits an incoming byte stream into fixed-size chunks, and reassembles
//! chunks into an outgoing byte stream.
//!
//! The KV layout depends on 64 KiB alignment being honored regardless of how
//! the source reader happens to buffer its data, so [`ChunkReader`] fills
//! each chunk with repeated short reads rather than forwarding whatever
//! chunk size the underlying reader produces.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

pub const CHUNK_SIZE: usize = 65536;

/// Adapts a `Stream` of arbitrarily-sized byte chunks into an `AsyncRead`,
/// so a caller-supplied stream can be fed through [`ChunkReader`] and
/// re-aligned to 64 KiB boundaries regardless of how it happened to chunk
/// the data itself.
pub struct StreamReader<S> {
    stream: S,
    buf: Vec<u8>,
    pos: usize,
}

impl<S> StreamReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            pos: 0,
        }
    }
}

impl<S> AsyncRead for StreamReader<S>
where
    S: Stream<Item = std::io::Result<Vec<u8>>> + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if self.pos < self.buf.len() {
                let n = std::cmp::min(out.remaining(), self.buf.len() - self.pos);
                let start = self.pos;
                out.put_slice(&self.buf[start..start + n]);
                self.pos += n;
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf = chunk;
                    self.pos = 0;
                    if self.buf.is_empty() {
                        continue;
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Wraps an [`AsyncRead`] and yields fixed-size chunks, one `next()` call at
/// a time. The final chunk may be shorter than `CHUNK_SIZE` (including
/// empty, if the input length is an exact multiple); `None` signals EOF.
pub struct ChunkReader<R> {
    inner: R,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < CHUNK_SIZE {
            self.done = true;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

/// Slice a byte array at `CHUNK_SIZE` boundaries.
pub fn chunk_bytes(data: &[u8]) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect()
}

/// UTF-8 encode a string, then chunk the resulting bytes.
pub fn chunk_string(data: &str) -> Vec<Vec<u8>> {
    chunk_bytes(data.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn exact_multiple_has_no_trailing_empty_chunk() {
        let data = vec![0u8; CHUNK_SIZE * 2];
        let mut r = ChunkReader::new(Cursor::new(data));
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), CHUNK_SIZE);
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), CHUNK_SIZE);
        assert!(r.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_final_chunk() {
        let mut data = vec![1u8; CHUNK_SIZE];
        data.extend_from_slice(&[2u8; 10]);
        let mut r = ChunkReader::new(Cursor::new(data));
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), CHUNK_SIZE);
        let last = r.next_chunk().await.unwrap().unwrap();
        assert_eq!(last.len(), 10);
        assert!(r.next_chunk().await.unwrap().is_none());
    }

    /// A reader that only ever returns 1 byte per poll must still be
    /// assembled into full 64 KiB chunks.
    struct OneByteAtATime(Cursor<Vec<u8>>);

    impl AsyncRead for OneByteAtATime {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let mut one = [0u8; 1];
            let mut tmp = tokio::io::ReadBuf::new(&mut one);
            match std::pin::Pin::new(&mut self.0).poll_read(cx, &mut tmp) {
                std::task::Poll::Ready(Ok(())) => {
                    if tmp.filled().is_empty() {
                        std::task::Poll::Ready(Ok(()))
                    } else {
                        buf.put_slice(tmp.filled());
                        std::task::Poll::Ready(Ok(()))
                    }
                }
                other => other,
            }
        }
    }

    #[tokio::test]
    async fn fills_chunk_despite_small_underlying_reads() {
        let data = vec![7u8; CHUNK_SIZE + 1];
        let mut r = ChunkReader::new(OneByteAtATime(Cursor::new(data)));
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), CHUNK_SIZE);
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), 1);
    }

    #[test]
    fn chunk_bytes_boundaries() {
        let data = vec![0u8; CHUNK_SIZE + 1];
        let chunks = chunk_bytes(&data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn chunk_bytes_empty_input_has_no_chunks() {
        assert!(chunk_bytes(&[]).is_empty());
    }

    #[tokio::test]
    async fn stream_reader_realigns_arbitrary_chunk_sizes() {
        let pieces: Vec<std::io::Result<Vec<u8>>> =
            vec![Ok(vec![1u8; 3]), Ok(vec![2u8; CHUNK_SIZE]), Ok(vec![3u8; 1])];
        let stream = futures::stream::iter(pieces);
        let mut r = ChunkReader::new(StreamReader::new(stream));
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), CHUNK_SIZE);
        assert_eq!(r.next_chunk().await.unwrap().unwrap().len(), 4);
        assert!(r.next_chunk().await.unwrap().is_none());
    }
}
