// Bounded byte-range reader.
//
// The backend always sends the whole file. This adapter sits on top of that
// stream, tracks the absolute offset of every chunk and only lets through the
// bytes inside the requested range. Transport framing (chunk sizes) has no
// effect on the output.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use super::byte_range::ByteRange;

pub struct RangeStream<S> {
    /// Dropped as soon as the range is complete, which also drops the
    /// upstream connection.
    inner: Option<S>,
    range: ByteRange,
    /// Absolute offset of the next byte the upstream will yield.
    offset: u64,
}

impl<S> RangeStream<S> {
    pub fn new(inner: S, range: ByteRange) -> Self {
        Self {
            inner: Some(inner),
            range,
            offset: 0,
        }
    }
}

impl<S, E> Stream for RangeStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.offset > this.range.end {
                this.inner = None;
            }
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            let chunk = match ready!(Pin::new(inner).poll_next(cx)) {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => {
                    this.inner = None;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.inner = None;
                    return Poll::Ready(None);
                }
            };

            let chunk_start = this.offset;
            let chunk_len = chunk.len() as u64;
            this.offset += chunk_len;

            if chunk_len == 0 {
                continue;
            }
            let chunk_end = chunk_start + chunk_len - 1;
            if chunk_end < this.range.start || chunk_start > this.range.end {
                continue;
            }

            let from = this.range.start.max(chunk_start) - chunk_start;
            let to = this.range.end.min(chunk_end) - chunk_start + 1;
            return Poll::Ready(Some(Ok(chunk.slice(from as usize..to as usize))));
        }
    }
}
