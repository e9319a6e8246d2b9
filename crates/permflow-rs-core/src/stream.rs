//! Replay-1 stream of published result snapshots.

use permflow_rs_protocol::ResultSnapshot;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;

/// Stream of result snapshots.
///
/// A new subscriber first receives the latest published snapshot, if any.
/// Slow subscribers only observe the most recent snapshot, never a backlog.
pub struct ResultStream {
    inner: WatchStream<Option<ResultSnapshot>>,
}

impl ResultStream {
    pub(crate) fn new(receiver: watch::Receiver<Option<ResultSnapshot>>) -> Self {
        Self {
            inner: WatchStream::new(receiver),
        }
    }
}

impl Stream for ResultStream {
    type Item = ResultSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Some(snapshot))) => return Poll::Ready(Some(snapshot)),
                // Nothing published yet.
                Poll::Ready(Some(None)) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
