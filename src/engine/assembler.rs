//! Bridges the writer's segment callback into an ordered stream.
//!
//! The writer pushes segments through [`SegmentEmitter`] from whichever
//! thread finalized them. [`SegmentAssembler`] is the only consumer and the
//! only owner of the index counter, so indices follow channel order.

use crate::{Error, Result};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use hlsforge_media::{Segment, SegmentDelegate, SegmentKind, SegmentReport};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug)]
enum SegmentEvent {
    Segment {
        data: Bytes,
        kind: SegmentKind,
        report: Option<SegmentReport>,
    },
    Finished,
    Failed(String),
}

/// Create a connected emitter/assembler pair.
pub fn segment_channel() -> (SegmentEmitter, SegmentAssembler) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SegmentEmitter { tx },
        SegmentAssembler {
            events: UnboundedReceiverStream::new(rx),
            next_index: 0,
            done: false,
        },
    )
}

/// Producer side, handed to the writer as its [`SegmentDelegate`].
#[derive(Clone)]
pub struct SegmentEmitter {
    tx: mpsc::UnboundedSender<SegmentEvent>,
}

impl SegmentEmitter {
    /// Mark the stream complete. Segments sent earlier are still delivered.
    pub fn finish(&self) {
        self.send(SegmentEvent::Finished);
    }

    /// Terminate the stream with an error.
    pub fn fail(&self, reason: impl Into<String>) {
        self.send(SegmentEvent::Failed(reason.into()));
    }

    fn send(&self, event: SegmentEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Segment assembler is gone, dropping event");
        }
    }
}

impl SegmentDelegate for SegmentEmitter {
    fn did_output_segment(&self, data: Bytes, kind: SegmentKind, report: Option<SegmentReport>) {
        self.send(SegmentEvent::Segment { data, kind, report });
    }
}

/// Consumer side: a stream of indexed segments.
pub struct SegmentAssembler {
    events: UnboundedReceiverStream<SegmentEvent>,
    next_index: u32,
    done: bool,
}

impl SegmentAssembler {
    /// Drain the stream. Resolves once the emitter reports completion.
    pub async fn collect_all(self) -> Result<Vec<Segment>> {
        self.inspect_ok(|segment| {
            tracing::debug!(
                index = segment.index,
                kb = segment.data.len() / 1024,
                init = segment.is_initialization(),
                "Segment {}: {} KB{}",
                segment.index,
                segment.data.len() / 1024,
                if segment.is_initialization() { " (init)" } else { "" }
            )
        })
        .try_collect()
        .await
    }
}

impl Stream for SegmentAssembler {
    type Item = Result<Segment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let event = match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(event) => event,
            Poll::Pending => return Poll::Pending,
        };

        let item = match event {
            Some(SegmentEvent::Segment { data, kind, report }) => {
                let index = this.next_index;
                this.next_index += 1;
                Some(Ok(Segment {
                    index,
                    data,
                    kind,
                    report,
                }))
            }
            Some(SegmentEvent::Finished) => {
                this.done = true;
                None
            }
            Some(SegmentEvent::Failed(reason)) => {
                this.done = true;
                Some(Err(Error::EncodeFailed(reason)))
            }
            None => {
                this.done = true;
                Some(Err(Error::encode_failed(
                    "segment stream closed before the writer finished",
                )))
            }
        };
        Poll::Ready(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_indices_follow_emission_order() {
        let (emitter, assembler) = segment_channel();
        emitter.did_output_segment(Bytes::from_static(b"init"), SegmentKind::Initialization, None);
        emitter.did_output_segment(Bytes::from_static(b"a"), SegmentKind::Media, None);
        emitter.did_output_segment(Bytes::from_static(b"b"), SegmentKind::Media, None);
        emitter.finish();

        let segments = assembler.collect_all().await.unwrap();

        let indices: Vec<u32> = segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(segments[0].is_initialization());
        assert_eq!(segments[2].data, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_failure_ends_the_stream() {
        let (emitter, mut assembler) = segment_channel();
        emitter.did_output_segment(Bytes::new(), SegmentKind::Initialization, None);
        emitter.fail("writer gave up");
        emitter.did_output_segment(Bytes::new(), SegmentKind::Media, None);

        assert_matches!(assembler.next().await, Some(Ok(_)));
        assert_matches!(assembler.next().await, Some(Err(Error::EncodeFailed(reason))) if reason == "writer gave up");
        assert!(assembler.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_emitter_is_a_failure() {
        let (emitter, assembler) = segment_channel();
        emitter.did_output_segment(Bytes::new(), SegmentKind::Initialization, None);
        drop(emitter);

        assert_matches!(assembler.collect_all().await, Err(Error::EncodeFailed(_)));
    }

    #[tokio::test]
    async fn test_emitting_from_many_threads_keeps_indices_contiguous() {
        let (emitter, assembler) = segment_channel();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let emitter = emitter.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        emitter.did_output_segment(Bytes::new(), SegmentKind::Media, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        emitter.finish();

        let segments = assembler.collect_all().await.unwrap();
        let indices: Vec<u32> = segments.iter().map(|s| s.index).collect();
        assert_eq!(indices, (0..100).collect::<Vec<u32>>());
    }
}
