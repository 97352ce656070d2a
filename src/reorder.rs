// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The reordering engine behind the scan streams.
//!
//! [`UnorderedScan`] drives up to `fragment_readahead` fragment streams
//! concurrently, tagging every batch with its position. It holds one batch of
//! lookahead per fragment so each batch can carry a `last` flag the moment it
//! is emitted. [`OrderedScan`] buffers the tagged batches and releases them
//! in enumeration order without stalling the producers behind it.

use std::collections::{BTreeMap, HashSet};
use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::record_batch::RecordBatch;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};

use crate::error::{DatasetError, Result};
use crate::internal_err;

/// A batch tagged with the fragment that produced it.
#[derive(Debug, Clone)]
pub struct TaggedRecordBatch {
    pub record_batch: RecordBatch,
    /// Position of the producing fragment in the dataset's enumeration
    /// order.
    pub fragment_index: usize,
}

/// A batch tagged with its exact position in the scan.
///
/// `last` is true on the final batch of a fragment, which lets a consumer
/// sequencing fragments advance without waiting for an end-of-fragment
/// signal.
#[derive(Debug, Clone)]
pub struct EnumeratedRecordBatch {
    pub record_batch: RecordBatch,
    pub fragment_index: usize,
    /// Position of this batch within its fragment.
    pub batch_index: usize,
    pub last: bool,
}

/// Batches in enumeration order.
pub type TaggedRecordBatchStream = BoxStream<'static, Result<TaggedRecordBatch>>;

/// Batches in arrival order, positions attached.
pub type EnumeratedRecordBatchStream = BoxStream<'static, Result<EnumeratedRecordBatch>>;

/// One batch stream per fragment, in enumeration order. Pulled lazily: a
/// fragment's scan only starts when the engine opens a slot for it.
pub(crate) type FragmentStreamIterator =
    Box<dyn Iterator<Item = Result<BoxStream<'static, Result<RecordBatch>>>> + Send>;

/// What [`UnorderedScan`] yields. Drained markers exist so the ordered
/// consumer can step over fragments that turned out to be empty; the
/// unordered surface filters them out.
#[derive(Debug)]
pub(crate) enum ScanEvent {
    Batch(EnumeratedRecordBatch),
    /// The fragment at this index completed without producing any batch.
    FragmentDrained(usize),
}

struct FragmentSlot {
    fragment_index: usize,
    stream: BoxStream<'static, Result<RecordBatch>>,
    /// The most recent batch, held back until we know whether it is the
    /// fragment's last.
    lookahead: Option<RecordBatch>,
    next_batch_index: usize,
}

/// Polls fragment streams round-robin, yielding batches as they arrive.
///
/// At most `fragment_readahead` fragments are active at a time; the next
/// fragment's scan starts only when an active one finishes. The first error
/// from any source ends the stream.
pub(crate) struct UnorderedScan {
    fragments: FragmentStreamIterator,
    fragments_exhausted: bool,
    next_fragment_index: usize,
    fragment_readahead: usize,
    slots: Vec<FragmentSlot>,
    cursor: usize,
    /// An error waiting to be emitted after a flushed lookahead batch.
    pending_error: Option<DatasetError>,
    failed: bool,
}

impl UnorderedScan {
    pub fn new(fragments: FragmentStreamIterator, fragment_readahead: usize) -> Self {
        Self {
            fragments,
            fragments_exhausted: false,
            next_fragment_index: 0,
            fragment_readahead: fragment_readahead.max(1),
            slots: vec![],
            cursor: 0,
            pending_error: None,
            failed: false,
        }
    }

    /// Start fragments until the readahead limit is reached or the source
    /// runs out.
    fn activate(&mut self) -> Result<()> {
        while !self.fragments_exhausted && self.slots.len() < self.fragment_readahead {
            match self.fragments.next() {
                None => self.fragments_exhausted = true,
                Some(Err(e)) => return Err(e),
                Some(Ok(stream)) => {
                    log::debug!(
                        "starting scan of fragment {}",
                        self.next_fragment_index
                    );
                    self.slots.push(FragmentSlot {
                        fragment_index: self.next_fragment_index,
                        stream,
                        lookahead: None,
                        next_batch_index: 0,
                    });
                    self.next_fragment_index += 1;
                }
            }
        }
        Ok(())
    }
}

impl Stream for UnorderedScan {
    type Item = Result<ScanEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(e) = this.pending_error.take() {
            this.failed = true;
            return Poll::Ready(Some(Err(e)));
        }
        if this.failed {
            return Poll::Ready(None);
        }
        if let Err(e) = this.activate() {
            this.failed = true;
            return Poll::Ready(Some(Err(e)));
        }
        if this.slots.is_empty() {
            return Poll::Ready(None);
        }

        let mut remaining = this.slots.len();
        while remaining > 0 {
            let index = this.cursor % this.slots.len();
            // Poll the same slot until it either hands us an emittable
            // batch, ends, or goes pending. Buffering the first batch of a
            // fragment is progress but yields nothing by itself.
            loop {
                let slot = &mut this.slots[index];
                match slot.stream.as_mut().poll_next(cx) {
                    Poll::Pending => {
                        this.cursor = index + 1;
                        remaining -= 1;
                        break;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        // Flush the held-back batch first so the consumer
                        // sees every batch that was produced before the
                        // failure.
                        let lookahead = slot.lookahead.take();
                        let fragment_index = slot.fragment_index;
                        let batch_index = slot.next_batch_index;
                        this.slots.clear();
                        match lookahead {
                            Some(record_batch) => {
                                this.pending_error = Some(e);
                                let event = ScanEvent::Batch(EnumeratedRecordBatch {
                                    record_batch,
                                    fragment_index,
                                    batch_index,
                                    last: false,
                                });
                                return Poll::Ready(Some(Ok(event)));
                            }
                            None => {
                                this.failed = true;
                                return Poll::Ready(Some(Err(e)));
                            }
                        }
                    }
                    Poll::Ready(Some(Ok(batch))) => {
                        let previous = slot.lookahead.replace(batch);
                        if let Some(record_batch) = previous {
                            let batch_index = slot.next_batch_index;
                            slot.next_batch_index += 1;
                            let event = ScanEvent::Batch(EnumeratedRecordBatch {
                                record_batch,
                                fragment_index: slot.fragment_index,
                                batch_index,
                                last: false,
                            });
                            this.cursor = index + 1;
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    Poll::Ready(None) => {
                        let slot = this.slots.swap_remove(index);
                        this.cursor = index;
                        let event = match slot.lookahead {
                            Some(record_batch) => {
                                ScanEvent::Batch(EnumeratedRecordBatch {
                                    record_batch,
                                    fragment_index: slot.fragment_index,
                                    batch_index: slot.next_batch_index,
                                    last: true,
                                })
                            }
                            None => ScanEvent::FragmentDrained(slot.fragment_index),
                        };
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
            }
        }
        Poll::Pending
    }
}

/// The public unordered surface: drained markers removed.
pub(crate) fn unordered_stream(scan: UnorderedScan) -> EnumeratedRecordBatchStream {
    scan.try_filter_map(|event| async move {
        Ok(match event {
            ScanEvent::Batch(batch) => Some(batch),
            ScanEvent::FragmentDrained(_) => None,
        })
    })
    .boxed()
}

/// Resequences the unordered event stream into enumeration order.
///
/// Batches from fragments ahead of the current head are buffered, not
/// refused, so a fast later fragment never blocks the scan; its batches all
/// release the moment the head advances past the gap.
pub(crate) struct OrderedScan {
    inner: UnorderedScan,
    buffer: BTreeMap<(usize, usize), EnumeratedRecordBatch>,
    drained_empty: HashSet<usize>,
    head_fragment: usize,
    next_batch: usize,
    exhausted: bool,
    /// Set once the terminal item has been emitted; the stream then ends.
    done: bool,
}

impl OrderedScan {
    pub fn new(inner: UnorderedScan) -> Self {
        Self {
            inner,
            buffer: BTreeMap::new(),
            drained_empty: HashSet::new(),
            head_fragment: 0,
            next_batch: 0,
            exhausted: false,
            done: false,
        }
    }

    /// Pop the batch at the head position, if buffered, and advance the
    /// head past it (and past any following empty fragments).
    fn flush_head(&mut self) -> Option<TaggedRecordBatch> {
        while self.drained_empty.remove(&self.head_fragment) {
            self.head_fragment += 1;
            self.next_batch = 0;
        }
        let batch = self
            .buffer
            .remove(&(self.head_fragment, self.next_batch))?;
        if batch.last {
            self.head_fragment += 1;
            self.next_batch = 0;
            while self.drained_empty.remove(&self.head_fragment) {
                self.head_fragment += 1;
            }
        } else {
            self.next_batch += 1;
        }
        Some(TaggedRecordBatch {
            record_batch: batch.record_batch,
            fragment_index: batch.fragment_index,
        })
    }
}

impl Stream for OrderedScan {
    type Item = Result<TaggedRecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            if let Some(batch) = this.flush_head() {
                return Poll::Ready(Some(Ok(batch)));
            }
            if this.exhausted {
                this.done = true;
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                this.buffer.clear();
                return Poll::Ready(Some(internal_err!(
                    "scan ended with batches stranded out of order"
                )));
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => this.exhausted = true,
                Poll::Ready(Some(Err(e))) => {
                    // Terminal: batches buffered from fragments past the
                    // failure are never delivered.
                    this.done = true;
                    this.buffer.clear();
                    this.drained_empty.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(ScanEvent::Batch(batch)))) => {
                    this.buffer
                        .insert((batch.fragment_index, batch.batch_index), batch);
                }
                Poll::Ready(Some(Ok(ScanEvent::FragmentDrained(index)))) => {
                    this.drained_empty.insert(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatasetError;
    use crate::exec_err;
    use crate::test_util::{test_schema, zeroes_batch};
    use futures::stream;

    fn batch(rows: usize) -> RecordBatch {
        zeroes_batch(rows, &test_schema())
    }

    fn source(
        fragments: Vec<Vec<Result<RecordBatch>>>,
    ) -> FragmentStreamIterator {
        Box::new(
            fragments
                .into_iter()
                .map(|batches| Ok(stream::iter(batches).boxed())),
        )
    }

    async fn collect_unordered(
        scan: UnorderedScan,
    ) -> Vec<Result<EnumeratedRecordBatch>> {
        unordered_stream(scan).collect().await
    }

    #[tokio::test]
    async fn unordered_interleaves_ready_fragments() {
        let scan = UnorderedScan::new(
            source(vec![
                vec![Ok(batch(1)), Ok(batch(2)), Ok(batch(3))],
                vec![Ok(batch(4)), Ok(batch(5))],
            ]),
            2,
        );
        let collected = collect_unordered(scan).await;
        let positions: Vec<_> = collected
            .iter()
            .map(|r| {
                let b = r.as_ref().unwrap();
                (b.fragment_index, b.batch_index, b.last, b.record_batch.num_rows())
            })
            .collect();
        assert_eq!(
            positions,
            [
                (0, 0, false, 1),
                (1, 0, false, 4),
                (0, 1, false, 2),
                (1, 1, true, 5),
                (0, 2, true, 3),
            ]
        );
    }

    #[tokio::test]
    async fn unordered_readahead_one_is_sequential() {
        let scan = UnorderedScan::new(
            source(vec![
                vec![Ok(batch(1)), Ok(batch(2))],
                vec![Ok(batch(3))],
            ]),
            1,
        );
        let collected = collect_unordered(scan).await;
        let fragments: Vec<_> = collected
            .iter()
            .map(|r| r.as_ref().unwrap().fragment_index)
            .collect();
        assert_eq!(fragments, [0, 0, 1]);
    }

    #[tokio::test]
    async fn ordered_resequences_interleaved_batches() {
        let scan = UnorderedScan::new(
            source(vec![
                vec![Ok(batch(1)), Ok(batch(2)), Ok(batch(3))],
                vec![Ok(batch(4)), Ok(batch(5))],
            ]),
            2,
        );
        let collected: Vec<_> = OrderedScan::new(scan).collect().await;
        let rows: Vec<_> = collected
            .iter()
            .map(|r| {
                let b = r.as_ref().unwrap();
                (b.fragment_index, b.record_batch.num_rows())
            })
            .collect();
        assert_eq!(rows, [(0, 1), (0, 2), (0, 3), (1, 4), (1, 5)]);
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        let scan = UnorderedScan::new(
            source(vec![vec![], vec![Ok(batch(1))], vec![]]),
            4,
        );
        let collected: Vec<_> = OrderedScan::new(scan).collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].as_ref().unwrap().fragment_index, 1);
    }

    #[tokio::test]
    async fn error_follows_every_produced_batch() {
        // the batch held back as lookahead is flushed before the error, so
        // every batch produced ahead of the failure reaches the consumer
        let scan = UnorderedScan::new(
            source(vec![vec![
                Ok(batch(1)),
                Ok(batch(2)),
                exec_err!("Oh no, we failed!"),
            ]]),
            1,
        );
        let collected = collect_unordered(scan).await;
        assert_eq!(collected.len(), 3);
        assert!(collected[0].is_ok());
        assert!(collected[1].is_ok());
        assert!(matches!(collected[2], Err(DatasetError::Execution(_))));
    }

    #[tokio::test]
    async fn ordered_error_ends_the_stream_despite_buffered_batches() {
        // fragment 1 finishes fast, so its batch sits in the resequencing
        // buffer when fragment 0 fails; the error must be the final item
        // rather than leaving the stream stuck on the stranded batch
        let scan = UnorderedScan::new(
            source(vec![
                vec![
                    Ok(batch(1)),
                    Ok(batch(2)),
                    exec_err!("Oh no, we failed!"),
                ],
                vec![Ok(batch(9))],
            ]),
            2,
        );
        let collected: Vec<_> = OrderedScan::new(scan).collect().await;
        assert_eq!(collected.len(), 3);
        assert!(collected[0].is_ok());
        assert!(collected[1].is_ok());
        assert!(matches!(collected[2], Err(DatasetError::Execution(_))));
    }

    #[tokio::test]
    async fn error_without_lookahead_is_immediate() {
        let scan = UnorderedScan::new(
            source(vec![vec![exec_err!("Oh no, we failed!")]]),
            1,
        );
        let collected = collect_unordered(scan).await;
        assert_eq!(collected.len(), 1);
        assert!(matches!(collected[0], Err(DatasetError::Execution(_))));
    }

    #[tokio::test]
    async fn fragment_iterator_error_is_terminal() {
        let fragments: FragmentStreamIterator = Box::new(
            vec![
                Ok(stream::iter(vec![Ok(batch(1)), Ok(batch(2))]).boxed()),
                exec_err!("fragment listing failed"),
            ]
            .into_iter(),
        );
        let scan = UnorderedScan::new(fragments, 4);
        let collected = collect_unordered(scan).await;
        assert_eq!(collected.len(), 1);
        assert!(matches!(collected[0], Err(DatasetError::Execution(_))));
    }
}
