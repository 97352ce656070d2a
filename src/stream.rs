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

//! Stream wrappers shared by the scan paths.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;

use crate::error::Result;
use crate::internal_err;

/// A stream of [`RecordBatch`]es that knows its schema up front, before the
/// first batch arrives.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> {
    fn schema(&self) -> SchemaRef;
}

/// A pinned, sendable [`RecordBatchStream`].
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream + Send>>;

/// Builds a batch stream fed by blocking producer tasks.
///
/// The channel capacity bounds how far producers can run ahead of the
/// consumer. A producer panic resurfaces on the consuming task, and dropping
/// the built stream cancels any producers still running.
pub(crate) struct ReceiverStreamBuilder {
    tx: Sender<Result<RecordBatch>>,
    rx: Receiver<Result<RecordBatch>>,
    join_set: JoinSet<Result<()>>,
}

impl ReceiverStreamBuilder {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);

        Self {
            tx,
            rx,
            join_set: JoinSet::new(),
        }
    }

    /// A sender handle for the producer side.
    pub fn tx(&self) -> Sender<Result<RecordBatch>> {
        self.tx.clone()
    }

    /// Spawn a blocking producer, typically one that writes to the sender
    /// from [`ReceiverStreamBuilder::tx`]. The task is aborted when the
    /// builder (or the stream built from it) is dropped.
    pub fn spawn_blocking<F>(&mut self, f: F)
    where
        F: FnOnce() -> Result<()>,
        F: Send + 'static,
    {
        self.join_set.spawn_blocking(f);
    }

    /// The stream of everything written to `tx`.
    pub fn build(self) -> BoxStream<'static, Result<RecordBatch>> {
        let Self {
            tx,
            rx,
            mut join_set,
        } = self;

        // only producers hold senders from here on
        drop(tx);

        // watches the join set so producer panics resurface here instead of
        // being swallowed
        let check = async move {
            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok(Ok(())) => continue,
                    Ok(Err(error)) => return Some(Err(error)),
                    Err(e) => {
                        if e.is_panic() {
                            std::panic::resume_unwind(e.into_panic());
                        } else {
                            // cancellation aborts the whole JoinSet, which
                            // only happens when the receiver is dropped and
                            // nobody is polling this
                            return Some(internal_err!("producer task failed: {e}"));
                        }
                    }
                }
            }
            None
        };

        let check_stream = futures::stream::once(check)
            .filter_map(|item| async move { item });

        let rx_stream = futures::stream::unfold(rx, |mut rx| async move {
            let next_item = rx.recv().await;
            next_item.map(|next_item| (next_item, rx))
        });

        futures::stream::select(rx_stream, check_stream).boxed()
    }
}

pin_project! {
    /// Pairs a batch stream with its schema so the combination implements
    /// [`RecordBatchStream`].
    pub struct RecordBatchStreamAdapter<S> {
        schema: SchemaRef,

        #[pin]
        stream: S,
    }
}

impl<S> RecordBatchStreamAdapter<S> {
    /// Wrap `stream`, reporting `schema` for it. Pin the result to obtain a
    /// [`SendableRecordBatchStream`].
    pub fn new(schema: SchemaRef, stream: S) -> Self {
        Self { schema, stream }
    }
}

impl<S> std::fmt::Debug for RecordBatchStreamAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBatchStreamAdapter")
            .field("schema", &self.schema)
            .finish()
    }
}

impl<S> Stream for RecordBatchStreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>>,
{
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

impl<S> RecordBatchStream for RecordBatchStreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>>,
{
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
}
