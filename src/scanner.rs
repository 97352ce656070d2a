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

//! The consumer-facing scan surface.
//!
//! A [`Scanner`] is built once from a dataset and a validated configuration,
//! then drained through one of its operations. Both execution modes (task
//! iterators on the sync path, batch generators on the async path) feed the
//! same reordering engine, so their observable output is identical.

use std::sync::Arc;

use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;

use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};

use crate::dataset::Dataset;
use crate::error::Result;
use crate::expression::Expression;
use crate::fragment::{Fragment, RecordBatchIterator, ScanTaskIterator};
use crate::invalid_err;
use crate::options::{check_fields, ScanOptions, DEFAULT_FRAGMENT_READAHEAD};
use crate::projector::BatchProjector;
use crate::reorder::{
    unordered_stream, EnumeratedRecordBatchStream, FragmentStreamIterator,
    OrderedScan, TaggedRecordBatch, TaggedRecordBatchStream, UnorderedScan,
};
use crate::row_index;
use crate::stream::{
    ReceiverStreamBuilder, RecordBatchStreamAdapter, SendableRecordBatchStream,
};
use crate::table::Table;

/// Validates and assembles a scan configuration.
///
/// Every setter that can reject bad input returns `Result`, so an invalid
/// configuration fails at build time rather than mid-scan.
pub struct ScannerBuilder {
    dataset: Arc<dyn Dataset>,
    options: ScanOptions,
}

impl ScannerBuilder {
    pub fn new(dataset: Arc<dyn Dataset>) -> Self {
        let options = ScanOptions::new(dataset.schema());
        Self { dataset, options }
    }

    /// Project the named columns, in order. Names may repeat; an empty list
    /// produces zero-column batches that still carry row counts.
    pub fn project(mut self, columns: &[&str]) -> Result<Self> {
        self.options.set_projection_names(columns)?;
        Ok(self)
    }

    /// Project arbitrary expressions, one output name per expression.
    pub fn project_expressions(
        mut self,
        expressions: Vec<Expression>,
        names: Vec<String>,
    ) -> Result<Self> {
        self.options.set_projection(expressions, names)?;
        Ok(self)
    }

    /// Keep only the rows satisfying `predicate`.
    pub fn filter(mut self, predicate: Expression) -> Result<Self> {
        check_fields(&predicate, &self.options.dataset_schema)?;
        let data_type = predicate.data_type(&self.options.dataset_schema)?;
        if data_type != DataType::Boolean {
            return invalid_err!(
                "filter expression must be boolean, {predicate} is {data_type}"
            );
        }
        self.options.filter = predicate;
        Ok(self)
    }

    /// Cap the rows per yielded batch. Must be positive.
    pub fn batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return invalid_err!("batch size must be positive, got 0");
        }
        self.options.batch_size = batch_size;
        Ok(self)
    }

    pub fn use_threads(mut self, use_threads: bool) -> Self {
        self.options.use_threads = use_threads;
        self
    }

    pub fn use_async(mut self, use_async: bool) -> Self {
        self.options.use_async = use_async;
        self
    }

    /// How many fragments may be scanned ahead of the one being drained.
    /// Zero selects the default.
    pub fn fragment_readahead(mut self, fragment_readahead: usize) -> Self {
        self.options.fragment_readahead = if fragment_readahead == 0 {
            DEFAULT_FRAGMENT_READAHEAD
        } else {
            fragment_readahead
        };
        self
    }

    /// How many batches each fragment may buffer on the threaded sync path.
    pub fn batch_readahead(mut self, batch_readahead: usize) -> Self {
        self.options.batch_readahead = batch_readahead.max(1);
        self
    }

    pub fn finish(self) -> Result<Scanner> {
        Ok(Scanner {
            dataset: self.dataset,
            options: Arc::new(self.options),
        })
    }
}

/// A built scan over one dataset. Each operation starts a fresh pass over
/// the fragments.
pub struct Scanner {
    dataset: Arc<dyn Dataset>,
    options: Arc<ScanOptions>,
}

impl Scanner {
    /// Schema of every batch this scan yields.
    pub fn projected_schema(&self) -> SchemaRef {
        self.options.projected_schema()
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// One post-pipeline batch stream per fragment, produced lazily so a
    /// fragment's scan only starts when the engine admits it.
    fn fragment_streams(&self) -> Result<FragmentStreamIterator> {
        let options = Arc::clone(&self.options);
        let fragments = self.dataset.get_fragments(&options.filter)?;
        let streams = fragments.map(move |fragment| {
            let fragment = fragment?;
            let projector =
                Arc::new(BatchProjector::new(&options, fragment.as_ref()));
            let raw = if options.use_async {
                fragment.scan_batches(&options)?
            } else if options.use_threads {
                threaded_task_batches(fragment, &options)?
            } else {
                stream::iter(TaskBatchIter::new(fragment.scan(&options)?)).boxed()
            };
            Ok(apply_projector(projector, raw))
        });
        Ok(Box::new(streams))
    }

    fn unordered_scan(&self) -> Result<UnorderedScan> {
        Ok(UnorderedScan::new(
            self.fragment_streams()?,
            self.options.fragment_readahead,
        ))
    }

    /// Batches in arrival order, each tagged with its exact position.
    pub fn scan_batches_unordered(&self) -> Result<EnumeratedRecordBatchStream> {
        Ok(unordered_stream(self.unordered_scan()?))
    }

    /// Batches in enumeration order: fragment-major, batch-index-minor.
    pub fn scan_batches(&self) -> Result<TaggedRecordBatchStream> {
        Ok(OrderedScan::new(self.unordered_scan()?).boxed())
    }

    /// Batches in enumeration order with their tags stripped, as a plain
    /// record batch stream that reports the projected schema.
    pub fn to_batches(&self) -> Result<SendableRecordBatchStream> {
        let batches = self
            .scan_batches()?
            .map_ok(|tagged| tagged.record_batch);
        Ok(Box::pin(RecordBatchStreamAdapter::new(
            self.projected_schema(),
            batches,
        )))
    }

    /// Invoke `visitor` once per batch, in enumeration order. The first
    /// error, from the stream or from the visitor, ends the scan.
    pub async fn scan<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(TaggedRecordBatch) -> Result<()>,
    {
        let mut batches = self.scan_batches()?;
        while let Some(batch) = batches.try_next().await? {
            visitor(batch)?;
        }
        Ok(())
    }

    /// Materialize the whole scan into a table.
    pub async fn to_table(&self) -> Result<Table> {
        let batches = self
            .scan_batches()?
            .map_ok(|tagged| tagged.record_batch)
            .try_collect()
            .await?;
        Ok(Table::new(self.projected_schema(), batches))
    }

    /// The first `num_rows` rows, in enumeration order. Stops pulling from
    /// the fragments as soon as enough rows have arrived.
    pub async fn head(&self, num_rows: usize) -> Result<Table> {
        row_index::head(self.projected_schema(), self.scan_batches()?, num_rows)
            .await
    }

    /// Gather rows by global position across the scan output. The result
    /// rows come back in the order requested, which may be unsorted and may
    /// repeat.
    pub async fn take_rows(&self, indices: &[u64]) -> Result<Table> {
        row_index::take_rows(self.projected_schema(), self.scan_batches()?, indices)
            .await
    }
}

/// Flattens a fragment's scan tasks into their batches, stopping at the
/// first error wherever it surfaces (task listing, task execution, or batch
/// iteration).
struct TaskBatchIter {
    tasks: ScanTaskIterator,
    current: Option<RecordBatchIterator>,
    done: bool,
}

impl TaskBatchIter {
    fn new(tasks: ScanTaskIterator) -> Self {
        Self {
            tasks,
            current: None,
            done: false,
        }
    }
}

impl Iterator for TaskBatchIter {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(current) = &mut self.current {
                match current.next() {
                    Some(Ok(batch)) => return Some(Ok(batch)),
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }
            match self.tasks.next() {
                None => return None,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(task)) => match task.execute() {
                    Ok(batches) => self.current = Some(batches),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
            }
        }
    }
}

/// Run a fragment's scan tasks on the blocking pool, bounded by
/// `batch_readahead`. Errors travel through the channel so they stay ordered
/// with respect to the batches that preceded them.
fn threaded_task_batches(
    fragment: Arc<dyn Fragment>,
    options: &ScanOptions,
) -> Result<BoxStream<'static, Result<RecordBatch>>> {
    let tasks = fragment.scan(options)?;
    let mut builder = ReceiverStreamBuilder::new(options.batch_readahead);
    let tx = builder.tx();
    builder.spawn_blocking(move || {
        for item in TaskBatchIter::new(tasks) {
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() {
                // receiver dropped, the scan was abandoned
                log::debug!("stopping scan task early, output receiver dropped");
                break;
            }
            if failed {
                break;
            }
        }
        Ok(())
    });
    Ok(builder.build())
}

/// Route a fragment's raw batches through its filter/projection pipeline.
/// One raw batch may expand to several output chunks.
fn apply_projector(
    projector: Arc<BatchProjector>,
    raw: BoxStream<'static, Result<RecordBatch>>,
) -> BoxStream<'static, Result<RecordBatch>> {
    raw.flat_map(move |item| {
        let chunks = match item {
            Ok(batch) => match projector.process(batch) {
                Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            },
            Err(e) => vec![Err(e)],
        };
        stream::iter(chunks)
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use crate::error::DatasetError;
    use crate::expression::{field_ref, gt, literal};
    use crate::test_util::{iota_batch, test_schema};

    fn test_dataset(batches: usize, rows_per_batch: usize) -> Arc<dyn Dataset> {
        let schema = test_schema();
        let batches = (0..batches)
            .map(|_| iota_batch(rows_per_batch, &schema))
            .collect();
        Arc::new(InMemoryDataset::new(schema, batches))
    }

    #[test]
    fn builder_rejects_bad_configuration() {
        let dataset = test_dataset(1, 4);

        assert!(matches!(
            ScannerBuilder::new(Arc::clone(&dataset)).batch_size(0),
            Err(DatasetError::Invalid(_))
        ));
        assert!(matches!(
            ScannerBuilder::new(Arc::clone(&dataset))
                .filter(gt(field_ref("not_a_column"), literal(0))),
            Err(DatasetError::Invalid(_))
        ));
        assert!(matches!(
            ScannerBuilder::new(dataset).filter(literal(1)),
            Err(DatasetError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn to_table_collects_all_rows() {
        let scanner = ScannerBuilder::new(test_dataset(3, 8)).finish().unwrap();
        let table = scanner.to_table().await.unwrap();
        assert_eq!(table.num_rows(), 24);
        assert_eq!(table.schema(), scanner.projected_schema());
    }

    #[tokio::test]
    async fn visitor_sees_every_batch_in_order() {
        let scanner = ScannerBuilder::new(test_dataset(3, 8)).finish().unwrap();
        let mut rows = 0;
        scanner
            .scan(|tagged| {
                rows += tagged.record_batch.num_rows();
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(rows, 24);
    }

    #[tokio::test]
    async fn visitor_error_stops_the_scan() {
        let scanner = ScannerBuilder::new(test_dataset(3, 8)).finish().unwrap();
        let mut seen = 0;
        let result = scanner
            .scan(|_| {
                seen += 1;
                crate::exec_err!("visitor bailed")
            })
            .await;
        assert!(matches!(result, Err(DatasetError::Execution(_))));
        assert_eq!(seen, 1);
    }
}
