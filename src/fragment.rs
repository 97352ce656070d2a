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

//! Fragments: independently scannable partitions of a dataset.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::expression::{literal, Expression};
use crate::options::ScanOptions;

/// A fallible iterator of scan tasks, the unit of the synchronous scan path.
pub type ScanTaskIterator = Box<dyn Iterator<Item = Result<Arc<dyn ScanTask>>> + Send>;

/// A fallible iterator of record batches.
pub type RecordBatchIterator = Box<dyn Iterator<Item = Result<RecordBatch>> + Send>;

/// An asynchronous producer of record batches. The producer is only polled
/// when the consumer asks for the next batch; a push-style source buffers on
/// its own behind this interface.
pub type RecordBatchGenerator = BoxStream<'static, Result<RecordBatch>>;

/// A synchronous unit of work producing the batches of one fragment (or a
/// slice of one). Execution is lazy: failures surface on the `next()` call
/// where they occur.
pub trait ScanTask: Send + Sync {
    fn execute(&self) -> Result<RecordBatchIterator>;
}

/// An independently scannable source of record batches.
///
/// A fragment owns its physical schema, which may be a subset of the dataset
/// schema, and a partition expression it is known to satisfy. It can produce
/// batches synchronously (through [`ScanTask`]s) or asynchronously (through a
/// [`RecordBatchGenerator`]); either call may fail at invocation time or at
/// any subsequent pull.
pub trait Fragment: fmt::Debug + Send + Sync {
    /// The schema of the batches this fragment produces.
    fn physical_schema(&self) -> Result<SchemaRef>;

    /// A predicate all rows of this fragment are known to satisfy. Used to
    /// materialize dataset columns the physical schema lacks.
    fn partition_expression(&self) -> &Expression;

    /// Synchronous scan path.
    fn scan(&self, options: &ScanOptions) -> Result<ScanTaskIterator>;

    /// Asynchronous scan path.
    fn scan_batches(&self, options: &ScanOptions) -> Result<RecordBatchGenerator>;

    fn type_name(&self) -> &'static str;
}

/// A fragment over batches that already live in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFragment {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    partition_expression: Expression,
}

impl InMemoryFragment {
    /// Create a fragment from in-memory batches, inferring the physical
    /// schema from the first batch.
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        let schema = batches
            .first()
            .map(RecordBatch::schema)
            .unwrap_or_else(|| Arc::new(Schema::empty()));
        Self::with_schema(schema, batches)
    }

    pub fn with_schema(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self {
            schema,
            batches,
            partition_expression: literal(true),
        }
    }

    /// Attach a predicate all rows of this fragment are known to satisfy.
    pub fn with_partition_expression(mut self, expression: Expression) -> Self {
        self.partition_expression = expression;
        self
    }
}

impl Fragment for InMemoryFragment {
    fn physical_schema(&self) -> Result<SchemaRef> {
        Ok(Arc::clone(&self.schema))
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn scan(&self, _options: &ScanOptions) -> Result<ScanTaskIterator> {
        let task: Arc<dyn ScanTask> =
            Arc::new(InMemoryScanTask::new(self.batches.clone()));
        Ok(Box::new(std::iter::once(Ok(task))))
    }

    fn scan_batches(&self, _options: &ScanOptions) -> Result<RecordBatchGenerator> {
        Ok(stream::iter(self.batches.clone().into_iter().map(Ok)).boxed())
    }

    fn type_name(&self) -> &'static str {
        "in-memory"
    }
}

/// The scan task of an [`InMemoryFragment`]: batches are already resident,
/// execution just hands them out.
pub struct InMemoryScanTask {
    batches: Vec<RecordBatch>,
}

impl InMemoryScanTask {
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }
}

impl ScanTask for InMemoryScanTask {
    fn execute(&self) -> Result<RecordBatchIterator> {
        Ok(Box::new(self.batches.clone().into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{test_schema, zeroes_batch};

    #[test]
    fn in_memory_fragment_schema_inference() {
        let schema = test_schema();
        let fragment = InMemoryFragment::new(vec![zeroes_batch(4, &schema)]);
        assert_eq!(fragment.physical_schema().unwrap(), schema);

        let empty = InMemoryFragment::new(vec![]);
        assert_eq!(empty.physical_schema().unwrap().fields().len(), 0);
    }

    #[test]
    fn in_memory_scan_task_yields_batches() {
        let schema = test_schema();
        let batches = vec![zeroes_batch(4, &schema), zeroes_batch(2, &schema)];
        let fragment = InMemoryFragment::new(batches);

        let options = ScanOptions::new(test_schema());
        let mut tasks = fragment.scan(&options).unwrap();
        let task = tasks.next().unwrap().unwrap();
        assert!(tasks.next().is_none());

        let rows: usize = task
            .execute()
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .sum();
        assert_eq!(rows, 6);
    }
}
