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

//! Test datasets and fragments, including controllable and failing
//! producers.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Float64Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::dataset::{Dataset, FragmentIterator};
use crate::error::{DatasetError, Result};
use crate::expression::{literal, Expression};
use crate::fragment::{
    Fragment, RecordBatchGenerator, RecordBatchIterator, ScanTask,
    ScanTaskIterator,
};
use crate::options::ScanOptions;
use crate::table::Table;
use crate::{exec_err, internal_err, not_impl_err};

/// The two-column schema most tests scan: an `i32` and an `f64` column.
pub fn test_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("i32", DataType::Int32, true),
        Field::new("f64", DataType::Float64, true),
    ]))
}

/// A batch of `rows` all-zero rows against `schema`. Zero rows is legal.
pub fn zeroes_batch(rows: usize, schema: &SchemaRef) -> RecordBatch {
    RecordBatch::try_new(
        Arc::clone(schema),
        vec![
            Arc::new(Int32Array::from(vec![0; rows])),
            Arc::new(Float64Array::from(vec![0.0; rows])),
        ],
    )
    .unwrap()
}

/// A batch whose `i32` column counts `start..start + rows`, the `f64` column
/// mirroring it.
pub fn ramp_batch(start: i32, rows: usize, schema: &SchemaRef) -> RecordBatch {
    let ints: Vec<i32> = (start..start + rows as i32).collect();
    let floats: Vec<f64> = ints.iter().map(|v| *v as f64).collect();
    RecordBatch::try_new(
        Arc::clone(schema),
        vec![
            Arc::new(Int32Array::from(ints)),
            Arc::new(Float64Array::from(floats)),
        ],
    )
    .unwrap()
}

/// A batch of `rows` rows counting up from zero.
pub fn iota_batch(rows: usize, schema: &SchemaRef) -> RecordBatch {
    ramp_batch(0, rows, schema)
}

/// Assert two tables hold identical rows, comparing their concatenated
/// form so chunking differences don't matter.
pub fn assert_tables_equal(left: &Table, right: &Table) {
    assert_eq!(left.schema(), right.schema());
    let left = left.to_batch().unwrap();
    let right = right.to_batch().unwrap();
    assert_eq!(left, right);
}

/// A push-style fragment the test drives by hand: batches appear on the
/// scan stream only when the test delivers them, and the stream ends only
/// when the test says so. Supports the async path only.
pub struct ControlledFragment {
    schema: SchemaRef,
    partition_expression: Expression,
    tx: Mutex<Option<UnboundedSender<Result<RecordBatch>>>>,
    rx: Mutex<Option<UnboundedReceiver<Result<RecordBatch>>>>,
}

impl ControlledFragment {
    pub fn new(schema: SchemaRef) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            schema,
            partition_expression: literal(true),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Make a batch of `rows` rows available to the scan.
    pub fn deliver_batch(&self, rows: usize) {
        let batch = zeroes_batch(rows, &self.schema);
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Ok(batch));
        }
    }

    /// Fail the scan with an execution error.
    pub fn deliver_error(&self, message: &str) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Err(DatasetError::Execution(message.to_string())));
        }
    }

    /// Signal end-of-stream.
    pub fn finish(&self) {
        self.tx.lock().take();
    }
}

impl fmt::Debug for ControlledFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledFragment").finish()
    }
}

impl Fragment for ControlledFragment {
    fn physical_schema(&self) -> Result<SchemaRef> {
        Ok(Arc::clone(&self.schema))
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn scan(&self, _options: &ScanOptions) -> Result<ScanTaskIterator> {
        not_impl_err!("controlled fragments only support the async path")
    }

    fn scan_batches(&self, _options: &ScanOptions) -> Result<RecordBatchGenerator> {
        let Some(rx) = self.rx.lock().take() else {
            return internal_err!("controlled fragment scanned twice");
        };
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    fn type_name(&self) -> &'static str {
        "controlled"
    }
}

/// A dataset of [`ControlledFragment`]s the test can reach into.
#[derive(Debug)]
pub struct ControlledDataset {
    schema: SchemaRef,
    fragments: Vec<Arc<ControlledFragment>>,
}

impl ControlledDataset {
    pub fn new(fragment_count: usize) -> Self {
        let schema = test_schema();
        let fragments = (0..fragment_count)
            .map(|_| Arc::new(ControlledFragment::new(Arc::clone(&schema))))
            .collect();
        Self { schema, fragments }
    }

    pub fn fragment(&self, index: usize) -> &ControlledFragment {
        &self.fragments[index]
    }
}

impl Dataset for ControlledDataset {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn get_fragments(&self, _predicate: &Expression) -> Result<FragmentIterator> {
        let fragments: Vec<Result<Arc<dyn Fragment>>> = self
            .fragments
            .iter()
            .map(|f| Ok(Arc::clone(f) as Arc<dyn Fragment>))
            .collect();
        Ok(Box::new(fragments.into_iter()))
    }

    fn type_name(&self) -> &'static str {
        "controlled"
    }
}

/// Where a [`FailingFragment`] injects its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// The scan call itself fails.
    Scan,
    /// Task listing succeeds but executing the task fails.
    Execute,
    /// Batches flow normally, then iteration fails.
    Iteration,
}

/// A fragment that produces a run of good batches and then fails.
#[derive(Debug)]
pub struct FailingFragment {
    schema: SchemaRef,
    partition_expression: Expression,
    good_batches: usize,
    point: FailurePoint,
}

impl FailingFragment {
    pub fn new(schema: SchemaRef, good_batches: usize, point: FailurePoint) -> Self {
        Self {
            schema,
            partition_expression: literal(true),
            good_batches,
            point,
        }
    }

    fn items(&self) -> Vec<Result<RecordBatch>> {
        let mut items: Vec<Result<RecordBatch>> = (0..self.good_batches)
            .map(|_| Ok(zeroes_batch(4, &self.schema)))
            .collect();
        items.push(exec_err!("Oh no, we failed!"));
        items
    }
}

impl Fragment for FailingFragment {
    fn physical_schema(&self) -> Result<SchemaRef> {
        Ok(Arc::clone(&self.schema))
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn scan(&self, _options: &ScanOptions) -> Result<ScanTaskIterator> {
        match self.point {
            FailurePoint::Scan => exec_err!("Oh no, we failed!"),
            FailurePoint::Execute => {
                let task: Arc<dyn ScanTask> = Arc::new(FailingScanTask {
                    items: vec![],
                    fail_on_execute: true,
                });
                Ok(Box::new(std::iter::once(Ok(task))))
            }
            FailurePoint::Iteration => {
                let task: Arc<dyn ScanTask> = Arc::new(FailingScanTask {
                    items: self.items(),
                    fail_on_execute: false,
                });
                Ok(Box::new(std::iter::once(Ok(task))))
            }
        }
    }

    fn scan_batches(&self, _options: &ScanOptions) -> Result<RecordBatchGenerator> {
        match self.point {
            FailurePoint::Scan => exec_err!("Oh no, we failed!"),
            FailurePoint::Execute => {
                Ok(stream::iter(vec![exec_err!("Oh no, we failed!")]).boxed())
            }
            FailurePoint::Iteration => Ok(stream::iter(self.items()).boxed()),
        }
    }

    fn type_name(&self) -> &'static str {
        "failing"
    }
}

struct FailingScanTask {
    items: Vec<Result<RecordBatch>>,
    fail_on_execute: bool,
}

impl ScanTask for FailingScanTask {
    fn execute(&self) -> Result<RecordBatchIterator> {
        if self.fail_on_execute {
            return exec_err!("Oh no, we failed!");
        }
        let items: Vec<Result<RecordBatch>> = self
            .items
            .iter()
            .map(|item| match item {
                Ok(batch) => Ok(batch.clone()),
                Err(DatasetError::Execution(message)) => {
                    Err(DatasetError::Execution(message.clone()))
                }
                Err(e) => exec_err!("{e}"),
            })
            .collect();
        Ok(Box::new(items.into_iter()))
    }
}
