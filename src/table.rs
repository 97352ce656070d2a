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

//! An in-memory table: a schema plus a sequence of record batches.

use std::sync::Arc;

use arrow::array::UInt64Array;
use arrow::compute::{concat_batches, take_record_batch};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::error::Result;

/// The materialized result of a scan: zero or more batches sharing one
/// schema. Batches are immutable and reference counted, so cloning a table
/// shares the underlying columnar data.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Create a table from batches that all share `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    /// Create a table from a non-empty batch list, taking the schema from
    /// the first batch.
    pub fn from_record_batches(batches: Vec<RecordBatch>) -> Result<Self> {
        match batches.first() {
            Some(first) => Ok(Self::new(first.schema(), batches)),
            None => crate::invalid_err!(
                "cannot infer a schema from an empty batch list"
            ),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Concatenate all batches into a single batch.
    pub fn to_batch(&self) -> Result<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }

    /// Gather rows by position, in the order requested. Indices may be
    /// unsorted and may repeat.
    pub fn take(&self, indices: &[u64]) -> Result<Table> {
        let combined = self.to_batch()?;
        let indices = UInt64Array::from(indices.to_vec());
        let taken = take_record_batch(&combined, &indices)?;
        Ok(Table::new(self.schema(), vec![taken]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn batch(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "v",
            DataType::Int32,
            true,
        )]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn concatenates_chunks() {
        let table =
            Table::from_record_batches(vec![batch(vec![1, 2]), batch(vec![3])]).unwrap();
        assert_eq!(table.num_rows(), 3);
        let combined = table.to_batch().unwrap();
        assert_eq!(combined.num_rows(), 3);
    }

    #[test]
    fn take_preserves_request_order() {
        let table = Table::from_record_batches(vec![batch(vec![10, 20, 30, 40])])
            .unwrap();
        let taken = table.take(&[3, 1, 1]).unwrap();
        let col = taken.to_batch().unwrap();
        let col = col.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(col.values(), &[40, 20, 20]);
    }

    #[test]
    fn empty_table_keeps_schema() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "v",
            DataType::Int32,
            true,
        )]));
        let table = Table::new(Arc::clone(&schema), vec![]);
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.to_batch().unwrap().num_rows(), 0);
        assert_eq!(table.schema(), schema);
    }
}
