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

//! Resolution of global row positions against the ordered batch stream.
//!
//! Both operations here stream in enumeration order and stop pulling the
//! moment the request is satisfied, so fragments past the needed prefix are
//! never scanned.

use arrow::array::UInt64Array;
use arrow::compute::take_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use futures::TryStreamExt;

use crate::error::Result;
use crate::index_err;
use crate::reorder::TaggedRecordBatchStream;
use crate::table::Table;

/// The first `num_rows` rows of the stream, the final batch sliced to land
/// exactly on the requested count.
pub(crate) async fn head(
    schema: SchemaRef,
    mut batches: TaggedRecordBatchStream,
    num_rows: usize,
) -> Result<Table> {
    let mut collected = vec![];
    let mut remaining = num_rows;
    while remaining > 0 {
        let Some(tagged) = batches.try_next().await? else {
            break;
        };
        let batch = tagged.record_batch;
        if batch.num_rows() >= remaining {
            collected.push(batch.slice(0, remaining));
            remaining = 0;
        } else {
            remaining -= batch.num_rows();
            collected.push(batch);
        }
    }
    Ok(Table::new(schema, collected))
}

/// Gather rows by global position across the stream, returning them in the
/// order requested.
///
/// Works on one pass: the requested positions are visited in sorted order
/// while batches stream by, each batch contributing its matching rows via a
/// local gather, and a final gather restores the caller's order. Positions
/// past the end of the stream fail with an index error naming up to three
/// offending values.
pub(crate) async fn take_rows(
    schema: SchemaRef,
    mut batches: TaggedRecordBatchStream,
    indices: &[u64],
) -> Result<Table> {
    // stable argsort, so duplicate positions stay in request order
    let mut order: Vec<usize> = (0..indices.len()).collect();
    order.sort_by_key(|&i| indices[i]);

    let mut taken: Vec<RecordBatch> = vec![];
    let mut cursor = 0;
    let mut offset: u64 = 0;
    while cursor < order.len() {
        let Some(tagged) = batches.try_next().await? else {
            break;
        };
        let batch = tagged.record_batch;
        let end = offset + batch.num_rows() as u64;
        let mut local = vec![];
        while cursor < order.len() && indices[order[cursor]] < end {
            local.push(indices[order[cursor]] - offset);
            cursor += 1;
        }
        if !local.is_empty() {
            taken.push(take_record_batch(&batch, &UInt64Array::from(local))?);
        }
        offset = end;
    }

    if cursor < order.len() {
        let offending: Vec<u64> =
            order[cursor..].iter().map(|&i| indices[i]).collect();
        let suffix = if offending.len() > 3 { ", ..." } else { "" };
        let listed = offending
            .iter()
            .take(3)
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return index_err!("Some indices were out of bounds: {listed}{suffix}");
    }

    // invert the argsort to restore the caller's order
    let mut positions = vec![0u64; indices.len()];
    for (sorted_position, &request_position) in order.iter().enumerate() {
        positions[request_position] = sorted_position as u64;
    }
    Table::new(schema, taken).take(&positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatasetError;
    use crate::reorder::TaggedRecordBatch;
    use crate::test_util::{ramp_batch, test_schema};
    use arrow::array::{Array, Int32Array};
    use futures::stream::{self, StreamExt};

    fn tagged_stream(batches: Vec<RecordBatch>) -> TaggedRecordBatchStream {
        stream::iter(batches.into_iter().enumerate().map(|(i, record_batch)| {
            Ok(TaggedRecordBatch {
                record_batch,
                fragment_index: i,
            })
        }))
        .boxed()
    }

    fn three_batches() -> Vec<RecordBatch> {
        // i32 column holds 0..12 across three batches of four rows
        let schema = test_schema();
        vec![
            ramp_batch(0, 4, &schema),
            ramp_batch(4, 4, &schema),
            ramp_batch(8, 4, &schema),
        ]
    }

    fn i32_values(table: &Table) -> Vec<i32> {
        let combined = table.to_batch().unwrap();
        let column = combined.column_by_name("i32").unwrap();
        column
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[tokio::test]
    async fn head_slices_to_exact_count() {
        let table = head(test_schema(), tagged_stream(three_batches()), 6)
            .await
            .unwrap();
        assert_eq!(i32_values(&table), [0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn head_zero_is_empty_with_schema() {
        let table = head(test_schema(), tagged_stream(three_batches()), 0)
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.schema(), test_schema());
    }

    #[tokio::test]
    async fn head_past_the_end_returns_everything() {
        let table = head(test_schema(), tagged_stream(three_batches()), 100)
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 12);
    }

    #[tokio::test]
    async fn take_restores_request_order() {
        let table = take_rows(
            test_schema(),
            tagged_stream(three_batches()),
            &[9, 1, 5, 1],
        )
        .await
        .unwrap();
        assert_eq!(i32_values(&table), [9, 1, 5, 1]);
    }

    #[tokio::test]
    async fn take_out_of_bounds_lists_offenders() {
        let err = take_rows(
            test_schema(),
            tagged_stream(three_batches()),
            &[1, 30, 0, 12, 45],
        )
        .await
        .unwrap_err();
        match err {
            DatasetError::Index(message) => {
                assert_eq!(
                    message,
                    "Some indices were out of bounds: 12, 30, 45"
                );
            }
            other => panic!("expected an index error, got {other}"),
        }
    }

    #[tokio::test]
    async fn take_out_of_bounds_truncates_to_three() {
        let err = take_rows(
            test_schema(),
            tagged_stream(three_batches()),
            &[99, 12, 0, 13, 14],
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Index error: Some indices were out of bounds: 12, 13, 14, ..."
        );
    }

    #[tokio::test]
    async fn take_empty_indices_is_empty_table() {
        let table = take_rows(test_schema(), tagged_stream(three_batches()), &[])
            .await
            .unwrap();
        assert_eq!(table.num_rows(), 0);
    }
}
