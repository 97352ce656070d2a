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

//! The per-batch pipeline applied between a fragment and the reordering
//! engine: materialize missing columns, filter, project, slice.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef};
use arrow::compute::cast;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use crate::error::Result;
use crate::expression::{filter_batch, Expression, ScalarValue};
use crate::fragment::Fragment;
use crate::options::ScanOptions;

/// Applies one scan's filter and projection to the raw batches of one
/// fragment.
///
/// Construction captures the fragment's partition expression: a dataset
/// column the fragment's physical schema lacks is materialized as a constant
/// when the partition expression pins it to one, and as nulls otherwise.
#[derive(Debug)]
pub struct BatchProjector {
    dataset_schema: SchemaRef,
    projected_schema: SchemaRef,
    filter: Expression,
    projection: Option<Vec<(Expression, String)>>,
    known_values: HashMap<String, ScalarValue>,
    batch_size: usize,
}

impl BatchProjector {
    pub fn new(options: &ScanOptions, fragment: &dyn Fragment) -> Self {
        Self {
            dataset_schema: Arc::clone(&options.dataset_schema),
            projected_schema: options.projected_schema(),
            filter: options.filter.clone(),
            projection: options.projection().map(<[_]>::to_vec),
            known_values: fragment.partition_expression().known_field_values(),
            batch_size: options.batch_size,
        }
    }

    /// Schema of the batches [`BatchProjector::process`] produces.
    pub fn projected_schema(&self) -> SchemaRef {
        Arc::clone(&self.projected_schema)
    }

    /// Run one raw batch through the pipeline. The result is split into
    /// chunks of at most `batch_size` rows, so one input batch may become
    /// several output batches.
    pub fn process(&self, batch: RecordBatch) -> Result<Vec<RecordBatch>> {
        let batch = self.augment(batch)?;
        let batch = if self.filter.is_always_true() {
            batch
        } else {
            filter_batch(&self.filter, &batch)?
        };
        let batch = self.project(batch)?;
        Ok(self.slice(batch))
    }

    /// Reshape a physical batch to the dataset schema: columns the batch
    /// lacks are filled from the partition expression's pinned values, or
    /// with nulls. Physical columns outside the dataset schema are dropped.
    fn augment(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let num_rows = batch.num_rows();
        let columns = self
            .dataset_schema
            .fields()
            .iter()
            .map(|field| {
                let column: ArrayRef = match batch.column_by_name(field.name()) {
                    Some(col) => Arc::clone(col),
                    None => match self.known_values.get(field.name()) {
                        Some(value) => value.to_array(num_rows),
                        None => new_null_array(field.data_type(), num_rows),
                    },
                };
                if column.data_type() == field.data_type() {
                    Ok(column)
                } else {
                    Ok(cast(column.as_ref(), field.data_type())?)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        Ok(RecordBatch::try_new_with_options(
            Arc::clone(&self.dataset_schema),
            columns,
            &options,
        )?)
    }

    fn project(&self, batch: RecordBatch) -> Result<RecordBatch> {
        let Some(projection) = &self.projection else {
            // identity projection, the batch already has the dataset schema
            return Ok(batch);
        };
        let columns = projection
            .iter()
            .map(|(expr, _)| expr.evaluate(&batch))
            .collect::<Result<Vec<_>>>()?;
        let options =
            RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        Ok(RecordBatch::try_new_with_options(
            self.projected_schema(),
            columns,
            &options,
        )?)
    }

    /// Slicing shares the underlying buffers, so this is cheap even for
    /// large batches.
    fn slice(&self, batch: RecordBatch) -> Vec<RecordBatch> {
        if batch.num_rows() <= self.batch_size {
            return vec![batch];
        }
        let mut chunks = vec![];
        let mut offset = 0;
        while offset < batch.num_rows() {
            let length = self.batch_size.min(batch.num_rows() - offset);
            chunks.push(batch.slice(offset, length));
            offset += length;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{eq, field_ref, gt, literal, multiply};
    use crate::fragment::InMemoryFragment;
    use arrow::array::{Float64Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    fn dataset_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("i32", DataType::Int32, true),
            Field::new("f64", DataType::Float64, true),
        ]))
    }

    fn i32_only_batch(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "i32",
            DataType::Int32,
            true,
        )]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))])
            .unwrap()
    }

    fn full_batch(values: Vec<i32>) -> RecordBatch {
        let floats: Vec<f64> = values.iter().map(|v| *v as f64).collect();
        RecordBatch::try_new(
            dataset_schema(),
            vec![
                Arc::new(Int32Array::from(values)),
                Arc::new(Float64Array::from(floats)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn missing_column_becomes_nulls() {
        let fragment = InMemoryFragment::new(vec![]);
        let options = ScanOptions::new(dataset_schema());
        let projector = BatchProjector::new(&options, &fragment);

        let out = projector.process(i32_only_batch(vec![1, 2])).unwrap();
        assert_eq!(out.len(), 1);
        let f64_col = out[0].column_by_name("f64").unwrap();
        assert_eq!(f64_col.null_count(), 2);
    }

    #[test]
    fn missing_column_pinned_by_partition_expression() {
        let fragment = InMemoryFragment::new(vec![])
            .with_partition_expression(eq(field_ref("f64"), literal(2.5)));
        let options = ScanOptions::new(dataset_schema());
        let projector = BatchProjector::new(&options, &fragment);

        let out = projector.process(i32_only_batch(vec![1, 2])).unwrap();
        let f64_col = out[0].column_by_name("f64").unwrap();
        let f64_col = f64_col.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(f64_col.values(), &[2.5, 2.5]);
    }

    #[test]
    fn filter_then_project_expression() {
        let fragment = InMemoryFragment::new(vec![]);
        let mut options = ScanOptions::new(dataset_schema());
        options.filter = gt(field_ref("i32"), literal(2));
        options
            .set_projection(
                vec![multiply(field_ref("i32"), literal(10))],
                vec!["i32 * 10".to_string()],
            )
            .unwrap();
        let projector = BatchProjector::new(&options, &fragment);

        let out = projector.process(full_batch(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].schema(), projector.projected_schema());
        let col = out[0].column(0);
        let col = col.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(col.values(), &[30, 40]);
    }

    #[test]
    fn empty_projection_keeps_row_count() {
        let fragment = InMemoryFragment::new(vec![]);
        let mut options = ScanOptions::new(dataset_schema());
        options.set_projection(vec![], vec![]).unwrap();
        let projector = BatchProjector::new(&options, &fragment);

        let out = projector.process(full_batch(vec![1, 2, 3])).unwrap();
        assert_eq!(out[0].num_columns(), 0);
        assert_eq!(out[0].num_rows(), 3);
    }

    #[test]
    fn oversized_batches_are_sliced() {
        let fragment = InMemoryFragment::new(vec![]);
        let mut options = ScanOptions::new(dataset_schema());
        options.batch_size = 4;
        let projector = BatchProjector::new(&options, &fragment);

        let out = projector.process(full_batch((0..10).collect())).unwrap();
        let lengths: Vec<_> = out.iter().map(RecordBatch::num_rows).collect();
        assert_eq!(lengths, [4, 4, 2]);
    }
}
