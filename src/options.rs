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

//! Scan configuration and the materialization analyzer.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::error::Result;
use crate::expression::{field_ref, literal, Expression};
use crate::{invalid_err, not_impl_err};

/// Rows per output batch when the caller does not cap it.
pub const DEFAULT_BATCH_SIZE: usize = 1 << 17;

/// Fragments concurrently polled ahead of the one being drained.
pub const DEFAULT_FRAGMENT_READAHEAD: usize = 4;

/// Capacity of the per-fragment batch channel on the threaded sync path.
pub const DEFAULT_BATCH_READAHEAD: usize = 32;

/// Configuration for one scan.
///
/// `filter` and `dataset_schema` are plain fields; the projection is managed
/// through [`ScanOptions::set_projection`] /
/// [`ScanOptions::set_projection_names`] so the projected output schema stays
/// consistent with the expression list.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// The unified schema the scan is expressed against.
    pub dataset_schema: SchemaRef,
    /// Rows that fail this predicate are excluded from the output.
    pub filter: Expression,
    /// Maximum rows per yielded batch; larger source batches are sliced.
    pub batch_size: usize,
    /// Execute synchronous scan tasks on the blocking thread pool.
    pub use_threads: bool,
    /// Drive fragments through their asynchronous batch generators rather
    /// than scan tasks.
    pub use_async: bool,
    /// Fragments concurrently polled ahead of the one being drained.
    pub fragment_readahead: usize,
    /// Batches buffered per fragment on the threaded sync path.
    pub batch_readahead: usize,
    /// `None` means project every dataset column unchanged.
    projection: Option<Vec<(Expression, String)>>,
    projected_schema: SchemaRef,
}

impl ScanOptions {
    pub fn new(dataset_schema: SchemaRef) -> Self {
        Self {
            projected_schema: Arc::clone(&dataset_schema),
            dataset_schema,
            filter: literal(true),
            batch_size: DEFAULT_BATCH_SIZE,
            use_threads: false,
            use_async: false,
            fragment_readahead: DEFAULT_FRAGMENT_READAHEAD,
            batch_readahead: DEFAULT_BATCH_READAHEAD,
            projection: None,
        }
    }

    /// Project the named columns, in the given order. Names may repeat. An
    /// empty list is legal and produces zero-column, row-count-preserving
    /// batches.
    pub fn set_projection_names(&mut self, columns: &[&str]) -> Result<()> {
        let exprs = columns.iter().map(|c| field_ref(*c)).collect::<Vec<_>>();
        let names = columns.iter().map(|c| c.to_string()).collect();
        self.set_projection(exprs, names)
    }

    /// Project one expression per output name. Every field referenced must
    /// exist (non-nested) in the dataset schema.
    pub fn set_projection(
        &mut self,
        expressions: Vec<Expression>,
        names: Vec<String>,
    ) -> Result<()> {
        if expressions.len() != names.len() {
            return invalid_err!(
                "projection expects one output name per expression, got {} \
                 expressions and {} names",
                expressions.len(),
                names.len()
            );
        }
        for expr in &expressions {
            check_fields(expr, &self.dataset_schema)?;
        }
        let fields = expressions
            .iter()
            .zip(&names)
            .map(|(expr, name)| {
                Ok(Field::new(name, expr.data_type(&self.dataset_schema)?, true))
            })
            .collect::<Result<Vec<_>>>()?;
        self.projected_schema = Arc::new(Schema::new(fields));
        self.projection = Some(expressions.into_iter().zip(names).collect());
        Ok(())
    }

    /// The projection expression list, or `None` for the identity
    /// projection.
    pub fn projection(&self) -> Option<&[(Expression, String)]> {
        self.projection.as_deref()
    }

    /// Schema of the batches the scan yields.
    pub fn projected_schema(&self) -> SchemaRef {
        Arc::clone(&self.projected_schema)
    }

    /// The ordered, duplicate-permitting list of fields the physical reader
    /// must materialize: fields referenced by the filter first, in
    /// expression traversal order, then fields referenced by each projection
    /// expression, in projection order. A field reported twice is required
    /// by more than one clause; the reader may use that as a hint but the
    /// report itself is never deduplicated.
    pub fn materialized_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .filter
            .field_references()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        match &self.projection {
            Some(projection) => {
                for (expr, _) in projection {
                    fields.extend(
                        expr.field_references().iter().map(|p| p.name.clone()),
                    );
                }
            }
            None => {
                fields.extend(
                    self.dataset_schema
                        .fields()
                        .iter()
                        .map(|f| f.name().clone()),
                );
            }
        }
        fields
    }
}

/// Validate that every field an expression references exists, non-nested, in
/// `schema`.
pub(crate) fn check_fields(expr: &Expression, schema: &Schema) -> Result<()> {
    for path in expr.field_references() {
        if path.is_nested() {
            return not_impl_err!("nested field reference {path}");
        }
        if schema.field_with_name(&path.name).is_err() {
            return invalid_err!(
                "No match for field reference {path} in dataset schema"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{add, eq, lt, multiply};
    use arrow::datatypes::DataType;

    fn schema_i32_i64() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("i32", DataType::Int32, true),
            Field::new("i64", DataType::Int64, true),
        ]))
    }

    #[test]
    fn materialized_fields_ordering() {
        // empty dataset, project nothing = nothing materialized
        let mut opts = ScanOptions::new(Arc::new(Schema::empty()));
        opts.set_projection(vec![], vec![]).unwrap();
        assert!(opts.materialized_fields().is_empty());

        // non-empty dataset, project nothing = nothing materialized
        let mut opts = ScanOptions::new(schema_i32_i64());
        opts.set_projection(vec![], vec![]).unwrap();
        assert!(opts.materialized_fields().is_empty());

        // project nothing, filter on i32 = materialize i32
        opts.filter = eq(field_ref("i32"), literal(10));
        assert_eq!(opts.materialized_fields(), ["i32"]);

        // project i32 & i64, filter nothing = materialize i32 & i64
        opts.filter = literal(true);
        opts.set_projection_names(&["i32", "i64"]).unwrap();
        assert_eq!(opts.materialized_fields(), ["i32", "i64"]);

        // project i32 + i64, filter nothing = materialize i32 & i64
        opts.set_projection(
            vec![add(field_ref("i32"), field_ref("i64"))],
            vec!["i32 + i64".to_string()],
        )
        .unwrap();
        assert_eq!(opts.materialized_fields(), ["i32", "i64"]);

        // project i32, filter on i32 = i32 reported twice
        opts.set_projection_names(&["i32"]).unwrap();
        opts.filter = eq(field_ref("i32"), literal(10));
        assert_eq!(opts.materialized_fields(), ["i32", "i32"]);

        // project i32, filter on i32 < i64 = filter fields first
        opts.filter = lt(field_ref("i32"), field_ref("i64"));
        assert_eq!(opts.materialized_fields(), ["i32", "i64", "i32"]);

        // project i32, filter on i64
        opts.filter = eq(field_ref("i64"), literal(10i64));
        assert_eq!(opts.materialized_fields(), ["i64", "i32"]);
    }

    #[test]
    fn projection_validation() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("b", DataType::Boolean, true),
            Field::new("i8", DataType::Int8, true),
            Field::new("i16", DataType::Int16, true),
            Field::new("i32", DataType::Int32, true),
            Field::new("i64", DataType::Int64, true),
        ]));
        let mut opts = ScanOptions::new(schema);

        // requesting no columns is legal; a later filter may still
        // materialize fields
        opts.set_projection(vec![], vec![]).unwrap();
        opts.set_projection_names(&["i64", "b", "i8"]).unwrap();
        opts.set_projection_names(&["i16", "i16"]).unwrap();
        opts.set_projection(
            vec![
                field_ref("i16"),
                multiply(field_ref("i16"), literal(2)),
            ],
            vec!["i16 renamed".to_string(), "i16 * 2".to_string()],
        )
        .unwrap();
        assert_eq!(
            opts.projected_schema().field(1).data_type(),
            &DataType::Int32
        );

        use crate::error::DatasetError;
        assert!(matches!(
            opts.set_projection_names(&["not_found_column"]),
            Err(DatasetError::Invalid(_))
        ));
        assert!(matches!(
            opts.set_projection_names(&["i8", "not_found_column"]),
            Err(DatasetError::Invalid(_))
        ));
        assert!(matches!(
            opts.set_projection(
                vec![
                    field_ref("not_found_column"),
                    multiply(field_ref("i16"), literal(2)),
                ],
                vec!["i16 renamed".to_string(), "i16 * 2".to_string()],
            ),
            Err(DatasetError::Invalid(_))
        ));
        assert!(matches!(
            opts.set_projection(
                vec![crate::expression::nested_field_ref(
                    "nested",
                    vec!["column".to_string()],
                )],
                vec!["nested column".to_string()],
            ),
            Err(DatasetError::NotImplemented(_))
        ));

        // provided more field names than column exprs or vice versa
        assert!(matches!(
            opts.set_projection(
                vec![],
                vec!["i16 renamed".to_string(), "i16 * 2".to_string()],
            ),
            Err(DatasetError::Invalid(_))
        ));
        assert!(matches!(
            opts.set_projection(
                vec![literal(2), field_ref("i64")],
                vec!["a".to_string()],
            ),
            Err(DatasetError::Invalid(_))
        ));
    }
}
