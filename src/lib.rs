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

//! Scan logical datasets of Arrow record batches.
//!
//! A [`Dataset`](dataset::Dataset) is an ordered collection of
//! [`Fragment`](fragment::Fragment)s, each an independent source of record
//! batches. A [`Scanner`] drains them into one output stream, applying a
//! filter and projection per batch, with bounded fragment read-ahead and a
//! choice between strict enumeration order and tagged arrival order.
//!
//! ```
//! use std::sync::Arc;
//!
//! use arrow::array::Int64Array;
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use arrow_dataset::dataset::InMemoryDataset;
//! use arrow_dataset::expression::{field_ref, gt, literal};
//! use arrow_dataset::ScannerBuilder;
//!
//! # fn main() -> arrow_dataset::Result<()> {
//! let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, true)]));
//! let batch = RecordBatch::try_new(
//!     Arc::clone(&schema),
//!     vec![Arc::new(Int64Array::from(vec![1, 2, 3, 4]))],
//! )?;
//! let dataset = Arc::new(InMemoryDataset::new(schema, vec![batch]));
//!
//! let scanner = ScannerBuilder::new(dataset)
//!     .filter(gt(field_ref("x"), literal(2i64)))?
//!     .finish()?;
//! let table = futures::executor::block_on(scanner.to_table())?;
//! assert_eq!(table.num_rows(), 2);
//! # Ok(())
//! # }
//! ```

pub mod dataset;
pub mod error;
pub mod expression;
pub mod fragment;
pub mod options;
mod projector;
pub mod reorder;
mod row_index;
pub mod scanner;
pub mod stream;
pub mod table;
pub mod test_util;

pub use error::{DatasetError, Result};
pub use options::ScanOptions;
pub use reorder::{
    EnumeratedRecordBatch, EnumeratedRecordBatchStream, TaggedRecordBatch,
    TaggedRecordBatchStream,
};
pub use scanner::{Scanner, ScannerBuilder};
pub use table::Table;
