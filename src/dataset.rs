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

//! Datasets: ordered collections of fragments under a unified schema.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::expression::Expression;
use crate::fragment::{Fragment, InMemoryFragment};
use crate::invalid_err;

/// A fallible iterator of fragments, in enumeration order. The position of a
/// fragment in this sequence is its enumeration index for the scan, the
/// primary ordering key of the ordered batch stream.
pub type FragmentIterator = Box<dyn Iterator<Item = Result<Arc<dyn Fragment>>> + Send>;

/// An immutable logical dataset. Constructed once per query; enumeration is
/// lazy and may prune fragments the predicate rules out.
pub trait Dataset: fmt::Debug + Send + Sync {
    /// The unified schema all scan output is expressed in.
    fn schema(&self) -> SchemaRef;

    /// Enumerate fragments that may contain rows matching `predicate`.
    fn get_fragments(&self, predicate: &Expression) -> Result<FragmentIterator>;

    fn type_name(&self) -> &'static str;
}

/// A dataset over batches already resident in memory, exposed as a single
/// fragment.
#[derive(Debug)]
pub struct InMemoryDataset {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl InMemoryDataset {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }
}

impl Dataset for InMemoryDataset {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn get_fragments(&self, _predicate: &Expression) -> Result<FragmentIterator> {
        let fragment: Arc<dyn Fragment> = Arc::new(InMemoryFragment::with_schema(
            Arc::clone(&self.schema),
            self.batches.clone(),
        ));
        Ok(Box::new(std::iter::once(Ok(fragment))))
    }

    fn type_name(&self) -> &'static str {
        "in-memory"
    }
}

/// A dataset wrapping an explicit fragment list.
#[derive(Debug)]
pub struct FragmentDataset {
    schema: SchemaRef,
    fragments: Vec<Arc<dyn Fragment>>,
}

impl FragmentDataset {
    pub fn new(schema: SchemaRef, fragments: Vec<Arc<dyn Fragment>>) -> Self {
        Self { schema, fragments }
    }
}

impl Dataset for FragmentDataset {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn get_fragments(&self, _predicate: &Expression) -> Result<FragmentIterator> {
        Ok(Box::new(self.fragments.clone().into_iter().map(Ok)))
    }

    fn type_name(&self) -> &'static str {
        "fragment"
    }
}

/// The union of several child datasets sharing one schema. Fragments are
/// enumerated child by child, in construction order.
#[derive(Debug)]
pub struct UnionDataset {
    schema: SchemaRef,
    children: Vec<Arc<dyn Dataset>>,
}

impl UnionDataset {
    pub fn try_new(schema: SchemaRef, children: Vec<Arc<dyn Dataset>>) -> Result<Self> {
        for child in &children {
            if child.schema() != schema {
                return invalid_err!(
                    "child dataset schema does not match the union schema"
                );
            }
        }
        Ok(Self { schema, children })
    }
}

impl Dataset for UnionDataset {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn get_fragments(&self, predicate: &Expression) -> Result<FragmentIterator> {
        let iterators = self
            .children
            .iter()
            .map(|child| child.get_fragments(predicate))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(iterators.into_iter().flatten()))
    }

    fn type_name(&self) -> &'static str {
        "union"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::literal;
    use crate::test_util::{test_schema, zeroes_batch};
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn union_enumerates_children_in_order() {
        let schema = test_schema();
        let child: Arc<dyn Dataset> = Arc::new(InMemoryDataset::new(
            Arc::clone(&schema),
            vec![zeroes_batch(1, &schema)],
        ));
        let union =
            UnionDataset::try_new(Arc::clone(&schema), vec![child.clone(), child])
                .unwrap();
        let fragments: Vec<_> =
            union.get_fragments(&literal(true)).unwrap().collect();
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn union_rejects_mismatched_children() {
        let schema = test_schema();
        let other = Arc::new(Schema::new(vec![Field::new(
            "other",
            DataType::Int32,
            true,
        )]));
        let child: Arc<dyn Dataset> = Arc::new(InMemoryDataset::new(other, vec![]));
        assert!(UnionDataset::try_new(schema, vec![child]).is_err());
    }
}
