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

//! A small expression collaborator for filters and projections.
//!
//! Scanning needs just enough of a compute layer to evaluate filter
//! predicates and projection expressions against a [`RecordBatch`], and to
//! introspect which fields an expression references. Anything fancier
//! (function registries, coercion rules, simplification) is out of scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::compute::kernels::boolean;
use arrow::compute::kernels::cmp;
use arrow::compute::kernels::numeric;
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{DatasetError, Result};
use crate::not_impl_err;

/// A typed constant usable as a literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
        }
    }

    /// Broadcast this value into an array of `num_rows` copies.
    pub fn to_array(&self, num_rows: usize) -> ArrayRef {
        match self {
            ScalarValue::Boolean(v) => {
                Arc::new(BooleanArray::from(vec![*v; num_rows]))
            }
            ScalarValue::Int32(v) => Arc::new(Int32Array::from(vec![*v; num_rows])),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; num_rows])),
            ScalarValue::Float64(v) => {
                Arc::new(Float64Array::from(vec![*v; num_rows]))
            }
            ScalarValue::Utf8(v) => {
                Arc::new(StringArray::from(vec![v.as_str(); num_rows]))
            }
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int32(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(v.to_string())
    }
}

/// A reference to a (possibly nested) field by name.
///
/// Nested references can be constructed and carried around, but the scanner
/// rejects them at validation time with `NotImplemented`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub name: String,
    pub nested: Vec<String>,
}

impl FieldPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nested: vec![],
        }
    }

    pub fn nested(name: impl Into<String>, nested: Vec<String>) -> Self {
        Self {
            name: name.into(),
            nested,
        }
    }

    pub fn is_nested(&self) -> bool {
        !self.nested.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for part in &self.nested {
            write!(f, ".{part}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Multiply,
}

impl BinaryOp {
    fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "+",
            BinaryOp::Multiply => "*",
        };
        write!(f, "{s}")
    }
}

/// A filter or projection expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(ScalarValue),
    Field(FieldPath),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

/// Reference a top-level field by name.
pub fn field_ref(name: impl Into<String>) -> Expression {
    Expression::Field(FieldPath::new(name))
}

/// Reference a nested field. Carried through to validation, where the
/// scanner reports it as not implemented.
pub fn nested_field_ref(name: impl Into<String>, nested: Vec<String>) -> Expression {
    Expression::Field(FieldPath::nested(name, nested))
}

pub fn literal(value: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(value.into())
}

fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Eq, left, right)
}

pub fn not_eq(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::NotEq, left, right)
}

pub fn lt(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Lt, left, right)
}

pub fn lt_eq(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::LtEq, left, right)
}

pub fn gt(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Gt, left, right)
}

pub fn gt_eq(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::GtEq, left, right)
}

pub fn and(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::And, left, right)
}

pub fn or(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Or, left, right)
}

pub fn add(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Add, left, right)
}

pub fn multiply(left: Expression, right: Expression) -> Expression {
    binary(BinaryOp::Multiply, left, right)
}

impl Expression {
    /// True if this is the trivially true predicate, i.e. no filtering.
    pub fn is_always_true(&self) -> bool {
        matches!(self, Expression::Literal(ScalarValue::Boolean(true)))
    }

    /// Every field reference in the expression, in depth-first, left-to-right
    /// traversal order. Duplicates are preserved.
    pub fn field_references(&self) -> Vec<&FieldPath> {
        let mut refs = vec![];
        self.collect_field_references(&mut refs);
        refs
    }

    fn collect_field_references<'a>(&'a self, refs: &mut Vec<&'a FieldPath>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Field(path) => refs.push(path),
            Expression::Binary { left, right, .. } => {
                left.collect_field_references(refs);
                right.collect_field_references(refs);
            }
        }
    }

    /// The output type of this expression against `schema`.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType> {
        match self {
            Expression::Literal(v) => Ok(v.data_type()),
            Expression::Field(path) => {
                if path.is_nested() {
                    return not_impl_err!("nested field reference {path}");
                }
                Ok(schema
                    .field_with_name(&path.name)
                    .map_err(|_| {
                        DatasetError::Invalid(format!(
                            "No match for field reference {path} in schema"
                        ))
                    })?
                    .data_type()
                    .clone())
            }
            Expression::Binary { op, left, right } => {
                if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    return Ok(DataType::Boolean);
                }
                let l = left.data_type(schema)?;
                let r = right.data_type(schema)?;
                common_numeric_type(&l, &r).ok_or_else(|| {
                    DatasetError::Invalid(format!(
                        "Cannot apply {op} to operands of type {l} and {r}"
                    ))
                })
            }
        }
    }

    /// Evaluate against a batch, producing one value per row.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        match self {
            Expression::Literal(v) => Ok(v.to_array(batch.num_rows())),
            Expression::Field(path) => {
                if path.is_nested() {
                    return not_impl_err!("nested field reference {path}");
                }
                batch.column_by_name(&path.name).cloned().ok_or_else(|| {
                    DatasetError::Execution(format!(
                        "field reference {path} not present in batch"
                    ))
                })
            }
            Expression::Binary { op, left, right } => {
                let l = left.evaluate(batch)?;
                let r = right.evaluate(batch)?;
                evaluate_binary(*op, l, r)
            }
        }
    }

    /// Field values this expression pins to a constant, assuming the
    /// expression is known to hold. Only conjunctions of `field == literal`
    /// contribute; anything else is conservatively ignored.
    pub fn known_field_values(&self) -> HashMap<String, ScalarValue> {
        let mut known = HashMap::new();
        self.collect_known_field_values(&mut known);
        known
    }

    fn collect_known_field_values(&self, known: &mut HashMap<String, ScalarValue>) {
        if let Expression::Binary { op, left, right } = self {
            match op {
                BinaryOp::And => {
                    left.collect_known_field_values(known);
                    right.collect_known_field_values(known);
                }
                BinaryOp::Eq => match (left.as_ref(), right.as_ref()) {
                    (Expression::Field(path), Expression::Literal(v))
                    | (Expression::Literal(v), Expression::Field(path))
                        if !path.is_nested() =>
                    {
                        known.insert(path.name.clone(), v.clone());
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{v}"),
            Expression::Field(path) => write!(f, "{path}"),
            Expression::Binary { op, left, right } => {
                write!(f, "({left} {op} {right})")
            }
        }
    }
}

fn numeric_rank(dt: &DataType) -> Option<u8> {
    match dt {
        DataType::Int8 => Some(1),
        DataType::Int16 => Some(2),
        DataType::Int32 => Some(3),
        DataType::Int64 => Some(4),
        DataType::Float32 => Some(5),
        DataType::Float64 => Some(6),
        _ => None,
    }
}

/// The wider of two numeric types, or `None` when the pair is not numeric.
fn common_numeric_type(l: &DataType, r: &DataType) -> Option<DataType> {
    if l == r {
        return Some(l.clone());
    }
    let (lr, rr) = (numeric_rank(l)?, numeric_rank(r)?);
    Some(if lr >= rr { l.clone() } else { r.clone() })
}

/// Cast both sides to their common type when the kernel requires it.
fn coerce_pair(l: ArrayRef, r: ArrayRef) -> Result<(ArrayRef, ArrayRef)> {
    if l.data_type() == r.data_type() {
        return Ok((l, r));
    }
    let common =
        common_numeric_type(l.data_type(), r.data_type()).ok_or_else(|| {
            DatasetError::Invalid(format!(
                "Cannot compare operands of type {} and {}",
                l.data_type(),
                r.data_type()
            ))
        })?;
    Ok((cast(l.as_ref(), &common)?, cast(r.as_ref(), &common)?))
}

fn as_boolean(array: &ArrayRef) -> Result<&BooleanArray> {
    array.as_any().downcast_ref::<BooleanArray>().ok_or_else(|| {
        DatasetError::Execution(format!(
            "expected a boolean operand, got {}",
            array.data_type()
        ))
    })
}

fn evaluate_binary(op: BinaryOp, left: ArrayRef, right: ArrayRef) -> Result<ArrayRef> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            let l = as_boolean(&left)?;
            let r = as_boolean(&right)?;
            let out = match op {
                BinaryOp::And => boolean::and(l, r)?,
                _ => boolean::or(l, r)?,
            };
            Ok(Arc::new(out))
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => {
            let (l, r) = coerce_pair(left, right)?;
            let out = match op {
                BinaryOp::Eq => cmp::eq(&l, &r)?,
                BinaryOp::NotEq => cmp::neq(&l, &r)?,
                BinaryOp::Lt => cmp::lt(&l, &r)?,
                BinaryOp::LtEq => cmp::lt_eq(&l, &r)?,
                BinaryOp::Gt => cmp::gt(&l, &r)?,
                _ => cmp::gt_eq(&l, &r)?,
            };
            Ok(Arc::new(out))
        }
        BinaryOp::Add | BinaryOp::Multiply => {
            let (l, r) = coerce_pair(left, right)?;
            let out = match op {
                BinaryOp::Add => numeric::add(&l, &r)?,
                _ => numeric::mul(&l, &r)?,
            };
            Ok(out)
        }
    }
}

/// Evaluate `filter` against `batch` and keep the rows where it holds.
pub fn filter_batch(filter: &Expression, batch: &RecordBatch) -> Result<RecordBatch> {
    let mask = filter.evaluate(batch)?;
    let mask = as_boolean(&mask)?;
    Ok(filter_record_batch(batch, mask)?)
}
