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

//! Dataset error types

use std::error;
use std::fmt::{Display, Formatter};
use std::result;

use arrow::error::ArrowError;

/// Result type for operations that could result in a [DatasetError]
pub type Result<T> = result::Result<T, DatasetError>;

/// Dataset error
#[derive(Debug)]
pub enum DatasetError {
    /// Error returned by arrow.
    ArrowError(ArrowError),
    /// Error returned when the caller supplied an invalid configuration:
    /// an unknown field reference, mismatched projection expression and
    /// output-name counts, a zero batch size, and the like.
    Invalid(String),
    /// Error returned on a branch that we know is possible but to which we
    /// still have no implementation for, e.g. nested field references.
    NotImplemented(String),
    /// Error returned when a requested row index falls outside the scanned
    /// dataset. Distinct from [DatasetError::Invalid] so callers can tell a
    /// bad gather apart from a bad scan configuration.
    Index(String),
    /// Error returned while producing batches for an otherwise valid scan.
    Execution(String),
    /// Error raised when one of the crate's internal invariants is broken.
    /// This error should not happen in normal usage.
    Internal(String),
}

impl From<ArrowError> for DatasetError {
    fn from(e: ArrowError) -> Self {
        DatasetError::ArrowError(e)
    }
}

impl From<DatasetError> for ArrowError {
    fn from(e: DatasetError) -> Self {
        match e {
            DatasetError::ArrowError(e) => e,
            other => ArrowError::ExternalError(Box::new(other)),
        }
    }
}

impl Display for DatasetError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match *self {
            DatasetError::ArrowError(ref desc) => write!(f, "Arrow error: {desc}"),
            DatasetError::Invalid(ref desc) => write!(f, "Invalid: {desc}"),
            DatasetError::NotImplemented(ref desc) => {
                write!(f, "This feature is not implemented: {desc}")
            }
            DatasetError::Index(ref desc) => write!(f, "Index error: {desc}"),
            DatasetError::Execution(ref desc) => write!(f, "Execution error: {desc}"),
            DatasetError::Internal(ref desc) => write!(f, "Internal error: {desc}"),
        }
    }
}

impl error::Error for DatasetError {}

#[macro_export]
macro_rules! invalid_err {
    ($($arg:tt)*) => {
        Err($crate::error::DatasetError::Invalid(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! not_impl_err {
    ($($arg:tt)*) => {
        Err($crate::error::DatasetError::NotImplemented(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! index_err {
    ($($arg:tt)*) => {
        Err($crate::error::DatasetError::Index(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! exec_err {
    ($($arg:tt)*) => {
        Err($crate::error::DatasetError::Execution(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        Err($crate::error::DatasetError::Internal(format!($($arg)*)))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arrow_error_round_trip() {
        let err: DatasetError = ArrowError::SchemaError("bar".to_string()).into();
        assert_eq!(err.to_string(), "Arrow error: Schema error: bar");

        let back: ArrowError = DatasetError::Invalid("foo".to_string()).into();
        assert_eq!(back.to_string(), "External error: Invalid: foo");
    }

    #[test]
    fn macro_kinds() {
        let res: Result<()> = invalid_err!("bad {}", "projection");
        assert!(matches!(res, Err(DatasetError::Invalid(_))));

        let res: Result<()> = index_err!("out of bounds");
        assert!(matches!(res, Err(DatasetError::Index(_))));
    }
}
