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
use thiserror::Error;

/// Engine error taxonomy observed at the plan boundary.
///
/// Classification guidance:
/// - [`EngineError::Invalid`]: topology/validation failures, duplicate start, user misuse
/// - [`EngineError::IoError`]: failures surfaced from node start/consume paths doing IO
/// - [`EngineError::NotImplemented`]: valid request for behavior the engine does not support
/// - [`EngineError::Execution`]: runtime kernel/expression/data-shape failures
/// - [`EngineError::External`]: an error a user callback returned, surfaced unchanged
///
/// The enum is `Clone` because a single runtime error is fanned out to every
/// sink of the plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("IOError: {0}")]
    IoError(String),

    #[error("NotImplemented: {0}")]
    NotImplemented(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("{0}")]
    External(String),
}

impl From<arrow::error::ArrowError> for EngineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        EngineError::Execution(err.to_string())
    }
}

/// Standard engine result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
