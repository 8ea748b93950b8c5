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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::buffer::Buffer;
use arrow::compute::take;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::common::error::{EngineError, Result};

/// One column of a [`Batch`]: either a per-row array or a single value
/// broadcast across the batch length.
#[derive(Debug, Clone)]
pub enum Column {
    Array(ArrayRef),
    /// Length-1 array holding the broadcast value.
    Scalar(ArrayRef),
}

impl Column {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Column::Scalar(_))
    }

    pub fn values(&self) -> &ArrayRef {
        match self {
            Column::Array(values) | Column::Scalar(values) => values,
        }
    }

    /// Materialize the column as an array of `length` rows.
    pub fn to_array(&self, length: usize) -> Result<ArrayRef> {
        match self {
            Column::Array(values) => Ok(Arc::clone(values)),
            Column::Scalar(value) => {
                if value.len() != 1 {
                    return Err(EngineError::Execution(format!(
                        "scalar column must hold exactly one value, got {}",
                        value.len()
                    )));
                }
                if length == 1 {
                    return Ok(Arc::clone(value));
                }
                let indices = UInt32Array::from(vec![0u32; length]);
                Ok(take(value.as_ref(), &indices, None)?)
            }
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.is_scalar() == other.is_scalar() && self.values().to_data() == other.values().to_data()
    }
}

/// One unit of columnar data flowing through the plan DAG.
///
/// A batch is an immutable snapshot: ordered columns, a row count, and an
/// optional per-edge index assigned by the emitting node. Column buffers are
/// reference counted, so cloning a batch is cheap.
#[derive(Debug, Clone)]
pub struct Batch {
    columns: Vec<Column>,
    length: usize,
    index: Option<usize>,
}

/// Data equality: the per-edge index is transport metadata and does not
/// participate.
impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.columns == other.columns
    }
}

impl Batch {
    pub fn try_new(columns: Vec<Column>, length: usize) -> Result<Self> {
        for (idx, column) in columns.iter().enumerate() {
            let expected = match column {
                Column::Array(_) => length,
                Column::Scalar(_) => 1,
            };
            if column.values().len() != expected {
                return Err(EngineError::Invalid(format!(
                    "column {idx} has length {} but batch length is {length}",
                    column.values().len()
                )));
            }
        }
        Ok(Self {
            columns,
            length,
            index: None,
        })
    }

    pub fn from_record_batch(batch: &RecordBatch) -> Self {
        Self {
            columns: batch
                .columns()
                .iter()
                .map(|c| Column::Array(Arc::clone(c)))
                .collect(),
            length: batch.num_rows(),
            index: None,
        }
    }

    /// Materialize the batch against `schema`, broadcasting scalar columns.
    pub fn to_record_batch(&self, schema: &SchemaRef) -> Result<RecordBatch> {
        if schema.fields().len() != self.columns.len() {
            return Err(EngineError::Invalid(format!(
                "batch has {} columns but schema has {} fields",
                self.columns.len(),
                schema.fields().len()
            )));
        }
        let mut arrays = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            arrays.push(column.to_array(self.length)?);
        }
        Ok(RecordBatch::try_new(Arc::clone(schema), arrays)?)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Estimate the batch footprint by summing unique buffers.
    ///
    /// Buffers are de-duplicated only within this batch; slices sharing
    /// buffers across batches will be double-counted.
    pub fn estimated_bytes(&self) -> usize {
        let mut seen = HashSet::new();
        let mut total = 0usize;
        for column in &self.columns {
            total = total.saturating_add(array_data_bytes(&column.values().to_data(), &mut seen));
        }
        total
    }
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}
