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
//! Sort key descriptors and row-format sorting helpers shared by the
//! ordering sinks.

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};

use crate::common::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn render(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NullPlacement {
    AtStart,
    AtEnd,
}

impl NullPlacement {
    fn render(self) -> &'static str {
        match self {
            NullPlacement::AtStart => "AtStart",
            NullPlacement::AtEnd => "AtEnd",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SortKey {
    pub name: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(name: impl Into<String>, order: SortOrder) -> Self {
        Self {
            name: name.into(),
            order,
        }
    }

    pub fn asc(name: impl Into<String>) -> Self {
        Self::new(name, SortOrder::Ascending)
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self::new(name, SortOrder::Descending)
    }

    fn render(&self) -> String {
        format!("{} {}", self.name, self.order.render())
    }
}

#[derive(Clone, Debug)]
pub struct SortOptions {
    pub sort_keys: Vec<SortKey>,
    pub null_placement: NullPlacement,
}

impl SortOptions {
    pub fn new(sort_keys: Vec<SortKey>) -> Self {
        Self {
            sort_keys,
            null_placement: NullPlacement::AtEnd,
        }
    }

    pub fn with_null_placement(mut self, null_placement: NullPlacement) -> Self {
        self.null_placement = null_placement;
        self
    }

    pub(crate) fn render(&self) -> String {
        let keys: Vec<String> = self.sort_keys.iter().map(SortKey::render).collect();
        format!(
            "sort_keys=[{}], null_placement={}",
            keys.join(", "),
            self.null_placement.render()
        )
    }
}

/// Row converter whose encoded rows order exactly as the sort keys demand.
pub(crate) fn converter_for_keys(
    schema: &Schema,
    sort_keys: &[SortKey],
    null_placement: NullPlacement,
) -> Result<RowConverter> {
    let mut fields = Vec::with_capacity(sort_keys.len());
    for key in sort_keys {
        let field = schema.field_with_name(&key.name).map_err(|_| {
            EngineError::Invalid(format!("sort key {} not found in schema", key.name))
        })?;
        fields.push(SortField::new_with_options(
            field.data_type().clone(),
            arrow::compute::SortOptions {
                descending: key.order == SortOrder::Descending,
                nulls_first: null_placement == NullPlacement::AtStart,
            },
        ));
    }
    Ok(RowConverter::new(fields)?)
}

pub(crate) fn key_columns(batch: &RecordBatch, sort_keys: &[SortKey]) -> Result<Vec<ArrayRef>> {
    sort_keys
        .iter()
        .map(|key| {
            batch
                .column_by_name(&key.name)
                .cloned()
                .ok_or_else(|| EngineError::Execution(format!("sort key {} missing", key.name)))
        })
        .collect()
}

/// Stable sort permutation of `batch` under `options`, computed through the
/// row format so multi-key comparisons are a single byte comparison.
pub(crate) fn sort_permutation(batch: &RecordBatch, options: &SortOptions) -> Result<UInt32Array> {
    let converter = converter_for_keys(batch.schema().as_ref(), &options.sort_keys, options.null_placement)?;
    let columns = key_columns(batch, &options.sort_keys)?;
    let rows = converter.convert_columns(&columns)?;
    let mut indices: Vec<u32> = (0..batch.num_rows() as u32).collect();
    indices.sort_by(|a, b| rows.row(*a as usize).cmp(&rows.row(*b as usize)));
    Ok(UInt32Array::from(indices))
}

/// Materialize the permuted rows of a batch.
pub(crate) fn take_record_batch(batch: &RecordBatch, indices: &UInt32Array) -> Result<RecordBatch> {
    let mut columns = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        columns.push(take(column.as_ref(), indices, None)?);
    }
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

pub(crate) fn sort_record_batch(batch: &RecordBatch, options: &SortOptions) -> Result<RecordBatch> {
    if options.sort_keys.is_empty() {
        return Ok(batch.clone());
    }
    let permutation = sort_permutation(batch, options)?;
    take_record_batch(batch, &permutation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field};

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("i32", DataType::Int32, true),
            Field::new("str", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(5), None, Some(4), Some(5)])),
                Arc::new(StringArray::from(vec!["b", "c", "a", "a"])),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn stable_sort_keeps_insertion_order_of_ties() {
        let options = SortOptions::new(vec![SortKey::asc("i32")]);
        let sorted = sort_record_batch(&batch(), &options).expect("sorted");
        let strings = sorted
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("strings");
        // 4 first, then the two fives in their original order, null at end.
        assert_eq!(strings.value(0), "a");
        assert_eq!(strings.value(1), "b");
        assert_eq!(strings.value(2), "a");
        assert_eq!(strings.value(3), "c");
    }

    #[test]
    fn descending_with_nulls_first() {
        let options = SortOptions::new(vec![SortKey::desc("i32")])
            .with_null_placement(NullPlacement::AtStart);
        let sorted = sort_record_batch(&batch(), &options).expect("sorted");
        let ints = sorted
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("ints");
        assert!(ints.is_null(0));
        assert_eq!(ints.value(1), 5);
        assert_eq!(ints.value(3), 4);
    }

    #[test]
    fn unknown_sort_key_is_invalid() {
        let schema = Schema::new(vec![Field::new("i32", DataType::Int32, true)]);
        let err = converter_for_keys(&schema, &[SortKey::asc("nope")], NullPlacement::AtEnd)
            .expect_err("missing key");
        assert!(matches!(err, EngineError::Invalid(_)));
    }
}
