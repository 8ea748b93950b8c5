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
//! Hash join node.
//!
//! Responsibilities:
//! - Consumes the right ("build") input fully into a serialized-key hash
//!   index, buffering early probe batches until the build side finishes.
//! - Streams left ("probe") batches against the index, emitting rows per
//!   join type and marking build-side matches for the outer/semi/anti
//!   tails.
//! - Null keys never match; outer semantics pass null-keyed rows through as
//!   unmatched padding.
//!
//! Key exported interfaces:
//! - Types: `JoinType`, `HashJoinNodeOptions`.

use std::sync::{Arc, Mutex};

use arrow::array::{new_null_array, ArrayRef, UInt32Array};
use arrow::compute::{interleave, take};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use hashbrown::HashMap;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::{Batch, Column};
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    RightSemi,
    LeftAnti,
    RightAnti,
}

impl JoinType {
    fn emits_left_columns(self) -> bool {
        !matches!(self, JoinType::RightSemi | JoinType::RightAnti)
    }

    fn emits_right_columns(self) -> bool {
        !matches!(self, JoinType::LeftSemi | JoinType::LeftAnti)
    }

    fn pads_unmatched_left(self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::FullOuter)
    }

    fn emits_right_tail(self) -> bool {
        matches!(
            self,
            JoinType::RightOuter | JoinType::FullOuter | JoinType::RightSemi | JoinType::RightAnti
        )
    }
}

/// Options of the `hashjoin` factory. Output column names are the input
/// names with the respective side's prefix.
#[derive(Clone)]
pub struct HashJoinNodeOptions {
    pub join_type: JoinType,
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
    pub left_output_prefix: String,
    pub right_output_prefix: String,
}

impl HashJoinNodeOptions {
    pub fn new(
        join_type: JoinType,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
        left_output_prefix: impl Into<String>,
        right_output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            join_type,
            left_keys,
            right_keys,
            left_output_prefix: left_output_prefix.into(),
            right_output_prefix: right_output_prefix.into(),
        }
    }
}

#[derive(Default)]
struct JoinState {
    build_batches: Vec<RecordBatch>,
    index: HashMap<Vec<u8>, Vec<(u32, u32)>>,
    matched: Vec<Vec<bool>>,
    build_done: bool,
    pending_probe: Vec<Batch>,
    probe_finished: bool,
    done: bool,
}

pub struct HashJoinNode {
    base: NodeBase,
    join_type: JoinType,
    left_keys: Vec<String>,
    right_keys: Vec<String>,
    left_schema: SchemaRef,
    right_schema: SchemaRef,
    converter: RowConverter,
    state: Mutex<JoinState>,
}

impl HashJoinNode {
    fn key_rows(
        &self,
        batch: &RecordBatch,
        keys: &[String],
    ) -> Result<arrow::row::Rows> {
        let mut columns = Vec::with_capacity(keys.len());
        for key in keys {
            let column = batch
                .column_by_name(key)
                .cloned()
                .ok_or_else(|| EngineError::Execution(format!("join key {key} missing")))?;
            columns.push(column);
        }
        Ok(self.converter.convert_columns(&columns)?)
    }

    fn row_has_null_key(batch: &RecordBatch, keys: &[String], row: usize) -> bool {
        keys.iter().any(|key| {
            batch
                .column_by_name(key)
                .map(|column| column.is_null(row))
                .unwrap_or(true)
        })
    }

    fn add_build_batch(&self, state: &mut JoinState, batch: &Batch) -> Result<()> {
        let materialized = batch.to_record_batch(&self.right_schema)?;
        let rows = self.key_rows(&materialized, &self.right_keys)?;
        let batch_idx = state.build_batches.len() as u32;
        state.matched.push(vec![false; materialized.num_rows()]);
        for row in 0..materialized.num_rows() {
            if Self::row_has_null_key(&materialized, &self.right_keys, row) {
                continue;
            }
            state
                .index
                .entry(rows.row(row).data().to_vec())
                .or_default()
                .push((batch_idx, row as u32));
        }
        state.build_batches.push(materialized);
        Ok(())
    }

    fn probe_batch(&self, state: &mut JoinState, batch: &Batch) -> Result<Option<Batch>> {
        let probe = batch.to_record_batch(&self.left_schema)?;
        let rows = self.key_rows(&probe, &self.left_keys)?;

        let mut left_indices: Vec<u32> = Vec::new();
        let mut right_rows: Vec<Option<(u32, u32)>> = Vec::new();
        for row in 0..probe.num_rows() {
            let hits: Option<Vec<(u32, u32)>> = if Self::row_has_null_key(&probe, &self.left_keys, row)
            {
                None
            } else {
                state.index.get(rows.row(row).data()).cloned()
            };
            match self.join_type {
                JoinType::Inner | JoinType::RightOuter => {
                    if let Some(hits) = &hits {
                        for hit in hits {
                            state.matched[hit.0 as usize][hit.1 as usize] = true;
                            left_indices.push(row as u32);
                            right_rows.push(Some(*hit));
                        }
                    }
                }
                JoinType::LeftOuter | JoinType::FullOuter => match &hits {
                    Some(hits) => {
                        for hit in hits {
                            state.matched[hit.0 as usize][hit.1 as usize] = true;
                            left_indices.push(row as u32);
                            right_rows.push(Some(*hit));
                        }
                    }
                    None => {
                        left_indices.push(row as u32);
                        right_rows.push(None);
                    }
                },
                JoinType::LeftSemi => {
                    if hits.is_some() {
                        left_indices.push(row as u32);
                    }
                }
                JoinType::LeftAnti => {
                    if hits.is_none() {
                        left_indices.push(row as u32);
                    }
                }
                JoinType::RightSemi | JoinType::RightAnti => {
                    if let Some(hits) = &hits {
                        for hit in hits {
                            state.matched[hit.0 as usize][hit.1 as usize] = true;
                        }
                    }
                }
            }
        }

        if left_indices.is_empty() || !self.join_type.emits_left_columns() {
            return Ok(None);
        }

        let take_indices = UInt32Array::from(left_indices);
        let mut columns: Vec<Column> = Vec::new();
        for column in probe.columns() {
            columns.push(Column::Array(take(column.as_ref(), &take_indices, None)?));
        }
        if self.join_type.emits_right_columns() {
            let right_columns = self.gather_build_rows(state, &right_rows)?;
            columns.extend(right_columns);
        }
        Ok(Some(Batch::try_new(columns, take_indices.len())?))
    }

    /// Materialize build-side rows, padding `None` entries with nulls
    /// through a one-row null sentinel batch.
    fn gather_build_rows(
        &self,
        state: &JoinState,
        rows: &[Option<(u32, u32)>],
    ) -> Result<Vec<Column>> {
        let sentinel = state.build_batches.len();
        let indices: Vec<(usize, usize)> = rows
            .iter()
            .map(|hit| match hit {
                Some((batch, row)) => (*batch as usize, *row as usize),
                None => (sentinel, 0),
            })
            .collect();
        let mut columns = Vec::with_capacity(self.right_schema.fields().len());
        for (column_idx, field) in self.right_schema.fields().iter().enumerate() {
            let null_row: ArrayRef = new_null_array(field.data_type(), 1);
            let mut parts: Vec<&dyn arrow::array::Array> = state
                .build_batches
                .iter()
                .map(|batch| batch.column(column_idx).as_ref() as _)
                .collect();
            parts.push(null_row.as_ref());
            columns.push(Column::Array(interleave(&parts, &indices)?));
        }
        Ok(columns)
    }

    /// Emit the build-side tail owed by right/full outer and right
    /// semi/anti joins once both inputs finished.
    fn finish(&self, state: &mut JoinState) -> Result<()> {
        if state.done {
            return Ok(());
        }
        state.done = true;
        if self.join_type.emits_right_tail() {
            let want_matched = self.join_type == JoinType::RightSemi;
            let skip_matched = matches!(
                self.join_type,
                JoinType::RightOuter | JoinType::FullOuter | JoinType::RightAnti
            );
            let mut tail: Vec<Option<(u32, u32)>> = Vec::new();
            for (batch_idx, matched) in state.matched.iter().enumerate() {
                for (row_idx, was_matched) in matched.iter().enumerate() {
                    let keep = if want_matched {
                        *was_matched
                    } else if skip_matched {
                        !*was_matched
                    } else {
                        false
                    };
                    if keep {
                        tail.push(Some((batch_idx as u32, row_idx as u32)));
                    }
                }
            }
            if !tail.is_empty() {
                let mut columns: Vec<Column> = Vec::new();
                if self.join_type.emits_left_columns() {
                    for field in self.left_schema.fields() {
                        columns.push(Column::Array(new_null_array(
                            field.data_type(),
                            tail.len(),
                        )));
                    }
                }
                columns.extend(self.gather_build_rows(state, &tail)?);
                self.base.emit(Batch::try_new(columns, tail.len())?);
            }
        }
        self.base.emit_finished();
        self.base.finished().settle(Ok(()));
        Ok(())
    }

    fn fail(&self, err: EngineError) {
        self.base.emit_error(err.clone());
        self.base.finished().settle(Err(err));
    }
}

impl ExecNode for HashJoinNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        Ok(())
    }

    fn input_received(&self, sender: &NodeRef, batch: Batch) {
        if self.base.is_errored() {
            return;
        }
        let Some(slot) = self.base.input_index_of(sender) else {
            return;
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let result = if slot == 1 {
            self.add_build_batch(&mut state, &batch)
        } else if !state.build_done {
            state.pending_probe.push(batch);
            Ok(())
        } else {
            self.probe_batch(&mut state, &batch).map(|output| {
                if let Some(output) = output {
                    self.base.emit(output);
                }
            })
        };
        if let Err(err) = result {
            drop(state);
            self.fail(err);
        }
    }

    fn input_finished(&self, sender: &NodeRef, _total_batches: usize) {
        if self.base.is_errored() {
            return;
        }
        let Some(slot) = self.base.input_index_of(sender) else {
            return;
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let result = (|| -> Result<()> {
            if slot == 1 {
                state.build_done = true;
                let pending = std::mem::take(&mut state.pending_probe);
                for batch in pending {
                    if let Some(output) = self.probe_batch(&mut state, &batch)? {
                        self.base.emit(output);
                    }
                }
                if state.probe_finished {
                    self.finish(&mut state)?;
                }
            } else {
                state.probe_finished = true;
                if state.build_done {
                    self.finish(&mut state)?;
                }
            }
            Ok(())
        })();
        if let Err(err) = result {
            drop(state);
            self.fail(err);
        }
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.emit_error(error.clone());
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        self.base.finished().settle(Ok(()));
    }

    fn render_extra(&self) -> Option<String> {
        let render_keys = |keys: &[String]| {
            let quoted: Vec<String> = keys.iter().map(|k| format!("\"{k}\"")).collect();
            quoted.join(", ")
        };
        Some(format!(
            "join_type={:?}, left_keys=[{}], right_keys=[{}]",
            self.join_type,
            render_keys(&self.left_keys),
            render_keys(&self.right_keys)
        ))
    }
}

pub(crate) fn make_hashjoin_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("hashjoin", &inputs, 2)?;
    let options = typed_options::<HashJoinNodeOptions>(options, "hashjoin")?;
    if options.left_keys.is_empty() || options.left_keys.len() != options.right_keys.len() {
        return Err(EngineError::Invalid(
            "hashjoin requires matching non-empty key lists".to_string(),
        ));
    }
    let left_schema = inputs[0].output_schema();
    let right_schema = inputs[1].output_schema();

    let mut sort_fields = Vec::with_capacity(options.left_keys.len());
    for (left_key, right_key) in options.left_keys.iter().zip(options.right_keys.iter()) {
        let left_field = left_schema.field_with_name(left_key).map_err(|_| {
            EngineError::Invalid(format!("left key {left_key} not found in left schema"))
        })?;
        let right_field = right_schema.field_with_name(right_key).map_err(|_| {
            EngineError::Invalid(format!("right key {right_key} not found in right schema"))
        })?;
        if left_field.data_type() != right_field.data_type() {
            return Err(EngineError::Invalid(format!(
                "join keys {left_key} and {right_key} have different types"
            )));
        }
        sort_fields.push(SortField::new(left_field.data_type().clone()));
    }
    let converter = RowConverter::new(sort_fields)?;

    let mut fields = Vec::new();
    if options.join_type.emits_left_columns() {
        for field in left_schema.fields() {
            fields.push(Field::new(
                format!("{}{}", options.left_output_prefix, field.name()),
                field.data_type().clone(),
                true,
            ));
        }
    }
    if options.join_type.emits_right_columns() {
        for field in right_schema.fields() {
            fields.push(Field::new(
                format!("{}{}", options.right_output_prefix, field.name()),
                field.data_type().clone(),
                true,
            ));
        }
    }

    let node = Arc::new(HashJoinNode {
        base: NodeBase::new(
            "HashJoinNode",
            Arc::new(Schema::new(fields)),
            inputs,
            vec!["left".to_string(), "right".to_string()],
            1,
        ),
        join_type: options.join_type,
        left_keys: options.left_keys.clone(),
        right_keys: options.right_keys.clone(),
        left_schema,
        right_schema,
        converter,
        state: Mutex::new(JoinState::default()),
    });
    Ok(plan.add_node(node, label))
}
