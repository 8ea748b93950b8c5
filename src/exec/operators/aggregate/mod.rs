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
//! Aggregation nodes.
//!
//! Responsibilities:
//! - `ScalarAggregateNode` folds every input batch into one scalar output
//!   row per aggregate.
//! - `GroupByNode` partitions rows by key columns through the Arrow row
//!   format and keeps one kernel set per group, emitting aggregates-first
//!   output in hash-table order.
//! - Both accumulate batch-local partial states without the shared lock and
//!   merge them into the global state, keeping lock hold times bounded.
//!
//! Key exported interfaces:
//! - Types: `AggregateSpec`, `AggregateNodeOptions`.

pub mod kernels;

use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{concat, take};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter, SortField};
use hashbrown::HashMap;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::{Batch, Column};
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};

pub use kernels::{AggKernel, AggOptions, CountMode};

/// One aggregate to compute: kernel name (scalar or `hash_` form), optional
/// kernel options, the target input column, and the output column name.
#[derive(Clone)]
pub struct AggregateSpec {
    pub kernel: String,
    pub options: Option<AggOptions>,
    pub target: String,
    pub name: String,
}

impl AggregateSpec {
    pub fn new(kernel: impl Into<String>, target: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            options: None,
            target: target.into(),
            name: name.into(),
        }
    }

    pub fn with_options(mut self, options: AggOptions) -> Self {
        self.options = Some(options);
        self
    }

    fn render(&self) -> String {
        match &self.options {
            Some(options) => format!("{}({}, {})", self.kernel, self.target, options.render()),
            None => format!("{}({})", self.kernel, self.target),
        }
    }
}

/// Options of the `aggregate` factory. Empty `keys` selects the scalar
/// form, non-empty keys the grouped (`hash_*`) form.
pub struct AggregateNodeOptions {
    pub aggregates: Vec<AggregateSpec>,
    pub keys: Vec<String>,
}

impl AggregateNodeOptions {
    pub fn new(aggregates: Vec<AggregateSpec>) -> Self {
        Self {
            aggregates,
            keys: Vec::new(),
        }
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }
}

fn render_aggregates(specs: &[AggregateSpec]) -> String {
    let mut out = String::from("aggregates=[\n");
    for spec in specs {
        out.push('\t');
        out.push_str(&spec.render());
        out.push_str(",\n");
    }
    out.push(']');
    out
}

fn build_kernels(specs: &[AggregateSpec], input_schema: &Schema) -> Result<Vec<Box<dyn AggKernel>>> {
    specs
        .iter()
        .map(|spec| {
            let field = input_schema.field_with_name(&spec.target).map_err(|_| {
                EngineError::Invalid(format!(
                    "aggregate target {} not found in input schema",
                    spec.target
                ))
            })?;
            kernels::build_kernel(&spec.kernel, field.data_type(), spec.options.as_ref())
        })
        .collect()
}

fn target_columns<'a>(
    batch: &'a RecordBatch,
    specs: &[AggregateSpec],
) -> Result<Vec<&'a ArrayRef>> {
    specs
        .iter()
        .map(|spec| {
            batch.column_by_name(&spec.target).ok_or_else(|| {
                EngineError::Execution(format!("aggregate target {} missing", spec.target))
            })
        })
        .collect()
}

/// Scalar aggregate: one output row of scalar columns.
pub struct ScalarAggregateNode {
    base: NodeBase,
    specs: Vec<AggregateSpec>,
    input_schema: SchemaRef,
    state: Mutex<Vec<Box<dyn AggKernel>>>,
}

impl ScalarAggregateNode {
    fn accumulate(&self, batch: &Batch) -> Result<()> {
        let input = batch.to_record_batch(&self.input_schema)?;
        let columns = target_columns(&input, &self.specs)?;
        // Batch-local partials keep the shared state lock short.
        let mut partials = build_kernels(&self.specs, self.input_schema.as_ref())?;
        for (kernel, column) in partials.iter_mut().zip(columns) {
            kernel.update(column)?;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (kernel, partial) in state.iter_mut().zip(partials) {
            kernel.merge(partial.as_ref())?;
        }
        Ok(())
    }

    fn finalize(&self) -> Result<Batch> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut columns = Vec::with_capacity(state.len());
        for kernel in state.iter_mut() {
            columns.push(Column::Scalar(kernel.finalize()?));
        }
        Batch::try_new(columns, 1)
    }
}

impl ExecNode for ScalarAggregateNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        Ok(())
    }

    fn input_received(&self, _sender: &NodeRef, batch: Batch) {
        if self.base.is_errored() {
            return;
        }
        if let Err(err) = self.accumulate(&batch) {
            self.base.emit_error(err.clone());
            self.base.finished().settle(Err(err));
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        if self.base.is_errored() {
            return;
        }
        match self.finalize() {
            Ok(batch) => {
                self.base.emit(batch);
                self.base.emit_finished();
                self.base.finished().settle(Ok(()));
            }
            Err(err) => {
                self.base.emit_error(err.clone());
                self.base.finished().settle(Err(err));
            }
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
        Some(render_aggregates(&self.specs))
    }
}

struct GroupState {
    key_row: OwnedRow,
    kernels: Vec<Box<dyn AggKernel>>,
}

#[derive(Default)]
struct GroupTable {
    lookup: HashMap<Vec<u8>, usize>,
    groups: Vec<GroupState>,
}

/// Grouped (hash) aggregate: one output row per distinct key combination,
/// aggregate columns first and key columns last. Output order follows the
/// hash table and is unspecified.
pub struct GroupByNode {
    base: NodeBase,
    specs: Vec<AggregateSpec>,
    keys: Vec<String>,
    input_schema: SchemaRef,
    converter: RowConverter,
    table: Mutex<GroupTable>,
}

impl GroupByNode {
    fn key_columns(&self, batch: &RecordBatch) -> Result<Vec<ArrayRef>> {
        self.keys
            .iter()
            .map(|key| {
                batch
                    .column_by_name(key)
                    .cloned()
                    .ok_or_else(|| EngineError::Execution(format!("group key {key} missing")))
            })
            .collect()
    }

    fn accumulate(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let input = batch.to_record_batch(&self.input_schema)?;
        let key_columns = self.key_columns(&input)?;
        let rows = self.converter.convert_columns(&key_columns)?;

        // Batch-local grouping pass: first-seen order, no shared lock held.
        let mut local_lookup: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut local_groups: Vec<(OwnedRow, Vec<u32>)> = Vec::new();
        for row_idx in 0..input.num_rows() {
            let row = rows.row(row_idx);
            let slot = *local_lookup
                .entry_ref(row.data())
                .or_insert_with(|| {
                    local_groups.push((row.owned(), Vec::new()));
                    local_groups.len() - 1
                });
            local_groups[slot].1.push(row_idx as u32);
        }

        let columns = target_columns(&input, &self.specs)?;
        let mut partials: Vec<(OwnedRow, Vec<Box<dyn AggKernel>>)> =
            Vec::with_capacity(local_groups.len());
        for (key_row, row_indices) in local_groups {
            let indices = UInt32Array::from(row_indices);
            let mut group_kernels = build_kernels(&self.specs, self.input_schema.as_ref())?;
            for (kernel, column) in group_kernels.iter_mut().zip(columns.iter()) {
                let values = take(column.as_ref(), &indices, None)?;
                kernel.update(&values)?;
            }
            partials.push((key_row, group_kernels));
        }

        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        for (key_row, group_kernels) in partials {
            let key = key_row.row().data().to_vec();
            let slot = table.lookup.get(&key).copied();
            match slot {
                Some(slot) => {
                    let group = &mut table.groups[slot];
                    for (kernel, partial) in group.kernels.iter_mut().zip(group_kernels.iter()) {
                        kernel.merge(partial.as_ref())?;
                    }
                }
                None => {
                    let slot = table.groups.len();
                    table.groups.push(GroupState {
                        key_row,
                        kernels: group_kernels,
                    });
                    table.lookup.insert(key, slot);
                }
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Result<Batch> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let num_groups = table.groups.len();
        let mut columns: Vec<Column> = Vec::with_capacity(self.specs.len() + self.keys.len());
        for spec_idx in 0..self.specs.len() {
            let mut parts: Vec<ArrayRef> = Vec::with_capacity(num_groups);
            for group in table.groups.iter_mut() {
                parts.push(group.kernels[spec_idx].finalize()?);
            }
            let refs: Vec<&dyn arrow::array::Array> =
                parts.iter().map(|a| a.as_ref() as _).collect();
            let column = if refs.is_empty() {
                let target_type = self.target_type(spec_idx)?;
                arrow::array::new_empty_array(&kernels::kernel_output_type(
                    &self.specs[spec_idx].kernel,
                    &target_type,
                )?)
            } else {
                concat(&refs)?
            };
            columns.push(Column::Array(column));
        }
        let key_arrays = self
            .converter
            .convert_rows(table.groups.iter().map(|g| g.key_row.row()))?;
        for key_array in key_arrays {
            columns.push(Column::Array(key_array));
        }
        Batch::try_new(columns, num_groups)
    }

    fn target_type(&self, spec_idx: usize) -> Result<arrow::datatypes::DataType> {
        let field = self
            .input_schema
            .field_with_name(&self.specs[spec_idx].target)
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        Ok(field.data_type().clone())
    }
}

impl ExecNode for GroupByNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        Ok(())
    }

    fn input_received(&self, _sender: &NodeRef, batch: Batch) {
        if self.base.is_errored() {
            return;
        }
        if let Err(err) = self.accumulate(&batch) {
            self.base.emit_error(err.clone());
            self.base.finished().settle(Err(err));
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        if self.base.is_errored() {
            return;
        }
        match self.finalize() {
            Ok(batch) => {
                self.base.emit(batch);
                self.base.emit_finished();
                self.base.finished().settle(Ok(()));
            }
            Err(err) => {
                self.base.emit_error(err.clone());
                self.base.finished().settle(Err(err));
            }
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
        let keys: Vec<String> = self.keys.iter().map(|k| format!("\"{k}\"")).collect();
        Some(format!(
            "keys=[{}], {}",
            keys.join(", "),
            render_aggregates(&self.specs)
        ))
    }
}

pub(crate) fn make_aggregate_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("aggregate", &inputs, 1)?;
    let options = typed_options::<AggregateNodeOptions>(options, "aggregate")?;
    if options.aggregates.is_empty() {
        return Err(EngineError::Invalid(
            "aggregate requires at least one aggregate function".to_string(),
        ));
    }
    let input_schema = inputs[0].output_schema();
    let grouped = !options.keys.is_empty();
    for spec in &options.aggregates {
        if grouped != kernels::is_hash_kernel(&spec.kernel) {
            return Err(EngineError::Invalid(format!(
                "kernel {} does not match the {} aggregate form",
                spec.kernel,
                if grouped { "grouped" } else { "scalar" }
            )));
        }
    }

    let mut fields = Vec::new();
    for spec in &options.aggregates {
        let target = input_schema.field_with_name(&spec.target).map_err(|_| {
            EngineError::Invalid(format!(
                "aggregate target {} not found in input schema",
                spec.target
            ))
        })?;
        let out_type = kernels::kernel_output_type(&spec.kernel, target.data_type())?;
        fields.push(Field::new(&spec.name, out_type, true));
    }

    if !grouped {
        let state = build_kernels(&options.aggregates, input_schema.as_ref())?;
        let node = Arc::new(ScalarAggregateNode {
            base: NodeBase::new(
                "ScalarAggregateNode",
                Arc::new(Schema::new(fields)),
                inputs,
                vec!["target".to_string()],
                1,
            ),
            specs: options.aggregates.clone(),
            input_schema,
            state: Mutex::new(state),
        });
        return Ok(plan.add_node(node, label));
    }

    let mut sort_fields = Vec::with_capacity(options.keys.len());
    for key in &options.keys {
        let field = input_schema.field_with_name(key).map_err(|_| {
            EngineError::Invalid(format!("group key {key} not found in input schema"))
        })?;
        fields.push(Field::new(key, field.data_type().clone(), true));
        sort_fields.push(SortField::new(field.data_type().clone()));
    }
    let converter = RowConverter::new(sort_fields)?;
    let node = Arc::new(GroupByNode {
        base: NodeBase::new(
            "GroupByNode",
            Arc::new(Schema::new(fields)),
            inputs,
            vec!["groupby".to_string()],
            1,
        ),
        specs: options.aggregates.clone(),
        keys: options.keys.clone(),
        input_schema,
        converter,
        table: Mutex::new(GroupTable::default()),
    });
    Ok(plan.add_node(node, label))
}
