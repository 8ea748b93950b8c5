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
//! Shared fixtures and helpers for the engine integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{Array, ArrayRef, BooleanArray, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use basalt::exec::batch::{Batch, Column};
use basalt::exec::channel::VecBatchGenerator;
use basalt::exec::operators::{SinkHandle, SourceNodeOptions};
use basalt::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};
use basalt::{EngineError, Result};

pub fn schema_i32_bool() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("i32", DataType::Int32, true),
        Field::new("bool", DataType::Boolean, true),
    ]))
}

pub fn schema_i32_utf8() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("i32", DataType::Int32, true),
        Field::new("str", DataType::Utf8, true),
    ]))
}

pub fn batch_i32_bool(rows: &[(Option<i32>, Option<bool>)]) -> Batch {
    let ints: Int32Array = rows.iter().map(|r| r.0).collect();
    let bools: BooleanArray = rows.iter().map(|r| r.1).collect();
    Batch::try_new(
        vec![
            Column::Array(Arc::new(ints)),
            Column::Array(Arc::new(bools)),
        ],
        rows.len(),
    )
    .expect("batch")
}

pub fn batch_bool_i32(rows: &[(Option<bool>, Option<i32>)]) -> Batch {
    let bools: BooleanArray = rows.iter().map(|r| r.0).collect();
    let ints: Int32Array = rows.iter().map(|r| r.1).collect();
    Batch::try_new(
        vec![
            Column::Array(Arc::new(bools)),
            Column::Array(Arc::new(ints)),
        ],
        rows.len(),
    )
    .expect("batch")
}

pub fn batch_i32_utf8(rows: &[(Option<i32>, Option<&str>)]) -> Batch {
    let ints: Int32Array = rows.iter().map(|r| r.0).collect();
    let strings: StringArray = rows.iter().map(|r| r.1).collect();
    Batch::try_new(
        vec![
            Column::Array(Arc::new(ints)),
            Column::Array(Arc::new(strings)),
        ],
        rows.len(),
    )
    .expect("batch")
}

pub fn scalar_batch_i32_bool(value: i32, flag: bool, length: usize) -> Batch {
    Batch::try_new(
        vec![
            Column::Scalar(Arc::new(Int32Array::from(vec![value]))),
            Column::Scalar(Arc::new(BooleanArray::from(vec![flag]))),
        ],
        length,
    )
    .expect("batch")
}

/// A schema plus a reusable batch set; `source_options` builds a fresh
/// generator each call, mirroring how tests re-run one fixture in several
/// modes.
pub struct BatchesWithSchema {
    pub schema: SchemaRef,
    pub batches: Vec<Batch>,
}

impl BatchesWithSchema {
    pub fn source_options(&self, slow: bool) -> SourceNodeOptions {
        let generator = if slow {
            VecBatchGenerator::slow(self.batches.clone(), Duration::from_millis(1))
        } else {
            VecBatchGenerator::new(self.batches.clone())
        };
        SourceNodeOptions::new(Arc::clone(&self.schema), generator)
    }
}

/// Two small `(i32, bool)` batches with nulls in both columns.
pub fn basic_batches() -> BatchesWithSchema {
    BatchesWithSchema {
        schema: schema_i32_bool(),
        batches: vec![
            batch_i32_bool(&[(None, Some(true)), (Some(4), Some(false))]),
            batch_i32_bool(&[
                (Some(5), None),
                (Some(6), Some(false)),
                (Some(7), Some(false)),
            ]),
        ],
    }
}

/// The literal pass-through batch set of the basic multiset scenario.
pub fn passthrough_batches() -> BatchesWithSchema {
    BatchesWithSchema {
        schema: schema_i32_bool(),
        batches: vec![
            batch_i32_bool(&[(Some(1), Some(true)), (Some(2), Some(true))]),
            batch_i32_bool(&[(Some(3), None), (Some(4), Some(false))]),
        ],
    }
}

/// Three `(i32, str)` batches over the alfa/beta/gama groups, optionally
/// repeated for parallel stress.
pub fn groupable_batches(multiplicity: usize) -> BatchesWithSchema {
    let base = vec![
        batch_i32_utf8(&[
            (Some(12), Some("alfa")),
            (Some(7), Some("beta")),
            (Some(3), Some("alfa")),
        ]),
        batch_i32_utf8(&[
            (Some(-2), Some("alfa")),
            (Some(-1), Some("gama")),
            (Some(3), Some("alfa")),
        ]),
        batch_i32_utf8(&[
            (Some(5), Some("gama")),
            (Some(3), Some("beta")),
            (Some(-8), Some("alfa")),
        ]),
    ];
    let mut batches = Vec::with_capacity(base.len() * multiplicity.max(1));
    for _ in 0..multiplicity.max(1) {
        batches.extend(base.iter().cloned());
    }
    BatchesWithSchema {
        schema: schema_i32_utf8(),
        batches,
    }
}

pub fn random_batches(count: usize) -> BatchesWithSchema {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let batches = (0..count)
        .map(|_| {
            let rows: Vec<(Option<i32>, Option<bool>)> = (0..rng.gen_range(1..=4))
                .map(|_| (Some(rng.gen_range(-100..100)), Some(rng.gen_bool(0.5))))
                .collect();
            batch_i32_bool(&rows)
        })
        .collect();
    BatchesWithSchema {
        schema: schema_i32_bool(),
        batches,
    }
}

/// Start the plan, drain the sink, then wait for plan completion,
/// surfacing whichever error arrives first.
pub fn start_and_collect(plan: &ExecPlan, handle: &SinkHandle) -> Result<Vec<Batch>> {
    plan.start_producing()?;
    let collected = handle.collect();
    let finished = plan.finished().wait();
    let batches = collected?;
    finished?;
    Ok(batches)
}

/// Multiset equality over whole batches.
pub fn assert_batches_unordered_eq(actual: &[Batch], expected: &[Batch]) {
    let mut remaining: Vec<&Batch> = expected.iter().collect();
    for batch in actual {
        let position = remaining.iter().position(|candidate| *candidate == batch);
        match position {
            Some(idx) => {
                remaining.remove(idx);
            }
            None => panic!("unexpected batch in output: {batch:?}"),
        }
    }
    assert!(
        remaining.is_empty(),
        "missing {} expected batch(es)",
        remaining.len()
    );
}

fn column_values<'a, T: Array + 'static>(batch: &'a Batch, idx: usize) -> &'a T {
    batch
        .column(idx)
        .expect("column")
        .values()
        .as_any()
        .downcast_ref::<T>()
        .expect("column type")
}

/// Sort helper for multiset comparisons over extracted rows.
pub fn sorted<T: Ord>(mut rows: Vec<T>) -> Vec<T> {
    rows.sort();
    rows
}

/// Flatten `(Int64, Utf8)` batches into rows in emission order.
pub fn rows_i64_utf8(batches: &[Batch]) -> Vec<(Option<i64>, Option<String>)> {
    let mut rows = Vec::new();
    for batch in batches {
        let ints = column_values::<Int64Array>(batch, 0);
        let strings = column_values::<StringArray>(batch, 1);
        for row in 0..batch.len() {
            rows.push((
                ints.is_valid(row).then(|| ints.value(row)),
                strings.is_valid(row).then(|| strings.value(row).to_string()),
            ));
        }
    }
    rows
}

/// Flatten four-column join output into rows in emission order.
pub type JoinRow = (Option<i32>, Option<String>, Option<i32>, Option<String>);

pub fn rows_i32_utf8_i32_utf8(batches: &[Batch]) -> Vec<JoinRow> {
    let mut rows = Vec::new();
    for batch in batches {
        let left_ints = column_values::<Int32Array>(batch, 0);
        let left_strings = column_values::<StringArray>(batch, 1);
        let right_ints = column_values::<Int32Array>(batch, 2);
        let right_strings = column_values::<StringArray>(batch, 3);
        for row in 0..batch.len() {
            rows.push((
                left_ints.is_valid(row).then(|| left_ints.value(row)),
                left_strings
                    .is_valid(row)
                    .then(|| left_strings.value(row).to_string()),
                right_ints.is_valid(row).then(|| right_ints.value(row)),
                right_strings
                    .is_valid(row)
                    .then(|| right_strings.value(row).to_string()),
            ));
        }
    }
    rows
}

pub fn rows_i32_utf8(batches: &[Batch]) -> Vec<(Option<i32>, Option<String>)> {
    let mut rows = Vec::new();
    for batch in batches {
        let ints = column_values::<Int32Array>(batch, 0);
        let strings = column_values::<StringArray>(batch, 1);
        for row in 0..batch.len() {
            rows.push((
                ints.is_valid(row).then(|| ints.value(row)),
                strings.is_valid(row).then(|| strings.value(row).to_string()),
            ));
        }
    }
    rows
}

type StartFn = Box<dyn Fn() -> Result<()> + Send + Sync>;
type StopFn = Box<dyn Fn() + Send + Sync>;

/// Inert node with controllable start/stop hooks, for lifecycle and
/// topology tests.
pub struct DummyNode {
    base: NodeBase,
    start_fn: StartFn,
    stop_fn: StopFn,
}

impl ExecNode for DummyNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        (self.start_fn)()
    }

    fn input_received(&self, _sender: &NodeRef, _batch: Batch) {}

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {}

    fn error_received(&self, _sender: &NodeRef, _error: EngineError) {}

    fn stop_producing(&self) {
        (self.stop_fn)();
        self.base.finished().settle(Ok(()));
    }
}

pub fn make_dummy_node(
    plan: &ExecPlan,
    label: &str,
    inputs: Vec<NodeRef>,
    num_outputs: usize,
) -> NodeRef {
    make_dummy_node_with_hooks(plan, label, inputs, num_outputs, Box::new(|| Ok(())), Box::new(|| {}))
}

pub fn make_dummy_node_with_hooks(
    plan: &ExecPlan,
    label: &str,
    inputs: Vec<NodeRef>,
    num_outputs: usize,
    start_fn: StartFn,
    stop_fn: StopFn,
) -> NodeRef {
    let node = Arc::new(DummyNode {
        base: NodeBase::new(
            "DummyNode",
            Arc::new(Schema::empty()),
            inputs,
            Vec::new(),
            num_outputs,
        ),
        start_fn,
        stop_fn,
    });
    plan.add_node(node, label)
}

/// Records start/stop invocation order across a plan's dummy nodes.
#[derive(Clone, Default)]
pub struct StartStopTracker {
    started: Arc<Mutex<Vec<String>>>,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl StartStopTracker {
    pub fn node(
        &self,
        plan: &ExecPlan,
        label: &str,
        inputs: Vec<NodeRef>,
        num_outputs: usize,
    ) -> NodeRef {
        self.node_with_start_result(plan, label, inputs, num_outputs, Ok(()))
    }

    pub fn node_with_start_result(
        &self,
        plan: &ExecPlan,
        label: &str,
        inputs: Vec<NodeRef>,
        num_outputs: usize,
        start_result: Result<()>,
    ) -> NodeRef {
        let started = Arc::clone(&self.started);
        let stopped = Arc::clone(&self.stopped);
        let start_label = label.to_string();
        let stop_label = label.to_string();
        make_dummy_node_with_hooks(
            plan,
            label,
            inputs,
            num_outputs,
            Box::new(move || {
                started
                    .lock()
                    .expect("tracker lock")
                    .push(start_label.clone());
                start_result.clone()
            }),
            Box::new(move || {
                stopped
                    .lock()
                    .expect("tracker lock")
                    .push(stop_label.clone());
            }),
        )
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().expect("tracker lock").clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().expect("tracker lock").clone()
    }
}

/// Expected scalar-aggregate result row builder.
pub fn scalar_result_batch(columns: Vec<ArrayRef>) -> Batch {
    Batch::try_new(columns.into_iter().map(Column::Scalar).collect(), 1).expect("batch")
}
