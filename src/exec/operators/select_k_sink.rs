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
//! Top-K sink: keeps the best `k` rows across the stream with a bounded
//! heap over row-format keys, so retained memory is O(k) plus one incoming
//! batch.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use arrow::row::OwnedRow;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::channel::BatchQueue;
use crate::exec::operators::sink::SinkHandle;
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};
use crate::exec::sort::{
    converter_for_keys, key_columns, take_record_batch, NullPlacement, SortKey,
};

/// Options of the `select_k_sink` factory: how many rows to keep and the
/// ordering that defines "best".
#[derive(Clone)]
pub struct SelectKOptions {
    pub k: usize,
    pub sort_keys: Vec<SortKey>,
}

impl SelectKOptions {
    pub fn new(k: usize, sort_keys: Vec<SortKey>) -> Self {
        Self { k, sort_keys }
    }

    /// Conventional top-K: largest values of the named columns first.
    pub fn top_k(k: usize, names: &[&str]) -> Self {
        Self {
            k,
            sort_keys: names.iter().map(|name| SortKey::desc(*name)).collect(),
        }
    }
}

pub struct SelectKSinkNodeOptions {
    pub options: SelectKOptions,
    pub handle: SinkHandle,
}

impl SelectKSinkNodeOptions {
    pub fn new(options: SelectKOptions, handle: SinkHandle) -> Self {
        Self { options, handle }
    }
}

struct HeapEntry {
    key: OwnedRow,
    index: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .row()
            .cmp(&other.key.row())
            .then_with(|| self.index.cmp(&other.index))
    }
}

pub struct SelectKSinkNode {
    base: NodeBase,
    options: SelectKOptions,
    queue: Arc<BatchQueue>,
    /// At most `k` rows, kept sorted by the sort keys.
    kept: Mutex<Option<RecordBatch>>,
}

impl SelectKSinkNode {
    fn absorb(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() || self.options.k == 0 {
            return Ok(());
        }
        let Some(input) = self.base.input(0) else {
            return Ok(());
        };
        let schema = input.output_schema();
        let incoming = batch.to_record_batch(&schema)?;
        let mut kept = self.kept.lock().unwrap_or_else(|e| e.into_inner());
        let combined = match kept.take() {
            Some(previous) => concat_batches(&schema, &[previous, incoming])?,
            None => incoming,
        };
        let converter = converter_for_keys(
            schema.as_ref(),
            &self.options.sort_keys,
            NullPlacement::AtEnd,
        )?;
        let columns = key_columns(&combined, &self.options.sort_keys)?;
        let rows = converter.convert_columns(&columns)?;

        // Max-heap of the current best k: the worst retained row sits on
        // top and is evicted first.
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(self.options.k + 1);
        for index in 0..combined.num_rows() {
            heap.push(HeapEntry {
                key: rows.row(index).owned(),
                index: index as u32,
            });
            if heap.len() > self.options.k {
                heap.pop();
            }
        }
        let ordered = heap.into_sorted_vec();
        let indices =
            arrow::array::UInt32Array::from(ordered.iter().map(|e| e.index).collect::<Vec<_>>());
        *kept = Some(take_record_batch(&combined, &indices)?);
        Ok(())
    }
}

impl ExecNode for SelectKSinkNode {
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
        if let Err(err) = self.absorb(&batch) {
            self.base.mark_errored();
            self.queue.fail(err.clone());
            self.base.finished().settle(Err(err));
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        if self.base.is_errored() {
            return;
        }
        let kept = {
            let mut kept = self.kept.lock().unwrap_or_else(|e| e.into_inner());
            kept.take()
        };
        if let Some(kept) = kept {
            if kept.num_rows() > 0 {
                self.queue.push(Batch::from_record_batch(&kept));
            }
        }
        self.queue.close();
        self.base.finished().settle(Ok(()));
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.mark_errored();
        {
            let mut kept = self.kept.lock().unwrap_or_else(|e| e.into_inner());
            *kept = None;
        }
        self.queue.fail(error.clone());
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        self.queue.close();
        self.base.finished().settle(Ok(()));
    }

    fn render_extra(&self) -> Option<String> {
        let keys: Vec<String> = self
            .options
            .sort_keys
            .iter()
            .map(|key| {
                format!(
                    "{} {}",
                    key.name,
                    match key.order {
                        crate::exec::sort::SortOrder::Ascending => "ASC",
                        crate::exec::sort::SortOrder::Descending => "DESC",
                    }
                )
            })
            .collect();
        Some(format!("k={}, sort_keys=[{}]", self.options.k, keys.join(", ")))
    }
}

pub(crate) fn make_select_k_sink_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("select_k_sink", &inputs, 1)?;
    let options = typed_options::<SelectKSinkNodeOptions>(options, "select_k_sink")?;
    if options.options.k == 0 {
        return Err(EngineError::Invalid(
            "select_k_sink requires k greater than zero".to_string(),
        ));
    }
    converter_for_keys(
        inputs[0].output_schema().as_ref(),
        &options.options.sort_keys,
        NullPlacement::AtEnd,
    )?;
    let node = Arc::new(SelectKSinkNode {
        base: NodeBase::new(
            "SelectKSinkNode",
            Arc::new(arrow::datatypes::Schema::empty()),
            inputs,
            vec!["collected".to_string()],
            0,
        ),
        options: options.options.clone(),
        queue: options.handle.queue(),
        kept: Mutex::new(None),
    });
    Ok(plan.add_node(node, label))
}
