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
//! Operator node contract and shared node state.
//!
//! Responsibilities:
//! - Defines the [`ExecNode`] lifecycle and data-flow callbacks every
//!   operator implements, with default backpressure forwarding.
//! - [`NodeBase`] carries the per-node state the plan relies on: label,
//!   topology edges, output schema, completion signal, emission counters,
//!   and per-edge backpressure debouncing.
//!
//! Key exported interfaces:
//! - Types: `ExecNode`, `NodeBase`, `NodeRef`, `NodeState`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use arrow::datatypes::SchemaRef;

use crate::basalt_logging::debug;
use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::plan::signal::FinishSignal;

/// Shared handle to an operator node owned by a plan.
pub type NodeRef = Arc<dyn ExecNode>;

/// Identity of a node for slot dispatch and topology bookkeeping.
pub(crate) fn node_ptr(node: &dyn ExecNode) -> usize {
    node as *const dyn ExecNode as *const () as usize
}

pub(crate) fn same_node(a: &dyn ExecNode, b: &dyn ExecNode) -> bool {
    node_ptr(a) == node_ptr(b)
}

/// Node lifecycle states. `Errored` is terminal and reachable from any
/// non-initial state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Initial = 0,
    Started = 1,
    Producing = 2,
    Stopping = 3,
    Stopped = 4,
    Errored = 5,
}

impl NodeState {
    fn from_u8(value: u8) -> NodeState {
        match value {
            0 => NodeState::Initial,
            1 => NodeState::Started,
            2 => NodeState::Producing,
            3 => NodeState::Stopping,
            4 => NodeState::Stopped,
            _ => NodeState::Errored,
        }
    }
}

/// Operator contract: one vertex of the plan DAG.
///
/// Lifecycle calls come from the owning plan (`start_producing` in reverse
/// topological order, `stop_producing` in forward topological order). Data
/// calls come from upstream nodes; calls from one upstream on one input slot
/// are serialized, calls from different upstreams may arrive concurrently.
pub trait ExecNode: Send + Sync {
    fn base(&self) -> &NodeBase;

    /// Called once by the plan before any input can arrive. Downstream nodes
    /// are already started.
    fn start_producing(&self) -> Result<()>;

    /// Upstream delivers one batch. Must not block the sender beyond the
    /// batch's own processing cost.
    fn input_received(&self, sender: &NodeRef, batch: Batch);

    /// Upstream declares its final batch count for this edge. Arrives
    /// strictly after every `input_received` from that upstream.
    fn input_finished(&self, sender: &NodeRef, total_batches: usize);

    /// Upstream hit a terminal failure; forward it downstream and stop.
    fn error_received(&self, sender: &NodeRef, error: EngineError);

    /// Idempotent cooperative teardown.
    fn stop_producing(&self);

    /// Backpressure hint from `output`. Counters are monotonic per edge;
    /// stale deliveries are ignored. The default forwards upstream.
    fn pause_producing(&self, output: &NodeRef, counter: u64) {
        if !self.base().accept_backpressure(output, counter, true) {
            return;
        }
        let Some(me) = self.base().self_node() else {
            return;
        };
        for (idx, input) in self.base().inputs().iter().enumerate() {
            let forwarded = self.base().bump_forward_counter(idx);
            input.pause_producing(&me, forwarded);
        }
    }

    /// Inverse of [`pause_producing`](ExecNode::pause_producing). The
    /// default forwards upstream once no output is paused anymore.
    fn resume_producing(&self, output: &NodeRef, counter: u64) {
        if !self.base().accept_backpressure(output, counter, false) {
            return;
        }
        if self.base().any_output_paused() {
            return;
        }
        let Some(me) = self.base().self_node() else {
            return;
        };
        for (idx, input) in self.base().inputs().iter().enumerate() {
            let forwarded = self.base().bump_forward_counter(idx);
            input.resume_producing(&me, forwarded);
        }
    }

    /// Type-specific `key=value` fragment appended to the node display.
    fn render_extra(&self) -> Option<String> {
        None
    }

    fn kind(&self) -> &'static str {
        self.base().kind
    }

    fn label(&self) -> String {
        self.base().label()
    }

    fn output_schema(&self) -> SchemaRef {
        self.base().output_schema()
    }

    /// One-shot completion signal observed by the plan.
    fn finished(&self) -> Arc<FinishSignal> {
        self.base().finished()
    }

    fn to_node_string(&self) -> String {
        self.base().render(self.render_extra())
    }
}

impl fmt::Debug for dyn ExecNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_node_string())
    }
}

struct EdgeBackpressure {
    last_counter: u64,
    paused: bool,
}

/// State shared by every node implementation.
pub struct NodeBase {
    kind: &'static str,
    label: Mutex<String>,
    self_node: OnceLock<Weak<dyn ExecNode>>,
    inputs: Vec<NodeRef>,
    input_labels: Vec<String>,
    num_outputs: usize,
    outputs: Mutex<Vec<Weak<dyn ExecNode>>>,
    output_schema: SchemaRef,
    finished: Arc<FinishSignal>,
    state: AtomicU8,
    errored: AtomicBool,
    emitted: AtomicUsize,
    backpressure: Mutex<Vec<EdgeBackpressure>>,
    forward_counters: Vec<AtomicU64>,
}

impl NodeBase {
    pub fn new(
        kind: &'static str,
        output_schema: SchemaRef,
        inputs: Vec<NodeRef>,
        input_labels: Vec<String>,
        num_outputs: usize,
    ) -> Self {
        let mut input_labels = input_labels;
        while input_labels.len() < inputs.len() {
            input_labels.push(format!("input_{}_label", input_labels.len()));
        }
        let forward_counters = (0..inputs.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            kind,
            label: Mutex::new(String::new()),
            self_node: OnceLock::new(),
            inputs,
            input_labels,
            num_outputs,
            outputs: Mutex::new(Vec::new()),
            output_schema,
            finished: FinishSignal::new(),
            state: AtomicU8::new(NodeState::Initial as u8),
            errored: AtomicBool::new(false),
            emitted: AtomicUsize::new(0),
            backpressure: Mutex::new(Vec::new()),
            forward_counters,
        }
    }

    pub fn label(&self) -> String {
        self.label.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_label(&self, label: String) {
        *self.label.lock().unwrap_or_else(|e| e.into_inner()) = label;
    }

    pub(crate) fn attach_self(&self, node: &NodeRef) {
        let _ = self.self_node.set(Arc::downgrade(node));
    }

    pub fn self_node(&self) -> Option<NodeRef> {
        self.self_node.get().and_then(Weak::upgrade)
    }

    pub fn inputs(&self) -> &[NodeRef] {
        &self.inputs
    }

    pub fn input(&self, idx: usize) -> Option<&NodeRef> {
        self.inputs.get(idx)
    }

    pub fn input_labels(&self) -> &[String] {
        &self.input_labels
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub(crate) fn add_output(&self, node: &NodeRef) {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.push(Arc::downgrade(node));
    }

    /// Bound downstream nodes, in binding order.
    pub fn outputs(&self) -> Vec<NodeRef> {
        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn num_bound_outputs(&self) -> usize {
        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.len()
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    pub fn finished(&self) -> Arc<FinishSignal> {
        Arc::clone(&self.finished)
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Marks the terminal error state. Returns whether this was the first
    /// error seen by the node, so forwarding happens exactly once.
    pub(crate) fn mark_errored(&self) -> bool {
        let first = !self.errored.swap(true, Ordering::AcqRel);
        if first {
            self.set_state(NodeState::Errored);
        }
        first
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Number of batches emitted so far on each output edge.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Acquire)
    }

    /// Resolve the input slot of `sender` by identity against the ordered
    /// inputs list. A repeated upstream resolves to its first slot.
    pub fn input_index_of(&self, sender: &NodeRef) -> Option<usize> {
        self.inputs
            .iter()
            .position(|input| same_node(input.as_ref(), sender.as_ref()))
    }

    /// Deliver one batch to every bound output with this edge's next
    /// monotonic batch index.
    pub fn emit(&self, batch: Batch) {
        let index = self.emitted.fetch_add(1, Ordering::AcqRel);
        let Some(me) = self.self_node() else {
            return;
        };
        for output in self.outputs() {
            output.input_received(&me, batch.clone().with_index(index));
        }
    }

    /// Declare the final emitted count to every bound output.
    pub fn emit_finished(&self) {
        let Some(me) = self.self_node() else {
            return;
        };
        let total = self.emitted();
        for output in self.outputs() {
            output.input_finished(&me, total);
        }
    }

    /// Forward an error to every bound output, at most once per node.
    pub fn emit_error(&self, error: EngineError) {
        if !self.mark_errored() {
            return;
        }
        debug!("node {} forwarding error: {}", self.label(), error);
        let Some(me) = self.self_node() else {
            return;
        };
        for output in self.outputs() {
            output.error_received(&me, error.clone());
        }
    }

    /// Record a pause/resume delivery for the edge to `output`. Returns
    /// false when the counter is stale or the output is unknown.
    pub fn accept_backpressure(&self, output: &NodeRef, counter: u64, paused: bool) -> bool {
        let index = {
            let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
            outputs
                .iter()
                .position(|o| o.upgrade().is_some_and(|o| same_node(o.as_ref(), output.as_ref())))
        };
        let Some(index) = index else {
            return false;
        };
        let mut edges = self.backpressure.lock().unwrap_or_else(|e| e.into_inner());
        while edges.len() <= index {
            edges.push(EdgeBackpressure {
                last_counter: 0,
                paused: false,
            });
        }
        let edge = &mut edges[index];
        if counter <= edge.last_counter {
            return false;
        }
        edge.last_counter = counter;
        edge.paused = paused;
        true
    }

    pub fn any_output_paused(&self) -> bool {
        let edges = self.backpressure.lock().unwrap_or_else(|e| e.into_inner());
        edges.iter().any(|edge| edge.paused)
    }

    /// Next monotonic counter for backpressure forwarded to input `idx`.
    pub fn bump_forward_counter(&self, idx: usize) -> u64 {
        self.forward_counters[idx].fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn render(&self, extra: Option<String>) -> String {
        let mut out = format!("{}{{\"{}\"", self.kind, self.label());
        if !self.inputs.is_empty() {
            let parts: Vec<String> = self
                .input_labels
                .iter()
                .zip(self.inputs.iter())
                .map(|(role, input)| format!("{}: \"{}\"", role, input.label()))
                .collect();
            out.push_str(&format!(", inputs=[{}]", parts.join(", ")));
        }
        if self.num_outputs > 0 {
            let parts: Vec<String> = self
                .outputs()
                .iter()
                .map(|output| format!("\"{}\"", output.label()))
                .collect();
            out.push_str(&format!(", outputs=[{}]", parts.join(", ")));
        }
        if let Some(extra) = extra {
            out.push_str(", ");
            out.push_str(&extra);
        }
        out.push('}');
        out
    }
}
