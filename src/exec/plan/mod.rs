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
//! Execution plan container and lifecycle driver.
//!
//! Responsibilities:
//! - Owns the node DAG, validates its topology, and derives source/sink
//!   sets.
//! - Drives the start (reverse topological) and stop (forward topological)
//!   lifecycle, unwinding started nodes when a start fails.
//! - Settles the plan completion signal from sink completions with
//!   first-writer-wins error semantics.
//!
//! Key exported interfaces:
//! - Types: `ExecPlan`.

pub mod declare;
pub mod node;
pub mod signal;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub use node::{ExecNode, NodeBase, NodeRef, NodeState};
pub use signal::FinishSignal;

use crate::basalt_logging::{debug, warn};
use crate::common::error::{EngineError, Result};
use crate::exec::plan::node::node_ptr;
use crate::runtime::context::ExecContext;

/// Container and driver of a DAG of [`ExecNode`]s.
///
/// The plan owns its nodes exclusively; nodes hold non-owning links to their
/// outputs and a non-owning back-reference to the plan state. Nodes are torn
/// down in reverse insertion order when the plan drops.
pub struct ExecPlan {
    state: Arc<PlanState>,
}

pub(crate) struct PlanState {
    ctx: ExecContext,
    nodes: Mutex<Vec<NodeRef>>,
    started: AtomicBool,
    stopped: AtomicBool,
    finished: Arc<FinishSignal>,
}

impl ExecPlan {
    pub fn make(ctx: ExecContext) -> Self {
        Self {
            state: Arc::new(PlanState {
                ctx,
                nodes: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                finished: FinishSignal::new(),
            }),
        }
    }

    pub fn make_default() -> Self {
        Self::make(ExecContext::serial())
    }

    pub fn context(&self) -> &ExecContext {
        &self.state.ctx
    }

    /// Register a node with the plan, binding it to its inputs' outputs and
    /// assigning the label. An empty label becomes the stringified insertion
    /// ordinal.
    pub fn add_node(&self, node: NodeRef, label: &str) -> NodeRef {
        let mut nodes = self.state.nodes.lock().unwrap_or_else(|e| e.into_inner());
        let ordinal = nodes.len();
        let label = if label.is_empty() {
            ordinal.to_string()
        } else {
            label.to_string()
        };
        node.base().set_label(label);
        node.base().attach_self(&node);
        for input in node.base().inputs() {
            input.base().add_output(&node);
        }
        nodes.push(Arc::clone(&node));
        node
    }

    pub fn nodes(&self) -> Vec<NodeRef> {
        let nodes = self.state.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.clone()
    }

    /// Nodes with no inputs, in insertion order.
    pub fn sources(&self) -> Vec<NodeRef> {
        self.nodes()
            .into_iter()
            .filter(|node| node.base().inputs().is_empty())
            .collect()
    }

    /// Nodes declared with no outputs, in insertion order.
    pub fn sinks(&self) -> Vec<NodeRef> {
        self.nodes()
            .into_iter()
            .filter(|node| node.base().num_outputs() == 0)
            .collect()
    }

    /// Check the structural invariants: the plan is non-empty, every
    /// declared output is bound, every input edge stays inside the plan, and
    /// the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        let nodes = self.nodes();
        if nodes.is_empty() {
            return Err(EngineError::Invalid(
                "an empty plan is not runnable".to_string(),
            ));
        }
        let owned: HashSet<usize> = nodes.iter().map(|n| node_ptr(n.as_ref())).collect();
        for node in &nodes {
            let declared = node.base().num_outputs();
            let bound = node.base().num_bound_outputs();
            if declared != bound {
                return Err(EngineError::Invalid(format!(
                    "node {} declares {declared} outputs but {bound} are bound",
                    node.label()
                )));
            }
            for input in node.base().inputs() {
                if !owned.contains(&node_ptr(input.as_ref())) {
                    return Err(EngineError::Invalid(format!(
                        "node {} has an input not owned by this plan",
                        node.label()
                    )));
                }
            }
        }
        self.topological_order(&nodes).map(|_| ())
    }

    fn topological_order(&self, nodes: &[NodeRef]) -> Result<Vec<NodeRef>> {
        topological_order(nodes)
    }

    /// Start every node, sinks before sources, so downstream is ready for
    /// the first batch. On a node failure the already-started suffix is
    /// stopped in reverse start order and the error is returned.
    pub fn start_producing(&self) -> Result<()> {
        if self.state.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Invalid(
                "plan has already run and cannot be restarted".to_string(),
            ));
        }
        let nodes = self.nodes();
        let order = self.topological_order(&nodes)?;
        debug!("plan starting: nodes={}", order.len());

        let mut started: Vec<NodeRef> = Vec::with_capacity(order.len());
        for node in order.iter().rev() {
            match node.start_producing() {
                Ok(()) => {
                    node.base().set_state(NodeState::Started);
                    started.push(Arc::clone(node));
                }
                Err(err) => {
                    warn!(
                        "node {} failed to start: {}; unwinding {} started nodes",
                        node.label(),
                        err,
                        started.len()
                    );
                    for undo in started.iter().rev() {
                        undo.base().set_state(NodeState::Stopping);
                        undo.stop_producing();
                        undo.base().set_state(NodeState::Stopped);
                    }
                    self.state.finished.settle(Err(err.clone()));
                    return Err(err);
                }
            }
        }

        self.watch_sinks();
        Ok(())
    }

    /// Observe every sink's completion. The plan finishes OK once all sinks
    /// settle successfully; the first sink error settles the plan and tears
    /// the rest of the graph down.
    fn watch_sinks(&self) {
        let sinks = self.sinks();
        if sinks.is_empty() {
            self.state.finished.settle(Ok(()));
            return;
        }
        let remaining = Arc::new(AtomicUsize::new(sinks.len()));
        for sink in sinks {
            let signal = sink.finished();
            let plan = Arc::downgrade(&self.state);
            let remaining = Arc::clone(&remaining);
            let observed = Arc::clone(&signal);
            signal.add_observer(Box::new(move || {
                let Some(plan) = plan.upgrade() else {
                    return;
                };
                match observed.peek() {
                    Some(Err(err)) => {
                        if plan.finished.settle(Err(err)) {
                            PlanState::schedule_stop(&plan);
                        }
                    }
                    _ => {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            plan.finished.settle(Ok(()));
                        }
                    }
                }
            }));
        }
    }

    /// Cooperative teardown, sources first. Idempotent; concurrent calls
    /// collapse onto the first.
    pub fn stop_producing(&self) {
        PlanState::stop_all(&self.state);
    }

    /// Plan completion: OK once every sink settled successfully, otherwise
    /// the first observed error.
    pub fn finished(&self) -> Arc<FinishSignal> {
        Arc::clone(&self.state.finished)
    }
}

impl PlanState {
    fn stop_all(state: &Arc<PlanState>) {
        if state.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("plan stopping");
        state.ctx.cancel();
        let nodes = {
            let nodes = state.nodes.lock().unwrap_or_else(|e| e.into_inner());
            nodes.clone()
        };
        // Stop in forward topological order so upstream stops feeding before
        // downstream drains. Fall back to insertion order on a broken
        // topology, which can only happen for plans that never validated.
        let order = topological_order(&nodes).unwrap_or(nodes);
        for node in &order {
            node.base().set_state(NodeState::Stopping);
            node.stop_producing();
            node.base().set_state(NodeState::Stopped);
        }
    }

    fn schedule_stop(state: &Arc<PlanState>) {
        let weak: Weak<PlanState> = Arc::downgrade(state);
        state.ctx.scheduler().spawn(move || {
            if let Some(state) = weak.upgrade() {
                PlanState::stop_all(&state);
            }
        });
    }
}

impl Drop for PlanState {
    fn drop(&mut self) {
        // Nodes are released in reverse insertion order, sinks after the
        // sources that fed them.
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        while nodes.pop().is_some() {}
    }
}

/// Forward topological order (sources first), stable with respect to
/// insertion order.
fn topological_order(nodes: &[NodeRef]) -> Result<Vec<NodeRef>> {
    let mut order: Vec<NodeRef> = Vec::with_capacity(nodes.len());
    let mut placed: HashSet<usize> = HashSet::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let before = order.len();
        for node in nodes {
            let ptr = node_ptr(node.as_ref());
            if placed.contains(&ptr) {
                continue;
            }
            let ready = node
                .base()
                .inputs()
                .iter()
                .all(|input| placed.contains(&node_ptr(input.as_ref())));
            if ready {
                placed.insert(ptr);
                order.push(Arc::clone(node));
            }
        }
        if order.len() == before {
            return Err(EngineError::Invalid(
                "plan topology contains a cycle".to_string(),
            ));
        }
    }
    Ok(order)
}

impl fmt::Display for ExecPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.nodes();
        writeln!(f, "ExecPlan with {} nodes:", nodes.len())?;
        for node in &nodes {
            writeln!(f, "{}", node.to_node_string())?;
        }
        Ok(())
    }
}
