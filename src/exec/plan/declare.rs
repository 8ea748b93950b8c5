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
//! Declarative plan construction.
//!
//! Responsibilities:
//! - [`Declaration`] trees describe a plan as factory names plus typed
//!   options; `add_to_plan` resolves them bottom-up through the registry.
//! - The process-wide [`FactoryRegistry`] maps factory names to constructor
//!   functions; it is populated once by the operator modules.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;

use crate::common::error::{EngineError, Result};
use crate::exec::plan::node::NodeRef;
use crate::exec::plan::ExecPlan;

/// Opaque options handle passed through the engine; each factory downcasts
/// to its own typed options.
pub type NodeOptions = Arc<dyn Any + Send + Sync>;

/// Node constructor registered under a factory name.
pub type NodeFactory = fn(&ExecPlan, Vec<NodeRef>, &NodeOptions, &str) -> Result<NodeRef>;

/// Name-keyed factory table.
pub struct FactoryRegistry {
    factories: HashMap<&'static str, NodeFactory>,
}

impl FactoryRegistry {
    fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: NodeFactory) {
        self.factories.insert(name, factory);
    }

    pub fn get(&self, name: &str) -> Option<NodeFactory> {
        self.factories.get(name).copied()
    }
}

/// Registry of built-in operator factories, initialized on first use and
/// read without synchronization afterwards.
pub fn default_registry() -> &'static FactoryRegistry {
    static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = FactoryRegistry::new();
        crate::exec::operators::register_all(&mut registry);
        registry
    })
}

/// Downcast an opaque options handle to the factory's typed options.
pub fn typed_options<T: Any + Send + Sync>(
    options: &NodeOptions,
    factory: &str,
) -> Result<Arc<T>> {
    Arc::clone(options)
        .downcast::<T>()
        .map_err(|_| EngineError::Invalid(format!("mismatched options type for factory {factory}")))
}

/// Declarative description of one node: a factory name, its options, the
/// declarations of its inputs, and a display label (defaulting to the
/// factory name).
#[derive(Clone)]
pub struct Declaration {
    pub factory_name: String,
    pub options: NodeOptions,
    pub inputs: Vec<Declaration>,
    pub label: String,
}

impl Declaration {
    pub fn new(factory_name: impl Into<String>, options: impl Any + Send + Sync) -> Self {
        Self::from_options(factory_name, Arc::new(options))
    }

    pub fn from_options(factory_name: impl Into<String>, options: NodeOptions) -> Self {
        let factory_name = factory_name.into();
        let label = factory_name.clone();
        Self {
            factory_name,
            options,
            inputs: Vec::new(),
            label,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<Declaration>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sugar for a linear pipeline: each declaration's sole input is the
    /// previous one. Returns the final declaration of the chain.
    pub fn sequence(declarations: Vec<Declaration>) -> Declaration {
        let mut iter = declarations.into_iter();
        let mut current = iter
            .next()
            .expect("Declaration::sequence requires at least one declaration");
        for mut next in iter {
            next.inputs.push(current);
            current = next;
        }
        current
    }

    /// Walk the tree bottom-up, constructing each node through the registry
    /// and returning the root node.
    pub fn add_to_plan(&self, plan: &ExecPlan) -> Result<NodeRef> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            inputs.push(input.add_to_plan(plan)?);
        }
        let factory = default_registry().get(&self.factory_name).ok_or_else(|| {
            EngineError::Invalid(format!("unknown factory name {}", self.factory_name))
        })?;
        factory(plan, inputs, &self.options, &self.label)
    }
}

/// Construct a single node through the registry, outside a declaration tree.
pub fn make_exec_node(
    factory_name: &str,
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: impl Any + Send + Sync,
) -> Result<NodeRef> {
    let factory = default_registry()
        .get(factory_name)
        .ok_or_else(|| EngineError::Invalid(format!("unknown factory name {factory_name}")))?;
    let options: NodeOptions = Arc::new(options);
    factory(plan, inputs, &options, factory_name)
}
