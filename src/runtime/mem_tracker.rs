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
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks logical memory usage for a component and its ancestors.
///
/// This is a lightweight accounting utility that only records bytes
/// explicitly reported by buffering operators. Consumption propagates to the
/// parent chain so a plan-level tracker observes the total footprint of its
/// nodes.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    parent: Option<Arc<MemTracker>>,
    consumed: AtomicI64,
    peak: AtomicI64,
}

impl MemTracker {
    pub fn root(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            parent: None,
            consumed: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            parent: Some(Arc::clone(parent)),
            consumed: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn consume(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        let current = self.consumed.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.update_peak(current);
        if let Some(parent) = self.parent.as_ref() {
            parent.consume(bytes);
        }
    }

    pub fn release(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        self.consumed.fetch_sub(bytes, Ordering::AcqRel);
        if let Some(parent) = self.parent.as_ref() {
            parent.release(bytes);
        }
    }

    pub fn current(&self) -> i64 {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }

    fn update_peak(&self, current: i64) {
        let mut seen = self.peak.load(Ordering::Acquire);
        while current > seen {
            match self.peak.compare_exchange(
                seen,
                current,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => seen = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_propagates_to_parent() {
        let root = MemTracker::root("plan");
        let child = MemTracker::new_child("sink", &root);
        child.consume(128);
        child.consume(64);
        assert_eq!(child.current(), 192);
        assert_eq!(root.current(), 192);
        child.release(128);
        assert_eq!(root.current(), 64);
        assert_eq!(root.peak(), 192);
    }
}
