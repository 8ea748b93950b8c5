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
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::config;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::scheduler::Scheduler;

/// Shared execution environment handed to a plan: the scheduler that runs
/// work items, the memory tracker nodes account against, and a cooperative
/// cancellation flag.
#[derive(Clone)]
pub struct ExecContext {
    scheduler: Arc<Scheduler>,
    mem_tracker: Arc<MemTracker>,
    cancelled: Arc<AtomicBool>,
}

impl ExecContext {
    pub fn serial() -> Self {
        Self::with_scheduler(Scheduler::serial())
    }

    pub fn parallel() -> Self {
        Self::with_scheduler(Scheduler::parallel(config::parallel_workers()))
    }

    pub fn with_scheduler(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            mem_tracker: MemTracker::root("ExecContext"),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::serial()
    }
}
