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
//! Work-item scheduling for plan execution.
//!
//! Responsibilities:
//! - Runs operator work items either on a single FIFO dispatcher thread
//!   (serial mode) or on a worker pool (parallel mode).
//! - Used by sources and the plan to run drain steps and teardown off the
//!   caller's thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use threadpool::ThreadPool;

use crate::basalt_logging::debug;

type Task = Box<dyn FnOnce() + Send>;

/// Scheduler backing one execution context.
///
/// Serial mode drains work items in insertion order on one dispatcher
/// thread. Parallel mode hands work items to a `threadpool` pool and gives
/// no ordering guarantee across items.
pub struct Scheduler {
    inner: SchedulerImpl,
}

enum SchedulerImpl {
    Serial(SerialDispatcher),
    Parallel(ThreadPool),
}

impl Scheduler {
    pub fn serial() -> Arc<Self> {
        Arc::new(Self {
            inner: SchedulerImpl::Serial(SerialDispatcher::new()),
        })
    }

    pub fn parallel(workers: usize) -> Arc<Self> {
        let workers = workers.max(1);
        debug!("parallel scheduler started: workers={}", workers);
        Arc::new(Self {
            inner: SchedulerImpl::Parallel(ThreadPool::new(workers)),
        })
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.inner, SchedulerImpl::Parallel(_))
    }

    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        match &self.inner {
            SchedulerImpl::Serial(dispatcher) => dispatcher.enqueue(Box::new(task)),
            SchedulerImpl::Parallel(pool) => pool.execute(task),
        }
    }
}

struct DispatcherShared {
    queue: Mutex<VecDeque<Task>>,
    cv: Condvar,
    shutdown: AtomicBool,
}

struct SerialDispatcher {
    shared: Arc<DispatcherShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SerialDispatcher {
    fn new() -> Self {
        let shared = Arc::new(DispatcherShared {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("basalt-dispatch".to_string())
            .spawn(move || Self::run(worker_shared))
            .expect("spawn dispatcher thread");
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn enqueue(&self, task: Task) {
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(task);
        self.shared.cv.notify_one();
    }

    fn run(shared: Arc<DispatcherShared>) {
        loop {
            let task = {
                let mut queue = shared.queue.lock().unwrap_or_else(|e| e.into_inner());
                loop {
                    if let Some(task) = queue.pop_front() {
                        break task;
                    }
                    if shared.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    queue = shared.cv.wait(queue).unwrap_or_else(|e| e.into_inner());
                }
            };
            task();
        }
    }
}

impl Drop for SerialDispatcher {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.cv.notify_all();
        let handle = {
            let mut guard = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn serial_scheduler_runs_tasks_in_insertion_order() {
        let scheduler = Scheduler::serial();
        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            scheduler.spawn(move || tx.send(i).expect("send"));
        }
        let seen: Vec<i32> = (0..8).map(|_| rx.recv().expect("recv")).collect();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_scheduler_completes_all_tasks() {
        let scheduler = Scheduler::parallel(4);
        let (tx, rx) = mpsc::channel();
        for i in 0..32 {
            let tx = tx.clone();
            scheduler.spawn(move || tx.send(i).expect("send"));
        }
        let mut seen: Vec<i32> = (0..32).map(|_| rx.recv().expect("recv")).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }
}
