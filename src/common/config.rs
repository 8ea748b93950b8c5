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
//! Engine configuration.
//!
//! Responsibilities:
//! - Declares the engine tunables with serde defaults and loads them from
//!   `$BASALT_CONFIG` or `./basalt.toml` when present.
//! - Exposes accessor functions that fall back to built-in defaults so the
//!   engine runs without any config file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

use crate::common::error::{EngineError, Result};

static CONFIG: OnceLock<BasaltConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sink_buffer_capacity() -> usize {
    16
}

fn default_sink_resume_watermark() -> usize {
    8
}

fn default_parallel_workers() -> usize {
    0
}

#[derive(Clone, Deserialize)]
pub struct BasaltConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression. Takes precedence over
    /// `log_level` when set.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Bounded buffer size of pull-style sinks before backpressure engages.
    #[serde(default = "default_sink_buffer_capacity")]
    pub sink_buffer_capacity: usize,

    /// Low-water mark at which a paused upstream is resumed.
    #[serde(default = "default_sink_resume_watermark")]
    pub sink_resume_watermark: usize,

    /// Worker count of the parallel scheduler. 0 means auto-detect.
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sink_buffer_capacity: default_sink_buffer_capacity(),
            sink_resume_watermark: default_sink_resume_watermark(),
            parallel_workers: default_parallel_workers(),
        }
    }
}

impl Default for BasaltConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl BasaltConfig {
    fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| EngineError::IoError(format!("read {}: {e}", path.display())))?;
        toml::from_str(&s)
            .map_err(|e| EngineError::Invalid(format!("parse toml {}: {e}", path.display())))
    }
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static BasaltConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = BasaltConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

/// Resolve the active config: an explicitly loaded file, a file found via the
/// environment, or built-in defaults.
pub fn config() -> &'static BasaltConfig {
    CONFIG.get_or_init(|| {
        if let Some(path) = config_path_from_env() {
            match BasaltConfig::load_from_file(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    crate::basalt_logging::warn!("failed to load {}: {}", path.display(), e);
                }
            }
        }
        BasaltConfig::default()
    })
}

fn config_path_from_env() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("BASALT_CONFIG") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    let candidate = PathBuf::from("basalt.toml");
    candidate.exists().then_some(candidate)
}

pub(crate) fn sink_buffer_capacity() -> usize {
    config().runtime.sink_buffer_capacity.max(1)
}

pub(crate) fn sink_resume_watermark() -> usize {
    let capacity = sink_buffer_capacity();
    config().runtime.sink_resume_watermark.min(capacity - 1)
}

pub(crate) fn parallel_workers() -> usize {
    let configured = config().runtime.parallel_workers;
    if configured > 0 {
        return configured;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
