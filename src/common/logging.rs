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
use std::fmt;
use std::sync::OnceLock;

use chrono::Local;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

static INIT: OnceLock<()> = OnceLock::new();

/// Single-line event format:
///
/// ```text
/// 2026-08-02 14:03:27.518402  INFO [basalt-dispatch] src/exec/plan/mod.rs:173 plan starting: nodes=2
/// ```
///
/// The thread column carries the thread name so dispatcher and worker
/// output can be told apart; unnamed pool threads fall back to their id.
struct EngineLogFormat;

impl<S, N> FormatEvent<S, N> for EngineLogFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} {:>5} ",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            meta.level()
        )?;

        let thread = std::thread::current();
        match thread.name() {
            Some(name) => write!(writer, "[{}] ", name)?,
            None => write!(writer, "[{:?}] ", thread.id())?,
        }

        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            write!(writer, "{}:{} ", file, line)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        // ANSI colors only when stderr is a terminal; redirected logs stay
        // free of escape codes.
        let ansi = atty::is(atty::Stream::Stderr);
        let _ = tracing_fmt()
            .with_ansi(ansi)
            .event_format(EngineLogFormat)
            .with_env_filter(EnvFilter::new(level))
            .with_writer(std::io::stderr)
            .try_init();
    });
}

pub fn init() {
    init_with_level("info");
}

/// Initialize from the loaded engine config: a full filter expression when
/// present, otherwise the configured level.
pub fn init_from_config() {
    let cfg = crate::common::config::config();
    match cfg.log_filter.as_deref() {
        Some(filter) => init_with_level(filter),
        None => init_with_level(&cfg.log_level),
    }
}

pub use tracing::instrument;
pub use tracing::{debug, error, info, trace, warn};
