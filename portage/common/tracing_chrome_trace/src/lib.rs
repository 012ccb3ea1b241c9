// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A [`tracing_subscriber::Layer`] that records spans and events as a
//! [`chrome_trace::Trace`] and writes it to disk on drop, so the resulting
//! file opens directly in `chrome://tracing` or Perfetto.

use anyhow::Result;
use chrome_trace::{Event, Phase, Trace};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};
use tracing::span;
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

fn now_micros(origin: Instant) -> f64 {
    origin.elapsed().as_nanos() as f64 / 1000.0
}

fn thread_id() -> i64 {
    // SAFETY: gettid(2) takes no arguments and cannot fail.
    (unsafe { libc::syscall(libc::SYS_gettid) }) as i64
}

struct Inner {
    origin: Instant,
    process_id: i64,
    events: Vec<Event>,
}

/// Stored as a span extension to remember when the span was entered.
struct SpanStart(f64);

/// A [`Layer`] that appends Begin/End events for every span and Instant
/// events for every logged event, buffering them in memory until the
/// [`FlushGuard`] is dropped.
pub struct ChromeTraceLayer {
    inner: Arc<Mutex<Inner>>,
}

impl ChromeTraceLayer {
    /// Creates a layer that will write its accumulated trace to `path` when
    /// the returned [`FlushGuard`] is dropped (or when [`FlushGuard::flush`]
    /// is called explicitly).
    pub fn new(path: &Path) -> Result<(Self, FlushGuard)> {
        let inner = Arc::new(Mutex::new(Inner {
            origin: Instant::now(),
            process_id: std::process::id() as i64,
            events: Vec::new(),
        }));
        Ok((
            Self {
                inner: inner.clone(),
            },
            FlushGuard {
                inner,
                path: path.to_owned(),
                flushed: false,
            },
        ))
    }
}

impl<S> Layer<S> for ChromeTraceLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let span = ctx.span(id).expect("span must exist in on_new_span");
        let inner = self.inner.lock().unwrap();
        span.extensions_mut()
            .insert(SpanStart(now_micros(inner.origin)));
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        let span = match ctx.span(&id) {
            Some(span) => span,
            None => return,
        };
        let start = span
            .extensions()
            .get::<SpanStart>()
            .map(|s| s.0)
            .unwrap_or(0.0);

        let mut inner = self.inner.lock().unwrap();
        let process_id = inner.process_id;
        let timestamp = now_micros(inner.origin);
        let tid = thread_id();
        inner.events.push(Event {
            name: span.name().to_owned(),
            category: span.metadata().target().to_owned(),
            phase: Phase::Complete,
            timestamp: start,
            process_id,
            thread_id: tid,
            args: Some(serde_json::json!({ "dur": timestamp - start })),
        });
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct MessageVisitor(Option<String>);
        impl tracing::field::Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = Some(format!("{value:?}"));
                }
            }
        }
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);

        let mut inner = self.inner.lock().unwrap();
        let process_id = inner.process_id;
        let timestamp = now_micros(inner.origin);
        let tid = thread_id();
        inner.events.push(Event {
            name: visitor.0.unwrap_or_else(|| event.metadata().name().to_owned()),
            category: event.metadata().target().to_owned(),
            phase: Phase::Instant,
            timestamp,
            process_id,
            thread_id: tid,
            args: None,
        });
    }
}

/// Flushes the accumulated trace to disk when dropped. Created by
/// [`ChromeTraceLayer::new`]; must be kept alive for the lifetime of the
/// program being traced.
pub struct FlushGuard {
    inner: Arc<Mutex<Inner>>,
    path: PathBuf,
    flushed: bool,
}

impl FlushGuard {
    /// Writes the trace collected so far to the configured path.
    pub fn flush(&mut self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let trace = Trace {
            events: inner.events.clone(),
        };
        let file = std::fs::File::create(&self.path)?;
        trace.save(file)?;
        self.flushed = true;
        Ok(())
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if !self.flushed {
            // Best effort: a tracing subscriber shouldn't panic on teardown.
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn records_spans_and_events_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("trace.json");

        {
            let (layer, _guard) = ChromeTraceLayer::new(&trace_path).unwrap();
            let subscriber = tracing_subscriber::registry().with(layer);
            let _default = tracing::subscriber::set_default(subscriber);

            let span = tracing::info_span!("do_work");
            let _entered = span.enter();
            tracing::info!("hello from inside the span");
        }

        let content = std::fs::read_to_string(&trace_path).unwrap();
        assert!(content.contains("do_work"));
        assert!(content.contains("hello from inside the span"));
    }
}
