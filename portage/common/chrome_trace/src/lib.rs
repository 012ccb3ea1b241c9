// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Data model for Chrome's [trace event format][format], the JSON schema
//! `chrome://tracing` (and Perfetto) understand. Used to merge per-process
//! profiles collected by `action_wrapper` into a single timeline, and as the
//! event sink for [`tracing_chrome_trace`]'s subscriber layer.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// The subset of trace event phases this crate round-trips.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Slice begin ("B").
    Begin,
    /// Slice end ("E").
    End,
    /// Complete event with an inline duration ("X").
    Complete,
    /// Instant event ("i").
    Instant,
    /// Metadata, e.g. `process_name`/`thread_name`/`process_sort_index` ("M").
    Metadata,
}

impl Phase {
    fn as_char(&self) -> char {
        match self {
            Phase::Begin => 'B',
            Phase::End => 'E',
            Phase::Complete => 'X',
            Phase::Instant => 'i',
            Phase::Metadata => 'M',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(Phase::Begin),
            'E' => Some(Phase::End),
            'X' => Some(Phase::Complete),
            'i' => Some(Phase::Instant),
            'M' => Some(Phase::Metadata),
            _ => None,
        }
    }
}

impl Serialize for Phase {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_char(self.as_char())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let c = s.chars().next().ok_or_else(|| {
            serde::de::Error::custom("empty string is not a valid trace event phase")
        })?;
        Phase::from_char(c)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown trace event phase {c:?}")))
    }
}

/// A single trace event, matching the Chrome trace event JSON object shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(rename = "cat")]
    pub category: String,
    #[serde(rename = "ph")]
    pub phase: Phase,
    /// Microseconds since the trace's time origin.
    #[serde(rename = "ts")]
    pub timestamp: f64,
    #[serde(rename = "pid")]
    pub process_id: i64,
    #[serde(rename = "tid")]
    pub thread_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

/// A full trace, serialized as the JSON object form (`{"traceEvents": [...]}`)
/// rather than the bare-array form, so it round-trips through tools that
/// expect top-level trace metadata fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(rename = "traceEvents")]
    pub events: Vec<Event>,
}

impl Trace {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn load<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }
}
