use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::format::FormatId;
use crate::key::MessageKind;

/// Timestamped values of one parameter. `time` is in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub time: Vec<i64>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(time: Vec<i64>, values: Vec<f64>) -> Self {
        Self { time, values }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Both vectors have the same length.
    pub fn is_aligned(&self) -> bool {
        self.time.len() == self.values.len()
    }
}

/// Parameter name → series. Ordered, so the derived format is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TSamples {
    pub data_format_id: Option<FormatId>,
    pub samples: BTreeMap<String, TimeSeries>,
}

impl TSamples {
    pub fn new(samples: BTreeMap<String, TimeSeries>) -> Self {
        Self {
            data_format_id: None,
            samples,
        }
    }

    pub fn insert(&mut self, parameter: impl Into<String>, series: TimeSeries) {
        self.samples.insert(parameter.into(), series);
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.samples.keys().cloned().collect()
    }
}

/// Feed-scoped telemetry bundle: `values[p][t]` is `parameters[p]` at `time[t]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryData {
    pub data_format_id: Option<FormatId>,
    pub feed: String,
    pub parameters: Vec<String>,
    pub time: Vec<i64>,
    pub values: Vec<Vec<f64>>,
}

impl TelemetryData {
    pub fn sample_count(&self) -> usize {
        self.time.len()
    }

    pub fn parameter(&self, name: &str) -> Option<&[f64]> {
        let idx = self.parameters.iter().position(|p| p == name)?;
        self.values.get(idx).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}

/// Session lifecycle message. Advertises the formats its data uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub identifier: String,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format_id: Option<FormatId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atlas_configuration_id: Option<FormatId>,
}

/// Decoded record value.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    TSamples(TSamples),
    TData(TelemetryData),
    Session(SessionInfo),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::TSamples(_) => MessageKind::TSamples,
            Message::TData(_) => MessageKind::TData,
            Message::Session(_) => MessageKind::Session,
        }
    }
}

impl From<TSamples> for Message {
    fn from(v: TSamples) -> Self {
        Message::TSamples(v)
    }
}

impl From<TelemetryData> for Message {
    fn from(v: TelemetryData) -> Self {
        Message::TData(v)
    }
}

impl From<SessionInfo> for Message {
    fn from(v: SessionInfo) -> Self {
        Message::Session(v)
    }
}
