use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dependency_client::DataFormatClient;
use stream_api::{
    FormatDefinition, FormatId, Key, Message, MessageKind, RawRecord, SessionInfo, StreamError, TSamples,
    TelemetryData,
};

use crate::wire::{SeriesWire, TDataWire, TSamplesWire, pack_matrix, unpack_matrix};

/// Message codec: broker bytes ↔ `(Key, Message)`.
///
/// Keys are self-describing JSON. Telemetry values reference a data format
/// by hash, resolved through the [`DataFormatClient`] cache; decoding and
/// encoding may therefore await the dependency server on a cache miss.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    formats: Arc<DataFormatClient>,
}

impl MessageCodec {
    pub fn new(formats: Arc<DataFormatClient>) -> Self {
        Self { formats }
    }

    pub fn formats(&self) -> &Arc<DataFormatClient> {
        &self.formats
    }

    // ═══════════════════════════════════════════════════════════════
    //  Keys
    // ═══════════════════════════════════════════════════════════════

    pub fn decode_key(bytes: &[u8]) -> Result<Key, StreamError> {
        serde_json::from_slice(bytes).map_err(|e| StreamError::decode(format!("key: {e}")))
    }

    pub fn encode_key(key: &Key) -> Result<Vec<u8>, StreamError> {
        serde_json::to_vec(key).map_err(|e| StreamError::encode(format!("key: {e}")))
    }

    /// Decode only the key of a record (cheap, no format resolution).
    pub fn record_key(record: &RawRecord) -> Result<Key, StreamError> {
        let bytes = record
            .key
            .as_deref()
            .ok_or_else(|| StreamError::decode("record has no key"))?;
        Self::decode_key(bytes)
    }

    // ═══════════════════════════════════════════════════════════════
    //  Decode
    // ═══════════════════════════════════════════════════════════════

    pub async fn decode(&self, record: &RawRecord) -> Result<(Key, Message), StreamError> {
        let key = Self::record_key(record)?;
        let value = record
            .value
            .as_deref()
            .ok_or_else(|| StreamError::decode(format!("record {key} has no value")))?;
        let message = self.decode_value(key.kind, value).await?;
        Ok((key, message))
    }

    pub async fn decode_value(&self, kind: MessageKind, bytes: &[u8]) -> Result<Message, StreamError> {
        match kind {
            MessageKind::TSamples => {
                let wire: TSamplesWire = parse(kind, bytes)?;
                self.decode_tsamples(wire).await.map(Message::TSamples)
            }
            MessageKind::TData => {
                let wire: TDataWire = parse(kind, bytes)?;
                self.decode_tdata(wire).await.map(Message::TData)
            }
            MessageKind::Session => parse::<SessionInfo>(kind, bytes).map(Message::Session),
        }
    }

    async fn decode_tsamples(&self, wire: TSamplesWire) -> Result<TSamples, StreamError> {
        let def = self.formats.resolve(&wire.data_format_id).await?;
        let feed = def
            .default_feed()
            .ok_or_else(|| StreamError::decode(format!("format {} has no default feed", wire.data_format_id)))?;

        if feed.parameters.len() != wire.series.len() {
            return Err(StreamError::decode(format!(
                "tsamples carries {} series, format {} declares {} parameters",
                wire.series.len(),
                wire.data_format_id,
                feed.parameters.len()
            )));
        }

        let mut samples = BTreeMap::new();
        for (name, series) in feed.parameters.iter().zip(wire.series) {
            let series = series.into_series().map_err(|e| e.with_context(format!("parameter '{name}'")))?;
            if samples.insert(name.clone(), series).is_some() {
                return Err(StreamError::decode(format!("parameter '{name}' repeated in format")));
            }
        }

        Ok(TSamples {
            data_format_id: Some(wire.data_format_id),
            samples,
        })
    }

    async fn decode_tdata(&self, wire: TDataWire) -> Result<TelemetryData, StreamError> {
        let def = self.formats.resolve(&wire.data_format_id).await?;
        let feed = def.feed(&wire.feed).ok_or_else(|| {
            StreamError::decode(format!("format {} has no feed '{}'", wire.data_format_id, wire.feed))
        })?;

        let values = unpack_matrix(&wire.data, feed.parameters.len(), wire.time.len())?;
        Ok(TelemetryData {
            data_format_id: Some(wire.data_format_id),
            feed: wire.feed,
            parameters: feed.parameters.clone(),
            time: wire.time,
            values,
        })
    }

    // ═══════════════════════════════════════════════════════════════
    //  Encode
    // ═══════════════════════════════════════════════════════════════

    /// Encode a record. Returns `(key bytes, value bytes)`.
    pub async fn encode(&self, key: &Key, message: &Message) -> Result<(Vec<u8>, Vec<u8>), StreamError> {
        if key.kind != message.kind() {
            return Err(StreamError::encode(format!(
                "key kind '{}' does not match message kind '{}'",
                key.kind,
                message.kind()
            )));
        }

        let value = match message {
            Message::TSamples(tsamples) => self.encode_tsamples(tsamples).await?,
            Message::TData(data) => self.encode_tdata(data).await?,
            Message::Session(info) => to_vec(MessageKind::Session, info)?,
        };
        Ok((Self::encode_key(key)?, value))
    }

    async fn encode_tsamples(&self, tsamples: &TSamples) -> Result<Vec<u8>, StreamError> {
        check_series(tsamples)?;
        let (id, parameters) = self.tsamples_format(tsamples).await?;

        let series = parameters
            .iter()
            .filter_map(|p| tsamples.samples.get(p).map(SeriesWire::from))
            .collect();
        to_vec(
            MessageKind::TSamples,
            &TSamplesWire {
                data_format_id: id,
                series,
            },
        )
    }

    async fn encode_tdata(&self, data: &TelemetryData) -> Result<Vec<u8>, StreamError> {
        check_matrix(data)?;
        let id = self.tdata_format(data).await?;
        to_vec(
            MessageKind::TData,
            &TDataWire {
                data_format_id: id,
                feed: data.feed.clone(),
                time: data.time.clone(),
                data: pack_matrix(&data.values),
            },
        )
    }

    // ═══════════════════════════════════════════════════════════════
    //  Data formats
    // ═══════════════════════════════════════════════════════════════

    /// Fill in `data_format_id` (registering the derived format if absent).
    pub async fn populate_data_format(&self, tsamples: &mut TSamples) -> Result<FormatId, StreamError> {
        check_series(tsamples)?;
        let (id, _) = self.tsamples_format(tsamples).await?;
        tsamples.data_format_id = Some(id.clone());
        Ok(id)
    }

    /// TelemetryData counterpart of [`populate_data_format`](Self::populate_data_format).
    pub async fn populate_telemetry_data_format(&self, data: &mut TelemetryData) -> Result<FormatId, StreamError> {
        check_matrix(data)?;
        let id = self.tdata_format(data).await?;
        data.data_format_id = Some(id.clone());
        Ok(id)
    }

    /// Format id + parameter order for a TSamples value.
    async fn tsamples_format(&self, tsamples: &TSamples) -> Result<(FormatId, Vec<String>), StreamError> {
        let names = tsamples.parameter_names();
        match &tsamples.data_format_id {
            Some(id) => {
                let def = self.formats.resolve(id).await?;
                let feed = def
                    .default_feed()
                    .ok_or_else(|| StreamError::encode(format!("format {id} has no default feed")))?;
                // Same names, each declared once.
                let declared: BTreeSet<&String> = feed.parameters.iter().collect();
                let matches = declared.len() == feed.parameters.len()
                    && declared.len() == tsamples.samples.len()
                    && declared.iter().all(|p| tsamples.samples.contains_key(*p));
                if !matches {
                    return Err(StreamError::encode(format!(
                        "samples {:?} do not match format {id} parameters {:?}",
                        names, feed.parameters
                    )));
                }
                Ok((id.clone(), feed.parameters.clone()))
            }
            None => {
                let def = FormatDefinition::single_feed("", names.clone());
                let id = self.formats.register(&def).await?;
                tracing::trace!(format = %id, parameters = names.len(), "derived tsamples format");
                Ok((id, names))
            }
        }
    }

    async fn tdata_format(&self, data: &TelemetryData) -> Result<FormatId, StreamError> {
        match &data.data_format_id {
            Some(id) => {
                let def = self.formats.resolve(id).await?;
                let feed = def
                    .feed(&data.feed)
                    .ok_or_else(|| StreamError::encode(format!("format {id} has no feed '{}'", data.feed)))?;
                if feed.parameters != data.parameters {
                    return Err(StreamError::encode(format!(
                        "parameters {:?} do not match format {id} feed '{}' {:?}",
                        data.parameters, data.feed, feed.parameters
                    )));
                }
                Ok(id.clone())
            }
            None => {
                let def = FormatDefinition::single_feed(data.feed.clone(), data.parameters.clone());
                let id = self.formats.register(&def).await?;
                tracing::trace!(format = %id, feed = %data.feed, "derived tdata format");
                Ok(id)
            }
        }
    }
}

fn check_series(tsamples: &TSamples) -> Result<(), StreamError> {
    for (name, series) in &tsamples.samples {
        if !series.is_aligned() {
            return Err(StreamError::encode(format!(
                "parameter '{name}': {} timestamps, {} values",
                series.time.len(),
                series.values.len()
            )));
        }
    }
    Ok(())
}

fn check_matrix(data: &TelemetryData) -> Result<(), StreamError> {
    if data.values.len() != data.parameters.len() {
        return Err(StreamError::encode(format!(
            "{} value rows for {} parameters",
            data.values.len(),
            data.parameters.len()
        )));
    }
    for (name, row) in data.parameters.iter().zip(&data.values) {
        if row.len() != data.time.len() {
            return Err(StreamError::encode(format!(
                "parameter '{name}': {} values for {} timestamps",
                row.len(),
                data.time.len()
            )));
        }
    }
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(kind: MessageKind, bytes: &[u8]) -> Result<T, StreamError> {
    serde_json::from_slice(bytes).map_err(|e| StreamError::decode(format!("{kind} value: {e}")))
}

fn to_vec<T: serde::Serialize>(kind: MessageKind, value: &T) -> Result<Vec<u8>, StreamError> {
    serde_json::to_vec(value).map_err(|e| StreamError::encode(format!("{kind} value: {e}")))
}
