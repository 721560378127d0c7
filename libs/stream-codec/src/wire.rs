//! Value envelopes as they appear on the wire.

use base64::Engine;
use serde::{Deserialize, Serialize};

use stream_api::{FormatId, StreamError, TimeSeries};

/// `tsamples`: series are positional, names come from the default feed.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TSamplesWire {
    pub data_format_id: FormatId,
    pub series: Vec<SeriesWire>,
}

/// One series: `values` is base64 of little-endian f64, one per timestamp.
/// Non-finite samples (NaN, ±inf) survive unchanged.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SeriesWire {
    pub time: Vec<i64>,
    pub values: String,
}

impl From<&TimeSeries> for SeriesWire {
    fn from(series: &TimeSeries) -> Self {
        Self {
            time: series.time.clone(),
            values: pack_matrix(std::slice::from_ref(&series.values)),
        }
    }
}

impl SeriesWire {
    pub fn into_series(self) -> Result<TimeSeries, StreamError> {
        let cols = self.time.len();
        let values = unpack_matrix(&self.values, 1, cols)?.pop().unwrap_or_default();
        Ok(TimeSeries::new(self.time, values))
    }
}

/// `tdata`: `data` is base64 of little-endian f64, parameter-major.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TDataWire {
    pub data_format_id: FormatId,
    #[serde(default)]
    pub feed: String,
    pub time: Vec<i64>,
    pub data: String,
}

const F64_SIZE: usize = std::mem::size_of::<f64>();

/// Pack `values[p][t]` row by row.
pub(crate) fn pack_matrix(values: &[Vec<f64>]) -> String {
    let total: usize = values.iter().map(Vec::len).sum();
    let mut buf = Vec::with_capacity(total * F64_SIZE);
    for row in values {
        for v in row {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
    base64::engine::general_purpose::STANDARD.encode(&buf)
}

/// Unpack into `rows × cols`. Byte length must match exactly.
pub(crate) fn unpack_matrix(data: &str, rows: usize, cols: usize) -> Result<Vec<Vec<f64>>, StreamError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| StreamError::decode(format!("payload base64: {e}")))?;

    let expected = rows * cols * F64_SIZE;
    if bytes.len() != expected {
        return Err(StreamError::decode(format!(
            "payload is {} bytes, expected {expected} ({rows} rows × {cols} samples)",
            bytes.len()
        )));
    }

    let mut chunks = bytes.chunks_exact(F64_SIZE);
    let mut values = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut row = Vec::with_capacity(cols);
        for chunk in chunks.by_ref().take(cols) {
            let mut raw = [0u8; F64_SIZE];
            raw.copy_from_slice(chunk);
            row.push(f64::from_le_bytes(raw));
        }
        values.push(row);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_layout_is_parameter_major() {
        let packed = pack_matrix(&[vec![1.0, 2.0], vec![3.5, -4.0]]);
        let raw = base64::engine::general_purpose::STANDARD.decode(&packed).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(&raw[8..16], &2.0f64.to_le_bytes());
        assert_eq!(&raw[16..24], &3.5f64.to_le_bytes());

        let values = unpack_matrix(&packed, 2, 2).unwrap();
        assert_eq!(values, vec![vec![1.0, 2.0], vec![3.5, -4.0]]);
    }

    #[test]
    fn wrong_length_rejected() {
        let packed = pack_matrix(&[vec![1.0, 2.0, 3.0]]);
        let err = unpack_matrix(&packed, 2, 2).unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
        assert!(unpack_matrix("not base64!", 1, 1).is_err());
    }

    #[test]
    fn series_keeps_non_finite_values() {
        let series = TimeSeries::new(vec![0, 1, 2, 3], vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0]);
        let wire: SeriesWire = serde_json::from_str(&serde_json::to_string(&SeriesWire::from(&series)).unwrap()).unwrap();
        let back = wire.into_series().unwrap();

        assert_eq!(back.time, series.time);
        let bits = |s: &TimeSeries| s.values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&back), bits(&series));
    }

    #[test]
    fn series_value_count_must_match_timestamps() {
        let wire = SeriesWire {
            time: vec![0, 1],
            values: pack_matrix(&[vec![1.0]]),
        };
        assert!(matches!(wire.into_series(), Err(StreamError::Decode(_))));
    }

    #[test]
    fn empty_matrix() {
        assert_eq!(unpack_matrix(&pack_matrix(&[]), 0, 5).unwrap(), Vec::<Vec<f64>>::new());
        assert_eq!(unpack_matrix(&pack_matrix(&[vec![], vec![]]), 2, 0).unwrap(), vec![Vec::<f64>::new(), Vec::<f64>::new()]);
    }
}
