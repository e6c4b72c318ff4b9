use telemetry_api::{Sample, SampleCodec, TelemetryError, WireRecord};

/// JSON codec: `{"x":..,"y":..,"z":..,"timestamp":..}`.
///
/// Порядок ключей фиксирован порядком полей `Sample`, поэтому
/// одинаковые показания всегда дают одинаковые байты.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl SampleCodec for JsonCodec {
    fn serialize(&self, sample: &Sample) -> Result<WireRecord, TelemetryError> {
        // serde_json пишет NaN/inf как null, такой payload не прочитать обратно
        if !sample.is_finite() {
            return Err(TelemetryError::Serialization(format!(
                "non-finite axis value in sample at {}",
                sample.timestamp()
            )));
        }
        Ok(WireRecord::new(serde_json::to_vec(sample)?))
    }

    fn deserialize(&self, record: &WireRecord) -> Result<Sample, TelemetryError> {
        Ok(serde_json::from_slice(record.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_order() {
        let record = JsonCodec
            .serialize(&Sample::new(0.5, -1.25, 9.81, 1_700_000_000_000))
            .unwrap();
        assert_eq!(
            record.to_string(),
            r#"{"x":0.5,"y":-1.25,"z":9.81,"timestamp":1700000000000}"#
        );
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let s = Sample::new(0.1, 0.2, 0.3, 42);
        assert_eq!(JsonCodec.serialize(&s).unwrap(), JsonCodec.serialize(&s).unwrap());
    }

    #[test]
    fn test_roundtrip_preserves_sample() {
        let samples = [
            Sample::new(0.0, 0.0, 0.0, 0),
            Sample::new(-0.0, 9.80665, -9.80665, 1),
            Sample::new(0.1 + 0.2, 1.0 / 3.0, -2.0 / 7.0, 1_700_000_000_123),
            Sample::new(f64::MAX, f64::MIN_POSITIVE, -1e-300, i64::MAX),
            Sample::new(123456.789, -0.000001, 42.0, -5),
        ];
        for s in samples {
            let record = JsonCodec.serialize(&s).unwrap();
            assert_eq!(JsonCodec.deserialize(&record).unwrap(), s, "payload {record}");
        }
    }

    #[test]
    fn test_non_finite_is_serialization_error() {
        for s in [
            Sample::new(f64::NAN, 0.0, 0.0, 0),
            Sample::new(0.0, f64::INFINITY, 0.0, 0),
            Sample::new(0.0, 0.0, f64::NEG_INFINITY, 0),
        ] {
            let err = JsonCodec.serialize(&s).unwrap_err();
            assert!(matches!(err, TelemetryError::Serialization(_)));
        }
    }

    #[test]
    fn test_deserialize_malformed() {
        for raw in [
            &b"not json"[..],
            br#"{"x":1.0,"y":2.0}"#,
            br#"{"x":1.0,"y":2.0,"z":3.0,"timestamp":1.5}"#,
            br#"{"x":"a","y":2.0,"z":3.0,"timestamp":1}"#,
        ] {
            let err = JsonCodec.deserialize(&WireRecord::new(raw.to_vec())).unwrap_err();
            assert!(matches!(err, TelemetryError::Serialization(_)), "input {raw:?}");
        }
    }

    #[test]
    fn test_deserialize_accepts_integer_axes() {
        let record = WireRecord::new(br#"{"x":1,"y":-2,"z":0,"timestamp":7}"#.to_vec());
        assert_eq!(JsonCodec.deserialize(&record).unwrap(), Sample::new(1.0, -2.0, 0.0, 7));
    }
}
