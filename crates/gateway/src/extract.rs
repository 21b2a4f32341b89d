// Metric extraction
//
// Turns a switch status object (the `result` of `Switch.GetStatus`, or the
// `switch:<id>` component of a `Notify*` frame) into normalized metric names.
// Total over its input: fields with an unexpected shape are skipped.

use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Metric name to value
pub type MetricMap = BTreeMap<String, f64>;

/// Error flags reported individually as `error_<name>`
pub const KNOWN_ERRORS: [&str; 4] = ["overtemp", "overpower", "overvoltage", "undervoltage"];

/// Number of `by_minute` buckets exported
const MINUTE_BUCKETS: usize = 3;

/// Top-level fields that mark an object as carrying switch telemetry
pub const TELEMETRY_FIELDS: [&str; 10] = [
    "output",
    "apower",
    "voltage",
    "current",
    "pf",
    "freq",
    "aenergy",
    "ret_aenergy",
    "temperature",
    "errors",
];

const PASS_THROUGH: [(&str, &str); 5] = [
    ("apower", "power_total_watts"),
    ("voltage", "power_voltage_volts"),
    ("current", "power_current_amps"),
    ("pf", "power_factor"),
    ("freq", "power_frequency_hz"),
];

/// Whether `value` is an object with at least one telemetry field
pub fn has_telemetry(value: &JsonValue) -> bool {
    value
        .as_object()
        .map(|obj| TELEMETRY_FIELDS.iter().any(|field| obj.contains_key(*field)))
        .unwrap_or(false)
}

/// Extract normalized metrics from a switch status object.
///
/// Missing fields are absent from the output and `null` values are skipped,
/// never coerced to zero. Anything other than an object yields an empty map.
pub fn extract_metrics(status: &JsonValue) -> MetricMap {
    let mut metrics = MetricMap::new();

    let Some(obj) = status.as_object() else {
        tracing::debug!("Status payload is not an object, nothing to extract");
        return metrics;
    };

    match obj.get("output") {
        Some(JsonValue::Bool(on)) => {
            metrics.insert("power_switch_output".to_string(), if *on { 1.0 } else { 0.0 });
        }
        Some(JsonValue::Null) | None => {}
        Some(other) => skip("output", other),
    }

    for (field, name) in PASS_THROUGH {
        insert_number(&mut metrics, obj, field, name);
    }

    if let Some(aenergy) = object_field(obj, "aenergy") {
        extract_energy(&mut metrics, aenergy, "energy");
    }
    if let Some(ret_aenergy) = object_field(obj, "ret_aenergy") {
        extract_energy(&mut metrics, ret_aenergy, "energy_returned");
    }

    if let Some(temperature) = object_field(obj, "temperature") {
        insert_number(&mut metrics, temperature, "tC", "temperature_celsius");
        insert_number(&mut metrics, temperature, "tF", "temperature_fahrenheit");
    }

    match obj.get("errors") {
        Some(JsonValue::Array(errors)) => {
            metrics.insert("errors_count".to_string(), errors.len() as f64);
            for name in KNOWN_ERRORS {
                let active = errors.iter().any(|e| e.as_str() == Some(name));
                metrics.insert(format!("error_{}", name), if active { 1.0 } else { 0.0 });
            }
        }
        Some(JsonValue::Null) | None => {}
        Some(other) => skip("errors", other),
    }

    metrics
}

/// `total`, `by_minute[..3]` and `minute_ts` of an energy counter
fn extract_energy(metrics: &mut MetricMap, counter: &Map<String, JsonValue>, prefix: &str) {
    insert_number(metrics, counter, "total", &format!("{}_total_wh", prefix));

    match counter.get("by_minute") {
        Some(JsonValue::Array(buckets)) => {
            for (i, bucket) in buckets.iter().take(MINUTE_BUCKETS).enumerate() {
                match bucket.as_f64() {
                    Some(v) => {
                        metrics.insert(format!("{}_minute_{}_mwh", prefix, i), v);
                    }
                    None if bucket.is_null() => {}
                    None => skip("by_minute", bucket),
                }
            }
        }
        Some(JsonValue::Null) | None => {}
        Some(other) => skip("by_minute", other),
    }

    insert_number(metrics, counter, "minute_ts", &format!("{}_minute_timestamp", prefix));
}

fn object_field<'a>(
    obj: &'a Map<String, JsonValue>,
    field: &str,
) -> Option<&'a Map<String, JsonValue>> {
    match obj.get(field) {
        Some(JsonValue::Object(inner)) => Some(inner),
        Some(JsonValue::Null) | None => None,
        Some(other) => {
            skip(field, other);
            None
        }
    }
}

fn insert_number(metrics: &mut MetricMap, obj: &Map<String, JsonValue>, field: &str, name: &str) {
    match obj.get(field) {
        Some(JsonValue::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => {
                metrics.insert(name.to_string(), v);
            }
            _ => skip(field, &JsonValue::Number(n.clone())),
        },
        Some(JsonValue::Null) | None => {}
        Some(other) => skip(field, other),
    }
}

fn skip(field: &str, value: &JsonValue) {
    tracing::debug!("Skipping field '{}' with unexpected value: {}", field, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metric_map(pairs: &[(&str, f64)]) -> MetricMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_extracts_exactly_the_present_fields() {
        let input = json!({
            "apower": 12.3,
            "voltage": 230.1,
            "current": 0.0535,
            "aenergy": {"total": 100.5}
        });

        assert_eq!(
            extract_metrics(&input),
            metric_map(&[
                ("power_total_watts", 12.3),
                ("power_voltage_volts", 230.1),
                ("power_current_amps", 0.0535),
                ("energy_total_wh", 100.5),
            ])
        );
    }

    #[test]
    fn test_full_switch_status() {
        let input = json!({
            "id": 0,
            "source": "init",
            "output": true,
            "apower": 8.9,
            "voltage": 237.5,
            "freq": 50.0,
            "current": 0.068,
            "pf": 0.56,
            "aenergy": {
                "total": 6.532,
                "by_minute": [45.199, 47.141, 88.397, 12.0],
                "minute_ts": 1654511972
            },
            "ret_aenergy": {"total": 0.5, "by_minute": [0.0, 1.5], "minute_ts": 1654511972},
            "temperature": {"tC": 23.5, "tF": 74.4},
            "errors": ["overtemp"]
        });

        let metrics = extract_metrics(&input);
        assert_eq!(metrics["power_switch_output"], 1.0);
        assert_eq!(metrics["power_frequency_hz"], 50.0);
        assert_eq!(metrics["power_factor"], 0.56);
        assert_eq!(metrics["energy_minute_0_mwh"], 45.199);
        assert_eq!(metrics["energy_minute_2_mwh"], 88.397);
        assert!(!metrics.contains_key("energy_minute_3_mwh"));
        assert_eq!(metrics["energy_minute_timestamp"], 1654511972.0);
        assert_eq!(metrics["energy_returned_total_wh"], 0.5);
        assert_eq!(metrics["energy_returned_minute_1_mwh"], 1.5);
        assert_eq!(metrics["temperature_celsius"], 23.5);
        assert_eq!(metrics["temperature_fahrenheit"], 74.4);
        assert_eq!(metrics["errors_count"], 1.0);
        assert_eq!(metrics["error_overtemp"], 1.0);
        assert_eq!(metrics["error_overpower"], 0.0);
        assert_eq!(metrics["error_undervoltage"], 0.0);
    }

    #[test]
    fn test_nulls_are_skipped_not_zeroed() {
        let input = json!({
            "apower": null,
            "output": false,
            "temperature": {"tC": null, "tF": null}
        });

        assert_eq!(
            extract_metrics(&input),
            metric_map(&[("power_switch_output", 0.0)])
        );
    }

    #[test]
    fn test_malformed_fields_yield_partial_map() {
        let input = json!({
            "apower": "twelve",
            "voltage": 229.0,
            "aenergy": [1, 2, 3],
            "temperature": 40,
            "errors": "overtemp",
            "output": "on"
        });

        assert_eq!(
            extract_metrics(&input),
            metric_map(&[("power_voltage_volts", 229.0)])
        );
    }

    #[test]
    fn test_non_object_input() {
        assert!(extract_metrics(&json!(null)).is_empty());
        assert!(extract_metrics(&json!([1, 2])).is_empty());
        assert!(extract_metrics(&json!("status")).is_empty());
    }

    #[test]
    fn test_empty_errors_list() {
        let metrics = extract_metrics(&json!({"errors": []}));
        assert_eq!(metrics["errors_count"], 0.0);
        assert_eq!(metrics.len(), 1 + KNOWN_ERRORS.len());
    }

    #[test]
    fn test_has_telemetry() {
        assert!(has_telemetry(&json!({"apower": 1.0})));
        assert!(has_telemetry(&json!({"errors": []})));
        assert!(!has_telemetry(&json!({"ts": 1700000000.0})));
        assert!(!has_telemetry(&json!(7)));
    }
}
