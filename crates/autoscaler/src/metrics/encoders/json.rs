use serde_json::json;

use super::Fields;
use super::MetricsEncoder;
use super::Tags;

/// JSON encoder for metrics, one object per line
pub struct JsonEncoder;

impl MetricsEncoder for JsonEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags,
        fields: &Fields,
        timestamp: i64,
    ) -> String {
        let metrics = json!({
            "measure": measurement,
            "ts": timestamp,
            "tag": tags,
            "field": fields,
        });
        metrics.to_string() + "\n"
    }
}
