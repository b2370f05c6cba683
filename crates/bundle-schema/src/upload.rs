//! Sink payload.

use crate::bundle::{DATE_KEY, IDENTIFIER_KEY, SHORT_IDENTIFIER_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of an upload: the stamped result document plus the base64 encoded
/// capture and key log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub test_report: Value,
    pub pcap_dump: String,
    pub keylog: String,
}

impl UploadReport {
    pub fn identifier(&self) -> Option<&str> {
        self.test_report.get(IDENTIFIER_KEY).and_then(Value::as_str)
    }

    pub fn short_identifier(&self) -> Option<&str> {
        self.test_report
            .get(SHORT_IDENTIFIER_KEY)
            .and_then(Value::as_str)
    }

    /// ISO 8601 run date, `None` when the bundle carries the invalid marker.
    pub fn date(&self) -> Option<&str> {
        self.test_report.get(DATE_KEY).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let upload = UploadReport {
            test_report: json!({"Identifier": "x_client000000", "Date": null}),
            pcap_dump: "AAEC".into(),
            keylog: "S0VZ".into(),
        };

        let value = serde_json::to_value(&upload).unwrap();
        assert_eq!(value["pcapDump"], "AAEC");
        assert_eq!(value["keylog"], "S0VZ");
        assert_eq!(value["testReport"]["Identifier"], "x_client000000");
        assert_eq!(upload.identifier(), Some("x_client000000"));
        assert_eq!(upload.date(), None);
        assert_eq!(upload.short_identifier(), None);
    }
}
