use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Kaa 1 protocol topics for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Telemetry samples: `kp1/<version>/dcx/<token>/json`.
    pub data: String,
    /// Inbound on/off commands: `kp1/<version>/cex/<token>/command/onoff/status`.
    pub command_onoff: String,
    /// On/off command results: `kp1/<version>/cex/<token>/result/onoff`.
    pub result_onoff: String,
}

impl Topics {
    pub fn new(application_version: &str, endpoint_token: &str) -> Self {
        let base = format!("kp1/{application_version}");
        Self {
            data: format!("{base}/dcx/{endpoint_token}/json"),
            command_onoff: format!("{base}/cex/{endpoint_token}/command/onoff/status"),
            result_onoff: format!("{base}/cex/{endpoint_token}/result/onoff"),
        }
    }
}

// ---------------------------------------------------------------------------
// Command message types
// ---------------------------------------------------------------------------

/// One entry of an inbound command batch.  Only `id` is interpreted; it is
/// echoed back verbatim, whatever its JSON type.
#[derive(Debug, Deserialize)]
pub(crate) struct Command {
    pub(crate) id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandResult {
    pub(crate) id: Value,
    pub(crate) status_code: u16,
    pub(crate) reason_phrase: &'static str,
    pub(crate) payload: &'static str,
}

impl CommandResult {
    pub(crate) fn success(id: Value) -> Self {
        Self {
            id,
            status_code: 200,
            reason_phrase: "OK",
            payload: "Success",
        }
    }
}

/// Decode an on/off command batch and build one success result per command,
/// in order.
pub(crate) fn compose_results(payload: &[u8]) -> serde_json::Result<Vec<CommandResult>> {
    let commands: Vec<Command> = serde_json::from_slice(payload)?;
    Ok(commands
        .into_iter()
        .map(|c| CommandResult::success(c.id))
        .collect())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- Topics -------------------------------------------------------------

    #[test]
    fn topics_follow_kaa_layout() {
        let t = Topics::new("bvmq1ltbhnjc0btlkm7g-v1", "ilA2dAaXTD");
        assert_eq!(t.data, "kp1/bvmq1ltbhnjc0btlkm7g-v1/dcx/ilA2dAaXTD/json");
        assert_eq!(
            t.command_onoff,
            "kp1/bvmq1ltbhnjc0btlkm7g-v1/cex/ilA2dAaXTD/command/onoff/status"
        );
        assert_eq!(
            t.result_onoff,
            "kp1/bvmq1ltbhnjc0btlkm7g-v1/cex/ilA2dAaXTD/result/onoff"
        );
    }

    // -- compose_results ----------------------------------------------------

    #[test]
    fn two_commands_two_results() {
        let results = compose_results(br#"[{"id": "1"}, {"id": "2"}]"#).unwrap();
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(
            json,
            json!([
                {"id": "1", "statusCode": 200, "reasonPhrase": "OK", "payload": "Success"},
                {"id": "2", "statusCode": 200, "reasonPhrase": "OK", "payload": "Success"}
            ])
        );
    }

    #[test]
    fn serialized_field_order_matches_platform_examples() {
        let results = compose_results(br#"[{"id":"7"}]"#).unwrap();
        let text = serde_json::to_string(&results).unwrap();
        assert_eq!(
            text,
            r#"[{"id":"7","statusCode":200,"reasonPhrase":"OK","payload":"Success"}]"#
        );
    }

    #[test]
    fn numeric_id_echoed_verbatim() {
        let results = compose_results(br#"[{"id": 42}]"#).unwrap();
        assert_eq!(results[0].id, json!(42));
    }

    #[test]
    fn extra_fields_ignored() {
        let results =
            compose_results(br#"[{"id":"a","payload":{"on":true},"extra":1}]"#).unwrap();
        assert_eq!(results, vec![CommandResult::success(json!("a"))]);
    }

    #[test]
    fn empty_batch_yields_no_results() {
        assert!(compose_results(b"[]").unwrap().is_empty());
    }

    #[test]
    fn missing_id_is_malformed() {
        assert!(compose_results(br#"[{"payload":"x"}]"#).is_err());
    }

    #[test]
    fn not_an_array_is_malformed() {
        assert!(compose_results(br#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(compose_results(b"[{\"id\":").is_err());
        assert!(compose_results(b"").is_err());
    }
}
