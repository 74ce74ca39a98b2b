use anyhow::{Result, anyhow};
use serde_json::Value;

// ── Oracle decisions ──────────────────────────────────────────────────────────

/// One step's decision as returned by the oracle.
#[derive(Debug, Clone)]
pub struct Decision {
    pub reasoning: String,
    pub action: Action,
}

/// The closed action vocabulary the agent dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SearchAnchor {
        constraint_id: String,
    },
    Filter {
        parent_node_id: String,
        constraint_id: String,
    },
    Intersect {
        node_id_1: String,
        node_id_2: String,
    },
    RelaxConstraint {
        constraint_id: String,
    },
    /// `final_node_id` may be absent or wrong; the agent falls back to the
    /// last added node.
    Finish {
        final_node_id: Option<String>,
    },
}

/// Parse the oracle's raw text into a decision.
///
/// Oracles wrap JSON in prose and code fences no matter how firmly the prompt
/// forbids it, so the outermost JSON object is extracted first. Any failure
/// here means the step becomes a no-op.
pub fn parse_decision(raw: &str) -> Result<Decision> {
    let json_text = extract_json_object(raw)
        .ok_or_else(|| anyhow!("oracle response contains no JSON object"))?;
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| anyhow!("oracle response is not valid JSON: {e}"))?;

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let action_name = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("oracle decision has no 'action' field"))?;
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    let action = match action_name {
        "SEARCH_ANCHOR" => Action::SearchAnchor {
            constraint_id: required_str(&params, "constraint_id")?,
        },
        "FILTER" => Action::Filter {
            parent_node_id: required_str(&params, "parent_node_id")?,
            constraint_id: required_str(&params, "constraint_id")?,
        },
        "INTERSECT" => Action::Intersect {
            node_id_1: required_str(&params, "node_id_1")?,
            node_id_2: required_str(&params, "node_id_2")?,
        },
        "RELAX_CONSTRAINT" => Action::RelaxConstraint {
            constraint_id: required_str(&params, "constraint_id")?,
        },
        "FINISH" => Action::Finish {
            final_node_id: params
                .get("final_node_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        other => return Err(anyhow!("unknown action '{other}'")),
    };

    Ok(Decision { reasoning, action })
}

fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing or non-string param '{key}'"))
}

/// Slice out the outermost `{ ... }` of the response.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decision() {
        let raw = r#"{"reasoning": "director is selective", "action": "SEARCH_ANCHOR", "params": {"constraint_id": "c1"}}"#;
        let d = parse_decision(raw).expect("parse");
        assert_eq!(d.action, Action::SearchAnchor {
            constraint_id: "c1".into()
        });
        assert_eq!(d.reasoning, "director is selective");
    }

    #[test]
    fn tolerates_code_fences_and_prose() {
        let raw = "Here is my decision:\n```json\n{\"reasoning\": \"done\", \"action\": \"FINISH\", \"params\": {\"final_node_id\": \"node_c1_2\"}}\n```\nGood luck!";
        let d = parse_decision(raw).expect("parse");
        assert_eq!(d.action, Action::Finish {
            final_node_id: Some("node_c1_2".into())
        });
    }

    #[test]
    fn finish_without_node_id_still_parses() {
        let raw = r#"{"reasoning": "", "action": "FINISH", "params": {}}"#;
        let d = parse_decision(raw).expect("parse");
        assert_eq!(d.action, Action::Finish {
            final_node_id: None
        });
    }

    #[test]
    fn unknown_action_is_an_error() {
        let raw = r#"{"reasoning": "", "action": "TELEPORT", "params": {}}"#;
        assert!(parse_decision(raw).is_err());
    }

    #[test]
    fn missing_param_is_an_error() {
        let raw = r#"{"reasoning": "", "action": "FILTER", "params": {"constraint_id": "c2"}}"#;
        assert!(parse_decision(raw).is_err());
    }

    #[test]
    fn plain_prose_is_an_error() {
        assert!(parse_decision("I think we should filter by director").is_err());
    }
}
