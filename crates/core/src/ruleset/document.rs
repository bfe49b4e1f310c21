//! Entry-by-entry decoding of a ruleset document.
//!
//! Only a document that is not a JSON object is rejected as a whole. Any other
//! entry that does not decode is dropped on its own, logged, and recorded as a
//! [`RulesetIssue::RejectedEntry`]; the built-in default applies in its place.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use super::{
    defaults, FlowStepDefinition, Messages, RecommendationPolicy, Ruleset, RulesetError,
    RulesetIssue, SupervisorRules,
};

type Object = Map<String, Value>;

pub(super) fn decode(raw: &str) -> Result<Ruleset, RulesetError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| RulesetError::Parse(error.to_string()))?;
    let mut document = match value {
        Value::Object(document) => document,
        other => {
            let found = value_kind(&other);
            return Err(RulesetError::Parse(format!("expected a JSON object, found {found}")));
        }
    };

    let mut decoder = Decoder::default();
    let flow_name =
        decoder.take(&mut document, "", "flow_name").unwrap_or_else(defaults::flow_name);
    let initial_step_existing = decoder
        .take(&mut document, "", "initial_step_existing")
        .unwrap_or_else(defaults::initial_step_existing);
    let initial_step_new = decoder
        .take(&mut document, "", "initial_step_new")
        .unwrap_or_else(defaults::initial_step_new);
    let supervisor = decoder.supervisor(&mut document);
    let flow = decoder.flow(&mut document);
    let messages = decoder.messages(&mut document);
    let recommendations = decoder.recommendations(&mut document);

    Ok(Ruleset {
        flow_name,
        initial_step_existing,
        initial_step_new,
        supervisor,
        flow,
        messages,
        recommendations,
        rejected: decoder.rejected,
    })
}

#[derive(Default)]
struct Decoder {
    rejected: Vec<RulesetIssue>,
}

impl Decoder {
    fn take<T>(&mut self, object: &mut Object, path: &str, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let value = object.remove(key)?;
        self.decode(entry_path(path, key), value)
    }

    fn decode<T: DeserializeOwned>(&mut self, entry: String, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                self.reject(entry, error.to_string());
                None
            }
        }
    }

    fn reject(&mut self, entry: String, reason: String) {
        warn!(
            event_name = "ruleset.entry_rejected",
            entry = %entry,
            reason = %reason,
            "ruleset entry dropped; built-in default applies"
        );
        self.rejected.push(RulesetIssue::RejectedEntry { entry, reason });
    }

    fn section(&mut self, object: &mut Object, key: &str) -> Option<Object> {
        match object.remove(key)? {
            Value::Object(section) => Some(section),
            other => {
                let reason = format!("expected an object, found {}", value_kind(&other));
                self.reject(key.to_string(), reason);
                None
            }
        }
    }

    fn supervisor(&mut self, document: &mut Object) -> SupervisorRules {
        let Some(mut section) = self.section(document, "supervisor") else {
            return SupervisorRules::default();
        };
        SupervisorRules {
            trigger_code: self
                .take(&mut section, "supervisor", "trigger_code")
                .unwrap_or_else(defaults::trigger_code),
            greeting: self
                .take(&mut section, "supervisor", "greeting")
                .unwrap_or_else(defaults::greeting),
            menu_lines: self
                .take(&mut section, "supervisor", "menu_lines")
                .unwrap_or_else(defaults::menu_lines),
        }
    }

    fn flow(&mut self, document: &mut Object) -> Vec<FlowStepDefinition> {
        match document.remove("flow") {
            None => Vec::new(),
            Some(Value::Array(steps)) => steps
                .into_iter()
                .enumerate()
                .filter_map(|(index, step)| {
                    let entry = match step.get("id").and_then(Value::as_str) {
                        Some(id) => format!("flow[{index}] `{id}`"),
                        None => format!("flow[{index}]"),
                    };
                    self.decode(entry, step)
                })
                .collect(),
            Some(other) => {
                let reason = format!("expected an array, found {}", value_kind(&other));
                self.reject("flow".to_string(), reason);
                Vec::new()
            }
        }
    }

    fn messages(&mut self, document: &mut Object) -> Messages {
        let Some(mut section) = self.section(document, "messages") else {
            return Messages::default();
        };
        Messages {
            summary: self.templates(&mut section, "summary"),
            prompts: self.templates(&mut section, "prompts"),
            errors: self.templates(&mut section, "errors"),
            fallback: self.take::<Option<String>>(&mut section, "messages", "fallback").flatten(),
        }
    }

    fn templates(&mut self, messages: &mut Object, key: &str) -> BTreeMap<String, String> {
        let path = entry_path("messages", key);
        match messages.remove(key) {
            None => BTreeMap::new(),
            Some(Value::Object(templates)) => templates
                .into_iter()
                .filter_map(|(name, value)| {
                    let template = self.decode(entry_path(&path, &name), value)?;
                    Some((name, template))
                })
                .collect(),
            Some(other) => {
                self.reject(path, format!("expected an object, found {}", value_kind(&other)));
                BTreeMap::new()
            }
        }
    }

    fn recommendations(&mut self, document: &mut Object) -> RecommendationPolicy {
        let Some(mut section) = self.section(document, "recommendations") else {
            return RecommendationPolicy::default();
        };
        let path = "recommendations";
        RecommendationPolicy {
            small_below: self
                .take(&mut section, path, "small_below")
                .unwrap_or_else(defaults::small_event_below),
            medium_max: self
                .take(&mut section, path, "medium_max")
                .unwrap_or_else(defaults::medium_event_max),
            self_service_price_per_guest: self
                .take(&mut section, path, "self_service_price_per_guest")
                .unwrap_or_else(defaults::self_service_price_per_guest),
            staffed_price_per_guest: self
                .take(&mut section, path, "staffed_price_per_guest")
                .unwrap_or_else(defaults::staffed_price_per_guest),
        }
    }
}

fn entry_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::decode;
    use crate::ruleset::{RulesetError, RulesetIssue, StepKind};

    #[test]
    fn non_object_documents_are_rejected_whole() {
        assert!(matches!(decode("{ not json"), Err(RulesetError::Parse(_))));
        assert_eq!(
            decode("[1, 2]"),
            Err(RulesetError::Parse("expected a JSON object, found an array".to_string()))
        );
    }

    #[test]
    fn step_without_type_is_kept_with_unknown_kind() {
        let ruleset = decode(
            r#"{"flow": [
                {"id": "collect_name", "prompt": "collect_name", "next": "ask_new_order"}
            ]}"#,
        )
        .expect("decode");

        assert!(ruleset.rejected.is_empty());
        assert_eq!(ruleset.flow.len(), 1);
        assert_eq!(ruleset.flow[0].kind, StepKind::Unknown(String::new()));
    }

    #[test]
    fn bad_entries_are_dropped_one_at_a_time() {
        let ruleset = decode(
            r#"{
                "flow_name": 7,
                "supervisor": {"trigger_code": "1234", "greeting": ["hi"]},
                "flow": [
                    {"id": "collect_company", "type": "text", "next": 3},
                    {"id": "done", "type": "terminal", "prompt": "completed_success"},
                    "junk"
                ],
                "messages": {
                    "prompts": {"collect_name": "Name please", "collect_company": false},
                    "errors": "nope"
                },
                "recommendations": {"small_below": -1, "medium_max": 150}
            }"#,
        )
        .expect("decode");

        assert_eq!(ruleset.flow_name, "havitush");
        assert_eq!(ruleset.supervisor.trigger_code, "1234");
        assert_eq!(ruleset.supervisor.greeting, "שלום חביתוש!");
        assert_eq!(ruleset.flow.len(), 1);
        assert_eq!(ruleset.flow[0].id, "done");
        assert_eq!(ruleset.messages.prompts.len(), 1);
        assert_eq!(ruleset.messages.prompts["collect_name"], "Name please");
        assert!(ruleset.messages.errors.is_empty());
        assert_eq!(ruleset.recommendations.small_below, 60);
        assert_eq!(ruleset.recommendations.medium_max, 150);
        assert_eq!(ruleset.recommendations.staffed_price_per_guest, Decimal::from(80));

        let entries = ruleset
            .rejected
            .iter()
            .filter_map(|issue| match issue {
                RulesetIssue::RejectedEntry { entry, .. } => Some(entry.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            entries,
            vec![
                "flow_name",
                "supervisor.greeting",
                "flow[0] `collect_company`",
                "flow[2]",
                "messages.prompts.collect_company",
                "messages.errors",
                "recommendations.small_below",
            ]
        );
    }
}
