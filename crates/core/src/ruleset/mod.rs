//! Declarative conversation ruleset: flow graph, message templates, supervisor
//! settings and guest-count recommendation thresholds.
//!
//! A ruleset is loaded once per process and never mutated afterwards. Lookups
//! tolerate missing or malformed entries by falling back to [`defaults`] for
//! that entry only.

pub mod defaults;
mod document;
pub mod template;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use template::{TemplateRenderer, TemplateVars};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RulesetError {
    #[error("could not read ruleset file `{path}`: {message}")]
    ReadFile { path: String, message: String },
    #[error("could not parse ruleset document: {0}")]
    Parse(String),
    #[error("could not serialize ruleset document: {0}")]
    Serialize(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    #[serde(default = "defaults::flow_name")]
    pub flow_name: String,
    #[serde(default = "defaults::initial_step_existing")]
    pub initial_step_existing: String,
    #[serde(default = "defaults::initial_step_new")]
    pub initial_step_new: String,
    #[serde(default)]
    pub supervisor: SupervisorRules,
    #[serde(default)]
    pub flow: Vec<FlowStepDefinition>,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default)]
    pub recommendations: RecommendationPolicy,
    /// Entries dropped while decoding the document.
    #[serde(skip)]
    pub rejected: Vec<RulesetIssue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorRules {
    #[serde(default = "defaults::trigger_code")]
    pub trigger_code: String,
    #[serde(default = "defaults::greeting")]
    pub greeting: String,
    #[serde(default = "defaults::menu_lines")]
    pub menu_lines: Vec<String>,
}

impl Default for SupervisorRules {
    fn default() -> Self {
        Self {
            trigger_code: defaults::trigger_code(),
            greeting: defaults::greeting(),
            menu_lines: defaults::menu_lines(),
        }
    }
}

impl SupervisorRules {
    /// A blank trigger code would match every empty message, so it falls back.
    pub fn effective_trigger_code(&self) -> &str {
        let code = self.trigger_code.trim();
        if code.is_empty() {
            defaults::TRIGGER_CODE
        } else {
            code
        }
    }

    pub fn effective_greeting(&self) -> &str {
        let greeting = self.greeting.trim();
        if greeting.is_empty() {
            defaults::GREETING
        } else {
            greeting
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Confirm,
    Name,
    Text,
    Integer,
    Terminal,
    Unknown(String),
}

/// A step with no `type` is kept; dispatch goes by step id.
impl Default for StepKind {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<String> for StepKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirm" => Self::Confirm,
            "name" => Self::Name,
            "text" => Self::Text,
            "integer" => Self::Integer,
            "terminal" => Self::Terminal,
            _ => Self::Unknown(value),
        }
    }
}

impl From<StepKind> for String {
    fn from(value: StepKind) -> Self {
        match value {
            StepKind::Confirm => "confirm".to_string(),
            StepKind::Name => "name".to_string(),
            StepKind::Text => "text".to_string(),
            StepKind::Integer => "integer".to_string(),
            StepKind::Terminal => "terminal".to_string(),
            StepKind::Unknown(kind) => kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Next,
    Positive,
    Negative,
}

impl Edge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Positive => "positive_next",
            Self::Negative => "negative_next",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStepDefinition {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_next: Option<String>,
}

impl FlowStepDefinition {
    pub fn confirm(id: &str, positive_next: &str, negative_next: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: StepKind::Confirm,
            prompt: Some(id.to_string()),
            next: None,
            positive_next: Some(positive_next.to_string()),
            negative_next: Some(negative_next.to_string()),
        }
    }

    pub fn linear(id: &str, kind: StepKind, next: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            prompt: Some(id.to_string()),
            next: Some(next.to_string()),
            positive_next: None,
            negative_next: None,
        }
    }

    pub fn terminal(id: &str, prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: StepKind::Terminal,
            prompt: Some(prompt.to_string()),
            next: None,
            positive_next: None,
            negative_next: None,
        }
    }

    pub fn edge(&self, edge: Edge) -> Option<&str> {
        let target = match edge {
            Edge::Next => self.next.as_deref(),
            Edge::Positive => self.positive_next.as_deref(),
            Edge::Negative => self.negative_next.as_deref(),
        };
        target.map(str::trim).filter(|target| !target.is_empty())
    }

    pub fn prompt_key(&self) -> Option<&str> {
        self.prompt.as_deref().map(str::trim).filter(|prompt| !prompt.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    #[serde(default)]
    pub summary: BTreeMap<String, String>,
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Messages {
    /// Every template under its renderer name (`summary.*`, `prompts.*`, `errors.*`, `fallback`).
    pub fn template_entries(&self) -> Vec<(String, &str)> {
        let mut entries = Vec::new();
        for (section, templates) in
            [("summary", &self.summary), ("prompts", &self.prompts), ("errors", &self.errors)]
        {
            for (key, template) in templates {
                entries.push((format!("{section}.{key}"), template.as_str()));
            }
        }
        if let Some(fallback) = &self.fallback {
            entries.push(("fallback".to_string(), fallback.as_str()));
        }
        entries
    }
}

/// Guest-count breakpoints and per-guest prices behind the summary recommendation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationPolicy {
    #[serde(default = "defaults::small_event_below")]
    pub small_below: u32,
    #[serde(default = "defaults::medium_event_max")]
    pub medium_max: u32,
    #[serde(default = "defaults::self_service_price_per_guest")]
    pub self_service_price_per_guest: Decimal,
    #[serde(default = "defaults::staffed_price_per_guest")]
    pub staffed_price_per_guest: Decimal,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            small_below: defaults::small_event_below(),
            medium_max: defaults::medium_event_max(),
            self_service_price_per_guest: defaults::self_service_price_per_guest(),
            staffed_price_per_guest: defaults::staffed_price_per_guest(),
        }
    }
}

/// Step-id keyed view of the flow definition. The first definition of an id wins.
#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    steps: HashMap<String, FlowStepDefinition>,
}

impl FlowGraph {
    pub fn new(steps: &[FlowStepDefinition]) -> Self {
        let mut graph = HashMap::with_capacity(steps.len());
        for step in steps {
            graph.entry(step.id.trim().to_string()).or_insert_with(|| step.clone());
        }
        Self { steps: graph }
    }

    pub fn step(&self, id: &str) -> Option<&FlowStepDefinition> {
        self.steps.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum RulesetIssue {
    DuplicateStep { step: String },
    UnknownStepKind { step: String, kind: String },
    MissingEdge { step: String, edge: String },
    DanglingEdge { step: String, edge: String, target: String },
    MissingPrompt { step: String, prompt: String },
    UnknownInitialStep { selector: String, target: String },
    EmptyTriggerCode,
    RejectedEntry { entry: String, reason: String },
    SingleBracePlaceholder { template: String, placeholder: String },
}

impl fmt::Display for RulesetIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStep { step } => write!(f, "step `{step}` is defined more than once"),
            Self::UnknownStepKind { step, kind } if kind.trim().is_empty() => {
                write!(f, "step `{step}` has no type")
            }
            Self::UnknownStepKind { step, kind } => {
                write!(f, "step `{step}` has unknown type `{kind}`")
            }
            Self::MissingEdge { step, edge } => write!(f, "step `{step}` is missing `{edge}`"),
            Self::DanglingEdge { step, edge, target } => {
                write!(f, "step `{step}` {edge} points at unknown step `{target}`")
            }
            Self::MissingPrompt { step, prompt } => {
                write!(f, "step `{step}` uses prompt `{prompt}` which has no template")
            }
            Self::UnknownInitialStep { selector, target } => {
                write!(f, "{selector} points at unknown step `{target}`")
            }
            Self::EmptyTriggerCode => f.write_str("supervisor.trigger_code is empty"),
            Self::RejectedEntry { entry, reason } => {
                write!(f, "entry `{entry}` was dropped: {reason}")
            }
            Self::SingleBracePlaceholder { template, placeholder } => write!(
                f,
                "template `{template}` uses `{{{placeholder}}}`; placeholders are written \
                 `{{{{ {placeholder} }}}}` and this one renders literally"
            ),
        }
    }
}

impl Default for Ruleset {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Ruleset {
    pub fn builtin() -> Self {
        defaults::ruleset()
    }

    /// Decodes a document entry by entry. Only input that is not a JSON object
    /// fails; see [`RulesetIssue::RejectedEntry`] for entries that were dropped.
    pub fn from_json(raw: &str) -> Result<Self, RulesetError> {
        document::decode(raw)
    }

    pub fn load_file(path: &Path) -> Result<Self, RulesetError> {
        let raw = fs::read_to_string(path).map_err(|error| RulesetError::ReadFile {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, RulesetError> {
        serde_json::to_string_pretty(self)
            .map_err(|error| RulesetError::Serialize(error.to_string()))
    }

    pub fn with_trigger_code(mut self, trigger_code: impl Into<String>) -> Self {
        self.supervisor.trigger_code = trigger_code.into();
        self
    }

    pub fn graph(&self) -> FlowGraph {
        FlowGraph::new(&self.flow)
    }

    /// Structural problems the engine will paper over with defaults at runtime.
    pub fn validate(&self) -> Vec<RulesetIssue> {
        let mut issues = self.rejected.clone();
        let graph = self.graph();

        let mut seen = HashSet::new();
        for step in &self.flow {
            if !seen.insert(step.id.trim()) {
                issues.push(RulesetIssue::DuplicateStep { step: step.id.clone() });
            }
        }

        for step in &self.flow {
            let required_edges: &[Edge] = match &step.kind {
                StepKind::Confirm => &[Edge::Positive, Edge::Negative],
                StepKind::Name | StepKind::Text | StepKind::Integer => &[Edge::Next],
                StepKind::Terminal => &[],
                StepKind::Unknown(kind) => {
                    issues.push(RulesetIssue::UnknownStepKind {
                        step: step.id.clone(),
                        kind: kind.clone(),
                    });
                    &[]
                }
            };

            for edge in required_edges {
                match step.edge(*edge) {
                    None => issues.push(RulesetIssue::MissingEdge {
                        step: step.id.clone(),
                        edge: edge.as_str().to_string(),
                    }),
                    Some(target) if !graph.contains(target) => {
                        issues.push(RulesetIssue::DanglingEdge {
                            step: step.id.clone(),
                            edge: edge.as_str().to_string(),
                            target: target.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }

            if let Some(prompt) = step.prompt_key() {
                let known = self.messages.prompts.contains_key(prompt)
                    || defaults::PROMPTS.iter().any(|(key, _)| *key == prompt);
                if !known {
                    issues.push(RulesetIssue::MissingPrompt {
                        step: step.id.clone(),
                        prompt: prompt.to_string(),
                    });
                }
            }
        }

        for (selector, target) in [
            ("initial_step_existing", &self.initial_step_existing),
            ("initial_step_new", &self.initial_step_new),
        ] {
            if !graph.contains(target.trim()) {
                issues.push(RulesetIssue::UnknownInitialStep {
                    selector: selector.to_string(),
                    target: target.clone(),
                });
            }
        }

        if self.supervisor.trigger_code.trim().is_empty() {
            issues.push(RulesetIssue::EmptyTriggerCode);
        }

        for (template, source) in self.messages.template_entries() {
            for placeholder in template::single_brace_placeholders(source) {
                issues.push(RulesetIssue::SingleBracePlaceholder {
                    template: template.clone(),
                    placeholder,
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{Edge, Ruleset, RulesetError, RulesetIssue, StepKind};

    #[test]
    fn builtin_ruleset_has_no_issues() {
        let ruleset = Ruleset::builtin();
        assert!(ruleset.validate().is_empty(), "issues: {:?}", ruleset.validate());
        assert_eq!(ruleset.graph().len(), 11);
        assert_eq!(ruleset.supervisor.effective_trigger_code(), "חביתוש123");
    }

    #[test]
    fn json_document_round_trips_through_builtin_shape() {
        let ruleset = Ruleset::builtin();
        let json = ruleset.to_json_pretty().expect("serialize");
        assert!(json.contains("\"type\": \"confirm\""));

        let parsed = Ruleset::from_json(&json).expect("parse");
        assert_eq!(parsed, ruleset);
    }

    #[test]
    fn sparse_document_fills_defaults() {
        let ruleset = Ruleset::from_json(
            r#"{
                "flow": [
                    {"id": "collect_name", "type": "name", "prompt": "collect_name", "next": "done"},
                    {"id": "done", "type": "terminal", "prompt": "completed_success"}
                ],
                "initial_step_new": "collect_name",
                "recommendations": {"staffed_price_per_guest": 75}
            }"#,
        )
        .expect("parse sparse document");

        assert_eq!(ruleset.supervisor.trigger_code, "חביתוש123");
        assert_eq!(ruleset.recommendations.small_below, 60);
        assert_eq!(ruleset.recommendations.staffed_price_per_guest, Decimal::from(75));
        assert!(ruleset.messages.prompts.is_empty());

        let graph = ruleset.graph();
        assert_eq!(graph.step("collect_name").and_then(|step| step.edge(Edge::Next)), Some("done"));
    }

    #[test]
    fn validation_reports_dangling_and_unknown_entries() {
        let ruleset = Ruleset::from_json(
            r#"{
                "initial_step_existing": "nowhere",
                "supervisor": {"trigger_code": "  "},
                "flow": [
                    {"id": "confirm_age", "type": "confirm", "prompt": "confirm_age",
                     "positive_next": "completed"},
                    {"id": "completed", "type": "terminal", "prompt": "custom_goodbye"},
                    {"id": "completed", "type": "terminal"},
                    {"id": "mystery", "type": "dropdown"}
                ]
            }"#,
        )
        .expect("parse malformed-but-valid json");

        let issues = ruleset.validate();
        assert!(issues.contains(&RulesetIssue::MissingEdge {
            step: "confirm_age".to_string(),
            edge: "negative_next".to_string(),
        }));
        assert!(issues.contains(&RulesetIssue::DuplicateStep { step: "completed".to_string() }));
        assert!(issues.contains(&RulesetIssue::UnknownStepKind {
            step: "mystery".to_string(),
            kind: "dropdown".to_string(),
        }));
        assert!(issues.contains(&RulesetIssue::MissingPrompt {
            step: "completed".to_string(),
            prompt: "custom_goodbye".to_string(),
        }));
        assert!(issues.contains(&RulesetIssue::UnknownInitialStep {
            selector: "initial_step_existing".to_string(),
            target: "nowhere".to_string(),
        }));
        assert!(issues.contains(&RulesetIssue::EmptyTriggerCode));
        assert_eq!(ruleset.supervisor.effective_trigger_code(), "חביתוש123");
    }

    #[test]
    fn validation_surfaces_dropped_entries_and_format_style_placeholders() {
        let ruleset = Ruleset::from_json(
            r#"{
                "flow": [
                    {"id": "collect_name", "prompt": "collect_name", "next": "collect_name"},
                    {"id": "broken", "type": "text", "next": ["a"]}
                ],
                "messages": {"prompts": {"collect_name": "שלום {full_name}, מה השם?"}}
            }"#,
        )
        .expect("parse");

        let issues = ruleset.validate();
        assert!(issues.iter().any(|issue| matches!(
            issue,
            RulesetIssue::RejectedEntry { entry, .. } if entry == "flow[1] `broken`"
        )));
        let typeless = RulesetIssue::UnknownStepKind {
            step: "collect_name".to_string(),
            kind: String::new(),
        };
        assert!(issues.contains(&typeless));
        assert_eq!(typeless.to_string(), "step `collect_name` has no type");

        let placeholder = RulesetIssue::SingleBracePlaceholder {
            template: "prompts.collect_name".to_string(),
            placeholder: "full_name".to_string(),
        };
        assert!(issues.contains(&placeholder));
        assert!(placeholder.to_string().contains("`{{ full_name }}`"));
    }

    #[test]
    fn unknown_step_kind_is_preserved_on_serialization() {
        let kind: StepKind = serde_json::from_str("\"Dropdown\"").expect("parse kind");
        assert_eq!(kind, StepKind::Unknown("Dropdown".to_string()));
        assert_eq!(serde_json::to_string(&kind).expect("serialize"), "\"Dropdown\"");
    }

    #[test]
    fn load_file_reports_read_and_parse_failures() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("missing.json");
        assert!(matches!(Ruleset::load_file(&missing), Err(RulesetError::ReadFile { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").expect("write");
        assert!(matches!(Ruleset::load_file(&broken), Err(RulesetError::Parse(_))));

        let valid = dir.path().join("ruleset.json");
        fs::write(&valid, Ruleset::builtin().to_json_pretty().expect("serialize")).expect("write");
        assert_eq!(Ruleset::load_file(&valid).expect("load"), Ruleset::builtin());
    }
}
