use tracing::{debug, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::conversation::ConversationRecord;
use crate::flows::classify::{
    classify_affirmation, extract_full_name, extract_guest_count, Affirmation,
};
use crate::flows::states::{StepId, Turn, TurnDisposition};
use crate::flows::summary::SummaryRenderer;
use crate::ruleset::{defaults, Edge, FlowGraph, Ruleset, StepKind, TemplateRenderer, TemplateVars};

/// The conversation state machine.
///
/// Built once from a [`Ruleset`] and shared read-only. [`FlowEngine::advance`]
/// never fails: bad input leads to a retry prompt and ruleset gaps fall back
/// to built-in defaults.
#[derive(Debug)]
pub struct FlowEngine {
    ruleset: Ruleset,
    graph: FlowGraph,
    templates: TemplateRenderer,
}

enum Reply {
    Prompt(StepId),
    Error(&'static str),
    Fallback,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new(Ruleset::builtin())
    }
}

impl FlowEngine {
    pub fn new(ruleset: Ruleset) -> Self {
        for issue in ruleset.validate() {
            warn!(
                event_name = "ruleset.issue",
                flow = %ruleset.flow_name,
                issue = %issue,
                "ruleset issue; defaults will be used where needed"
            );
        }
        let graph = ruleset.graph();
        let templates = TemplateRenderer::new(&ruleset.messages);
        Self { ruleset, graph, templates }
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    pub fn flow_name(&self) -> &str {
        &self.ruleset.flow_name
    }

    pub fn supervisor_code(&self) -> &str {
        self.ruleset.supervisor.effective_trigger_code()
    }

    pub fn summary(&self, record: &ConversationRecord) -> String {
        self.summary_renderer().render(record)
    }

    /// Applies one inbound message to `record` and returns the reply.
    pub fn advance(&self, record: &mut ConversationRecord, message: &str) -> Turn {
        let from = record.current_step.clone();

        if message.trim() == self.supervisor_code() {
            record.current_step = StepId::SupervisorMenu;
            let reply = self.supervisor_reply(record);
            return self.finish(from, record, TurnDisposition::SupervisorMenu, reply);
        }

        let (disposition, reply) = match &from {
            StepId::Start | StepId::SupervisorMenu => {
                let target = self.initial_step(record);
                record.current_step = target.clone();
                (TurnDisposition::Routed, Reply::Prompt(target))
            }
            StepId::ConfirmName => match classify_affirmation(message) {
                Affirmation::Positive => {
                    self.move_to(record, Edge::Positive, StepId::AskNewOrder)
                }
                Affirmation::Negative => self.move_to(record, Edge::Negative, StepId::CollectName),
                Affirmation::Ambiguous => retry("confirm_name_retry"),
            },
            StepId::CollectName => match extract_full_name(message) {
                Some(name) => {
                    record.first_name = Some(name.first_name);
                    record.last_name = Some(name.last_name);
                    self.move_to(record, Edge::Next, StepId::AskNewOrder)
                }
                None => retry("name_retry"),
            },
            StepId::AskNewOrder => match classify_affirmation(message) {
                Affirmation::Positive => {
                    record.wants_new_order = Some(true);
                    self.move_to(record, Edge::Positive, StepId::CollectCompany)
                }
                Affirmation::Negative => {
                    record.wants_new_order = Some(false);
                    self.move_to(record, Edge::Negative, StepId::CompletedNoOrder)
                }
                Affirmation::Ambiguous => retry("new_order_retry"),
            },
            StepId::CollectCompany => {
                fill(&mut record.company_name, message);
                self.move_to(record, Edge::Next, StepId::CollectAddress)
            }
            StepId::CollectAddress => {
                fill(&mut record.event_address, message);
                self.move_to(record, Edge::Next, StepId::CollectEventDate)
            }
            StepId::CollectEventDate => {
                fill(&mut record.event_date, message);
                self.move_to(record, Edge::Next, StepId::CollectGuestCount)
            }
            StepId::CollectGuestCount => match extract_guest_count(message) {
                Some(count) => {
                    record.guest_count = Some(count);
                    self.move_to(record, Edge::Next, StepId::ConfirmAge)
                }
                None => retry("guest_count_retry"),
            },
            StepId::ConfirmAge => match classify_affirmation(message) {
                Affirmation::Positive => {
                    record.age_verified = Some(true);
                    self.move_to(record, Edge::Positive, StepId::Completed)
                }
                Affirmation::Negative => {
                    record.age_verified = Some(false);
                    self.move_to(record, Edge::Negative, StepId::HaltedUnderage)
                }
                Affirmation::Ambiguous => retry("age_retry"),
            },
            step if self.is_terminal(step) => {
                (TurnDisposition::TerminalRepeat, Reply::Prompt(step.clone()))
            }
            step => {
                warn!(
                    event_name = "flow.unknown_step",
                    step = %step,
                    phone = %record.phone_number.masked(),
                    "conversation is at a step the engine cannot handle"
                );
                (TurnDisposition::Fallback, Reply::Fallback)
            }
        };

        let vars = self.summary_renderer().vars(record);
        let text = match reply {
            Reply::Prompt(step) => self.prompt_text(&step, &vars),
            Reply::Error(key) => self.error_text(key, &vars),
            Reply::Fallback => self.fallback_text(&vars),
        };
        let summary = self.summary_renderer().render_with(record, &vars);
        self.finish(from, record, disposition, format!("{summary}\n\n{text}"))
    }

    pub fn advance_with_audit<S>(
        &self,
        record: &mut ConversationRecord,
        message: &str,
        sink: &S,
        audit: &AuditContext,
    ) -> Turn
    where
        S: AuditSink + ?Sized,
    {
        let turn = self.advance(record, message);
        self.audit_turn(&turn, sink, audit);
        turn
    }

    /// Emits `flow.turn_applied` for a turn. Callers that persist turns emit it
    /// only once the turn is stored.
    pub fn audit_turn<S>(&self, turn: &Turn, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        let outcome = match turn.disposition {
            TurnDisposition::Retry | TurnDisposition::Fallback => AuditOutcome::Rejected,
            _ => AuditOutcome::Success,
        };
        sink.emit(
            AuditEvent::new(audit, "flow.turn_applied", AuditCategory::Flow, outcome)
                .with_metadata("flow", self.flow_name())
                .with_metadata("from", turn.from.as_str())
                .with_metadata("to", turn.to.as_str())
                .with_metadata("disposition", turn.disposition.as_str()),
        );
    }

    fn finish(
        &self,
        from: StepId,
        record: &ConversationRecord,
        disposition: TurnDisposition,
        reply: String,
    ) -> Turn {
        debug!(
            event_name = "flow.turn",
            phone = %record.phone_number.masked(),
            from = %from,
            to = %record.current_step,
            disposition = disposition.as_str(),
            "conversation turn applied"
        );
        Turn { from, to: record.current_step.clone(), disposition, reply }
    }

    fn summary_renderer(&self) -> SummaryRenderer<'_> {
        SummaryRenderer::new(&self.templates, &self.ruleset.recommendations)
    }

    fn supervisor_reply(&self, record: &ConversationRecord) -> String {
        let supervisor = &self.ruleset.supervisor;
        let menu = std::iter::once(supervisor.effective_greeting())
            .chain(supervisor.menu_lines.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\n{menu}", self.summary(record))
    }

    fn initial_step(&self, record: &ConversationRecord) -> StepId {
        let (selector, default) = if record.has_name() {
            (&self.ruleset.initial_step_existing, StepId::ConfirmName)
        } else {
            (&self.ruleset.initial_step_new, StepId::CollectName)
        };
        let selector = selector.trim();
        if self.graph.contains(selector) {
            StepId::from(selector)
        } else {
            warn!(
                event_name = "ruleset.initial_step_unknown",
                target_step = selector,
                fallback = %default,
                "initial step is not in the flow graph"
            );
            default
        }
    }

    /// Follows `edge` out of the current step, using `default` when the ruleset
    /// has no usable target.
    fn move_to(
        &self,
        record: &mut ConversationRecord,
        edge: Edge,
        default: StepId,
    ) -> (TurnDisposition, Reply) {
        let from = &record.current_step;
        let target = match self.graph.step(from.as_str()).and_then(|step| step.edge(edge)) {
            Some(target) if self.graph.contains(target) => StepId::from(target),
            Some(target) => {
                warn!(
                    event_name = "ruleset.edge_dangling",
                    step = %from,
                    edge = edge.as_str(),
                    target_step = target,
                    fallback = %default,
                    "edge points at an unknown step"
                );
                default
            }
            None => default,
        };
        record.current_step = target.clone();
        (TurnDisposition::Advanced, Reply::Prompt(target))
    }

    fn is_terminal(&self, step: &StepId) -> bool {
        step.is_builtin_terminal()
            || self
                .graph
                .step(step.as_str())
                .is_some_and(|definition| definition.kind == StepKind::Terminal)
    }

    fn prompt_text(&self, step: &StepId, vars: &TemplateVars) -> String {
        let key = self
            .graph
            .step(step.as_str())
            .and_then(|definition| definition.prompt_key())
            .or_else(|| step.default_prompt_key());

        if let Some(key) = key {
            if let Some(text) = self.templates.render(&format!("prompts.{key}"), vars) {
                return text;
            }
            warn!(
                event_name = "ruleset.prompt_missing",
                step = %step,
                prompt = key,
                "no template for prompt"
            );
        }

        if self.is_terminal(step) {
            self.templates
                .render(&format!("prompts.{}", defaults::COMPLETION_REPEAT_KEY), vars)
                .unwrap_or_else(|| self.fallback_text(vars))
        } else {
            self.fallback_text(vars)
        }
    }

    fn error_text(&self, key: &str, vars: &TemplateVars) -> String {
        self.templates
            .render(&format!("errors.{key}"), vars)
            .unwrap_or_else(|| self.fallback_text(vars))
    }

    fn fallback_text(&self, vars: &TemplateVars) -> String {
        self.templates.render("fallback", vars).unwrap_or_else(|| defaults::FALLBACK.to_string())
    }
}

fn retry(key: &'static str) -> (TurnDisposition, Reply) {
    (TurnDisposition::Retry, Reply::Error(key))
}

/// Stores trimmed free text. Blank input never overwrites a value already collected.
fn fill(field: &mut Option<String>, message: &str) {
    let text = message.trim();
    if !text.is_empty() || field.is_none() {
        *field = Some(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::conversation::{ConversationRecord, PhoneNumber};
    use crate::flows::engine::FlowEngine;
    use crate::flows::states::{StepId, TurnDisposition};
    use crate::ruleset::Ruleset;

    const GREETING: &str = "שלום חביתוש!";
    const CODE: &str = "חביתוש123";

    fn new_record() -> ConversationRecord {
        ConversationRecord::new(PhoneNumber("972501234567".to_owned()))
    }

    fn named_record() -> ConversationRecord {
        let mut record = new_record();
        record.first_name = Some("Dana".to_owned());
        record.last_name = Some("Cohen".to_owned());
        record
    }

    #[test]
    fn new_customer_completes_full_order_flow() {
        let engine = FlowEngine::default();
        let mut record = new_record();

        let turn = engine.advance(&mut record, "Hello");
        assert_eq!(turn.disposition, TurnDisposition::Routed);
        assert_eq!(record.current_step, StepId::CollectName);
        assert!(turn.reply.ends_with("איך תרצה שנרשום את שמך המלא (שם פרטי ושם משפחה)?"));

        engine.advance(&mut record, "Dana Cohen");
        assert_eq!(record.current_step, StepId::AskNewOrder);
        assert_eq!(record.first_name.as_deref(), Some("Dana"));
        assert_eq!(record.last_name.as_deref(), Some("Cohen"));

        engine.advance(&mut record, "yes");
        assert_eq!(record.current_step, StepId::CollectCompany);
        assert_eq!(record.wants_new_order, Some(true));

        engine.advance(&mut record, "Acme Events");
        assert_eq!(record.current_step, StepId::CollectAddress);
        engine.advance(&mut record, "10 Example St");
        assert_eq!(record.current_step, StepId::CollectEventDate);
        engine.advance(&mut record, "2025-12-01");
        assert_eq!(record.current_step, StepId::CollectGuestCount);

        let retry = engine.advance(&mut record, "no idea");
        assert_eq!(retry.disposition, TurnDisposition::Retry);
        assert_eq!(record.current_step, StepId::CollectGuestCount);
        assert!(retry.reply.ends_with("לא הצלחתי לקלוט את מספר המשתתפים. אפשר לציין מספר?"));

        engine.advance(&mut record, "85");
        assert_eq!(record.guest_count, Some(85));
        assert_eq!(record.current_step, StepId::ConfirmAge);

        let done = engine.advance(&mut record, "yes");
        assert_eq!(record.current_step, StepId::Completed);
        assert_eq!(record.age_verified, Some(true));
        assert_eq!(done.disposition, TurnDisposition::Advanced);
        assert!(done.reply.contains("שירות עצמי (עלות משוערת: 8500 ₪)"));
        assert!(done.reply.ends_with("תודה שבחרת בחביתוש!"));
        assert_eq!(record.company_name.as_deref(), Some("Acme Events"));
        assert_eq!(record.event_address.as_deref(), Some("10 Example St"));
        assert_eq!(record.event_date.as_deref(), Some("2025-12-01"));
    }

    #[test]
    fn arabic_indic_guest_count_advances() {
        let engine = FlowEngine::default();
        let mut record = named_record();
        record.current_step = StepId::CollectGuestCount;

        let turn = engine.advance(&mut record, "٨٥");
        assert_eq!(turn.disposition, TurnDisposition::Advanced);
        assert_eq!(record.guest_count, Some(85));
        assert_eq!(record.current_step, StepId::ConfirmAge);
    }

    #[test]
    fn existing_customer_is_asked_to_confirm_name() {
        let engine = FlowEngine::default();
        let mut record = named_record();

        let turn = engine.advance(&mut record, "שלום");
        assert_eq!(record.current_step, StepId::ConfirmName);
        assert!(turn.reply.ends_with("האם השם שלך הוא Dana Cohen?"));

        engine.advance(&mut record, "לא");
        assert_eq!(record.current_step, StepId::CollectName);
    }

    #[test]
    fn supervisor_code_overrides_every_step() {
        let engine = FlowEngine::default();
        for step in [
            StepId::Start,
            StepId::CollectGuestCount,
            StepId::Completed,
            StepId::HaltedUnderage,
            StepId::Other("vip_lounge".to_owned()),
        ] {
            let mut record = named_record();
            record.current_step = step;
            record.guest_count = Some(40);

            let turn = engine.advance(&mut record, &format!("  {CODE} "));
            assert_eq!(turn.disposition, TurnDisposition::SupervisorMenu);
            assert_eq!(record.current_step, StepId::SupervisorMenu);
            assert!(turn.reply.contains(GREETING));
            assert!(turn.reply.contains("1. קבלת מידע על לקוחות"));
            assert_eq!(record.guest_count, Some(40));
            assert_eq!(record.first_name.as_deref(), Some("Dana"));
        }

        let mut record = named_record();
        record.current_step = StepId::SupervisorMenu;
        engine.advance(&mut record, "anything");
        assert_eq!(record.current_step, StepId::ConfirmName);
    }

    #[test]
    fn terminal_steps_repeat_their_message() {
        let engine = FlowEngine::default();
        let mut record = named_record();
        record.current_step = StepId::HaltedUnderage;
        record.age_verified = Some(false);
        let before = record.clone();

        let first = engine.advance(&mut record, "please");
        let second = engine.advance(&mut record, "כן");

        assert_eq!(first.disposition, TurnDisposition::TerminalRepeat);
        assert_eq!(first.reply, second.reply);
        assert_eq!(record, before);
        assert!(first.reply.ends_with("מצטער, לא ניתן לבצע הזמנה אם אחד מהמשתתפים מתחת לגיל 18."));
    }

    #[test]
    fn declining_new_order_ends_conversation() {
        let engine = FlowEngine::default();
        let mut record = named_record();
        record.current_step = StepId::AskNewOrder;

        let turn = engine.advance(&mut record, "לא תודה");
        assert_eq!(record.current_step, StepId::CompletedNoOrder);
        assert_eq!(record.wants_new_order, Some(false));
        assert!(turn.reply.contains("הלקוח לא ביקש לפתוח הזמנה חדשה"));
        assert!(turn.reply.ends_with("נשמור את הפרטים שלך ונשמח לעזור כשתרצה להזמין."));
    }

    #[test]
    fn single_word_name_is_retried() {
        let engine = FlowEngine::default();
        let mut record = new_record();
        record.current_step = StepId::CollectName;

        let turn = engine.advance(&mut record, "Dana");
        assert_eq!(turn.disposition, TurnDisposition::Retry);
        assert_eq!(record.current_step, StepId::CollectName);
        assert_eq!(record.first_name, None);
    }

    #[test]
    fn ambiguous_age_answer_is_retried() {
        let engine = FlowEngine::default();
        let mut record = named_record();
        record.current_step = StepId::ConfirmAge;

        let turn = engine.advance(&mut record, "אולי");
        assert_eq!(record.current_step, StepId::ConfirmAge);
        assert_eq!(record.age_verified, None);
        assert!(turn.reply.ends_with("אנא אשר/י אם כל המשתתפים מעל גיל 18."));
    }

    #[test]
    fn collected_fields_are_never_cleared() {
        let engine = FlowEngine::default();
        let mut record = named_record();
        record.company_name = Some("Acme Events".to_owned());
        record.current_step = StepId::CollectCompany;

        engine.advance(&mut record, "   ");
        assert_eq!(record.company_name.as_deref(), Some("Acme Events"));

        let inputs = ["yes", "no", "12", CODE, "hello", "Dana Cohen"];
        for input in inputs {
            let snapshot = record.clone();
            engine.advance(&mut record, input);
            for (before, after) in [
                (&snapshot.first_name, &record.first_name),
                (&snapshot.last_name, &record.last_name),
                (&snapshot.company_name, &record.company_name),
                (&snapshot.event_address, &record.event_address),
                (&snapshot.event_date, &record.event_date),
            ] {
                if before.is_some() {
                    assert!(after.is_some());
                }
            }
            if snapshot.guest_count.is_some() {
                assert!(record.guest_count.is_some());
            }
        }
    }

    #[test]
    fn unknown_step_replies_with_fallback_and_keeps_state() {
        let engine = FlowEngine::default();
        let mut record = named_record();
        record.current_step = StepId::Other("vip_lounge".to_owned());

        let turn = engine.advance(&mut record, "hello");
        assert_eq!(turn.disposition, TurnDisposition::Fallback);
        assert_eq!(record.current_step, StepId::Other("vip_lounge".to_owned()));
        assert!(turn.reply.ends_with("נשמח להמשיך לעזור, רק אמור/י לי מה הצעד הבא שתרצה לבצע."));
    }

    #[test]
    fn custom_terminal_without_prompt_uses_completion_repeat() {
        let mut ruleset = Ruleset::builtin();
        ruleset.flow.push(crate::ruleset::FlowStepDefinition {
            prompt: None,
            ..crate::ruleset::FlowStepDefinition::terminal("archived", "unused")
        });
        let engine = FlowEngine::new(ruleset);
        let mut record = named_record();
        record.current_step = StepId::Other("archived".to_owned());

        let turn = engine.advance(&mut record, "hi");
        assert_eq!(turn.disposition, TurnDisposition::TerminalRepeat);
        assert!(turn.reply.ends_with("הפרטים כבר נקלטו. אם תרצה לפתוח הזמנה חדשה, כתוב זאת ואעדכן בהתאם."));
    }

    #[test]
    fn dangling_edges_and_missing_templates_fall_back_to_defaults() {
        let ruleset = Ruleset::from_json(
            r#"{
                "initial_step_new": "does_not_exist",
                "flow": [
                    {"id": "collect_name", "type": "name", "prompt": "collect_name", "next": "nowhere"}
                ],
                "messages": {"prompts": {"collect_name": "Name please {{ broken"}}
            }"#,
        )
        .expect("parse");
        let engine = FlowEngine::new(ruleset);
        let mut record = new_record();

        let turn = engine.advance(&mut record, "hi");
        assert_eq!(record.current_step, StepId::CollectName);
        assert!(turn.reply.ends_with("איך תרצה שנרשום את שמך המלא (שם פרטי ושם משפחה)?"));

        let turn = engine.advance(&mut record, "Dana Cohen");
        assert_eq!(record.current_step, StepId::AskNewOrder);
        assert!(turn.reply.ends_with("האם תרצה לבצע הזמנה חדשה של אירוע בחביתוש?"));
    }

    #[test]
    fn malformed_entries_do_not_discard_custom_prompts() {
        let ruleset = Ruleset::from_json(
            r#"{
                "flow": [
                    {"id": "collect_name", "prompt": "collect_name", "next": "ask_new_order"},
                    {"id": "ask_new_order", "type": "confirm", "positive_next": 12}
                ],
                "messages": {
                    "prompts": {"collect_name": "CUSTOM NAME PROMPT", "ask_new_order": null}
                }
            }"#,
        )
        .expect("a partly malformed document still decodes");
        assert_eq!(ruleset.rejected.len(), 2);

        let engine = FlowEngine::new(ruleset);
        let mut record = new_record();

        let turn = engine.advance(&mut record, "hi");
        assert_eq!(record.current_step, StepId::CollectName);
        assert!(turn.reply.ends_with("CUSTOM NAME PROMPT"), "reply: {}", turn.reply);

        let turn = engine.advance(&mut record, "Dana Cohen");
        assert_eq!(record.current_step, StepId::AskNewOrder);
        assert!(turn.reply.ends_with("האם תרצה לבצע הזמנה חדשה של אירוע בחביתוש?"));
    }

    #[test]
    fn custom_trigger_code_replaces_default() {
        let engine = FlowEngine::new(Ruleset::builtin().with_trigger_code("open-sesame"));
        let mut record = new_record();
        record.current_step = StepId::CollectCompany;

        engine.advance(&mut record, CODE);
        assert_eq!(record.current_step, StepId::CollectAddress);
        assert_eq!(record.company_name.as_deref(), Some(CODE));

        let turn = engine.advance(&mut record, "open-sesame");
        assert_eq!(turn.disposition, TurnDisposition::SupervisorMenu);
    }

    #[test]
    fn audited_turns_record_disposition() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(PhoneNumber("972501234567".to_owned())), "req-7", "test");
        let mut record = new_record();
        record.current_step = StepId::CollectGuestCount;

        engine.advance_with_audit(&mut record, "many", &sink, &audit);
        engine.advance_with_audit(&mut record, "85", &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "flow.turn_applied");
        assert_eq!(events[0].outcome, AuditOutcome::Rejected);
        assert_eq!(events[0].metadata.get("disposition").map(String::as_str), Some("retry"));
        assert_eq!(events[1].outcome, AuditOutcome::Success);
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("confirm_age"));
        assert_eq!(events[1].correlation_id, "req-7");
    }
}
