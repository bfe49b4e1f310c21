use std::collections::HashMap;

use tera::{Context, Tera};
use tracing::warn;

use super::{defaults, Messages};
use crate::domain::conversation::{present, ConversationRecord};

/// Named placeholder values available to every template.
#[derive(Clone, Debug, Default)]
pub struct TemplateVars {
    context: Context,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record fields as strings; absent values render as empty text.
    pub fn for_record(record: &ConversationRecord) -> Self {
        Self::new()
            .with("full_name", record.full_name())
            .with("first_name", present(&record.first_name).unwrap_or_default())
            .with("last_name", present(&record.last_name).unwrap_or_default())
            .with("phone_number", record.phone_number.as_str())
            .with("company_name", present(&record.company_name).unwrap_or_default())
            .with("event_address", present(&record.event_address).unwrap_or_default())
            .with("event_date", present(&record.event_date).unwrap_or_default())
            .with(
                "guest_count",
                record.guest_count.map(|count| count.to_string()).unwrap_or_default(),
            )
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key, &value.to_string());
        self
    }

    fn context(&self) -> &Context {
        &self.context
    }
}

/// Compiled message templates keyed `summary.<key>`, `prompts.<key>`,
/// `errors.<key>` and `fallback`.
///
/// Built-in templates are registered first so every lookup has a default. A
/// ruleset entry that fails to parse leaves the default in place.
#[derive(Debug)]
pub struct TemplateRenderer {
    tera: Tera,
    sources: HashMap<String, String>,
}

impl TemplateRenderer {
    pub fn new(messages: &Messages) -> Self {
        let mut renderer = Self { tera: Tera::default(), sources: HashMap::new() };
        renderer.tera.autoescape_on(Vec::new());

        let builtin = defaults::messages();
        for (name, source) in builtin.template_entries() {
            renderer.register(&name, source);
        }
        for (name, source) in messages.template_entries() {
            renderer.register(&name, source);
        }
        renderer
    }

    fn register(&mut self, name: &str, source: &str) {
        match self.tera.add_raw_template(name, source) {
            Ok(()) => {
                self.sources.insert(name.to_string(), source.to_string());
            }
            Err(error) => {
                warn!(
                    event_name = "ruleset.template_invalid",
                    template = name,
                    error = %error,
                    "template failed to parse; keeping default"
                );
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// `None` when no template is registered under `name`. A render failure
    /// yields the template's literal text.
    pub fn render(&self, name: &str, vars: &TemplateVars) -> Option<String> {
        let source = self.sources.get(name)?;
        match self.tera.render(name, vars.context()) {
            Ok(rendered) => Some(rendered),
            Err(error) => {
                warn!(
                    event_name = "ruleset.template_render_failed",
                    template = name,
                    error = %error,
                    "template failed to render; using literal text"
                );
                Some(source.clone())
            }
        }
    }
}

/// Names written as `{name}` rather than `{{ name }}`. Tera leaves them as
/// literal text, so they usually mean a template in `str.format` style.
pub(crate) fn single_brace_placeholders(source: &str) -> Vec<String> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut found = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let opens = chars[index] == '{'
            && (index == 0 || chars[index - 1] != '{')
            && chars.get(index + 1).is_some_and(|next| is_name_char(*next));
        if !opens {
            index += 1;
            continue;
        }

        let start = index + 1;
        let mut end = start;
        while chars.get(end).is_some_and(|c| is_name_char(*c)) {
            end += 1;
        }
        if chars.get(end) == Some(&'}') && chars.get(end + 1) != Some(&'}') {
            found.push(chars[start..end].iter().collect());
        }
        index = end;
    }
    found
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
