use rust_decimal::Decimal;

use crate::domain::conversation::{present, ConversationRecord};
use crate::ruleset::{RecommendationPolicy, TemplateRenderer, TemplateVars};

/// Offer tier suggested for the collected guest count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuestRecommendation {
    Unknown,
    /// Small events order directly on the website.
    SelfServiceOnline,
    SelfService { price: Decimal },
    StaffedBooth { price: Decimal },
}

impl GuestRecommendation {
    pub fn summary_key(&self) -> &'static str {
        match self {
            Self::Unknown => "guest_reco_unknown",
            Self::SelfServiceOnline => "guest_reco_small",
            Self::SelfService { .. } => "guest_reco_medium",
            Self::StaffedBooth { .. } => "guest_reco_large",
        }
    }
}

impl RecommendationPolicy {
    pub fn recommend(&self, guest_count: Option<u32>) -> GuestRecommendation {
        let Some(count) = guest_count else {
            return GuestRecommendation::Unknown;
        };
        if count < self.small_below {
            GuestRecommendation::SelfServiceOnline
        } else if count <= self.medium_max {
            GuestRecommendation::SelfService { price: self.self_service_price(count) }
        } else {
            GuestRecommendation::StaffedBooth { price: self.staffed_price(count) }
        }
    }

    pub fn self_service_price(&self, guest_count: u32) -> Decimal {
        (Decimal::from(guest_count) * self.self_service_price_per_guest).normalize()
    }

    pub fn staffed_price(&self, guest_count: u32) -> Decimal {
        (Decimal::from(guest_count) * self.staffed_price_per_guest).normalize()
    }
}

/// Renders the customer and order blocks that prefix every reply.
pub struct SummaryRenderer<'a> {
    templates: &'a TemplateRenderer,
    policy: &'a RecommendationPolicy,
}

impl<'a> SummaryRenderer<'a> {
    pub fn new(templates: &'a TemplateRenderer, policy: &'a RecommendationPolicy) -> Self {
        Self { templates, policy }
    }

    /// Record fields plus price estimates for the current guest count.
    pub fn vars(&self, record: &ConversationRecord) -> TemplateVars {
        let vars = TemplateVars::for_record(record);
        match record.guest_count {
            Some(count) => vars
                .with("price_self_service", self.policy.self_service_price(count))
                .with("price_staffed", self.policy.staffed_price(count)),
            None => vars.with("price_self_service", "").with("price_staffed", ""),
        }
    }

    pub fn render(&self, record: &ConversationRecord) -> String {
        self.render_with(record, &self.vars(record))
    }

    pub fn render_with(&self, record: &ConversationRecord, vars: &TemplateVars) -> String {
        let line = |key: &str| {
            self.templates.render(&format!("summary.{key}"), vars).unwrap_or_default()
        };
        let known_or_missing = |value: Option<&str>, known: &str, missing: &str| {
            if value.is_some() {
                line(known)
            } else {
                line(missing)
            }
        };

        let name = if record.has_name() { line("name_known") } else { line("name_missing") };
        let guest_count = match record.guest_count {
            Some(_) => line("guest_count_known"),
            None => line("guest_count_missing"),
        };
        let recommendation = line(self.policy.recommend(record.guest_count).summary_key());
        let age = match record.age_verified {
            None => line("age_pending"),
            Some(true) => line("age_ok"),
            Some(false) => line("age_failed"),
        };
        let order_status = match record.wants_new_order {
            Some(true) => line("order_status_open"),
            Some(false) => line("order_status_declined"),
            None => line("order_status_unknown"),
        };

        [
            line("customer_header"),
            name,
            line("phone"),
            known_or_missing(present(&record.company_name), "company_known", "company_missing"),
            known_or_missing(present(&record.event_address), "address_known", "address_missing"),
            String::new(),
            line("order_header"),
            known_or_missing(present(&record.event_date), "event_date_known", "event_date_missing"),
            guest_count,
            recommendation,
            age,
            order_status,
        ]
        .join("\n")
    }
}
