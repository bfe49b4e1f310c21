use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::flows::states::{StepId, TurnDisposition};

/// Customer identity key: the digits of the WhatsApp sender number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhoneNumber(pub String);

impl PhoneNumber {
    /// Keeps only ASCII digits, so `+972-50-123 4567` and `972501234567` share a record.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(DomainError::InvalidPhoneNumber(raw.trim().to_string()));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe rendering: first four and last two characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 6 {
            return "***".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{head}***{tail}")
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted per-customer conversation state.
///
/// Collected fields only ever move from `None` to `Some`; the flow engine never
/// clears them. A fresh record starts at [`StepId::Start`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub phone_number: PhoneNumber,
    pub current_step: StepId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub event_address: Option<String>,
    pub event_date: Option<String>,
    pub guest_count: Option<u32>,
    pub age_verified: Option<bool>,
    pub wants_new_order: Option<bool>,
}

impl ConversationRecord {
    pub fn new(phone_number: PhoneNumber) -> Self {
        Self {
            phone_number,
            current_step: StepId::Start,
            first_name: None,
            last_name: None,
            company_name: None,
            event_address: None,
            event_date: None,
            guest_count: None,
            age_verified: None,
            wants_new_order: None,
        }
    }

    pub fn has_name(&self) -> bool {
        present(&self.first_name).is_some() || present(&self.last_name).is_some()
    }

    /// First and last name joined by a space; empty when neither is known.
    pub fn full_name(&self) -> String {
        [present(&self.first_name), present(&self.last_name)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Treats blank strings the same as absent values.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

/// One entry of the append-only turn log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: String,
    pub phone_number: PhoneNumber,
    pub correlation_id: String,
    pub inbound_text: String,
    pub reply_text: String,
    pub from_step: StepId,
    pub to_step: StepId,
    pub disposition: TurnDisposition,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{ConversationRecord, PhoneNumber};
    use crate::errors::DomainError;
    use crate::flows::states::StepId;

    #[test]
    fn phone_numbers_are_normalized_to_digits() {
        let phone = PhoneNumber::parse("+972-50-123 4567").expect("valid phone");
        assert_eq!(phone.as_str(), "972501234567");
        assert_eq!(phone.masked(), "9725***67");
    }

    #[test]
    fn phone_number_without_digits_is_rejected() {
        let error = PhoneNumber::parse("  unknown ").expect_err("no digits");
        assert_eq!(error, DomainError::InvalidPhoneNumber("unknown".to_string()));
    }

    #[test]
    fn short_phone_numbers_are_fully_masked() {
        assert_eq!(PhoneNumber("123".to_string()).masked(), "***");
    }

    #[test]
    fn new_record_starts_empty_at_start_step() {
        let record = ConversationRecord::new(PhoneNumber("123".to_string()));
        assert_eq!(record.current_step, StepId::Start);
        assert!(!record.has_name());
        assert_eq!(record.full_name(), "");
    }

    #[test]
    fn full_name_skips_blank_parts() {
        let mut record = ConversationRecord::new(PhoneNumber("123".to_string()));
        record.first_name = Some("Dana".to_string());
        record.last_name = Some("  ".to_string());
        assert!(record.has_name());
        assert_eq!(record.full_name(), "Dana");

        record.last_name = Some("Cohen Levi".to_string());
        assert_eq!(record.full_name(), "Dana Cohen Levi");
    }
}
