use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a conversation in the flow graph.
///
/// The well-known steps are closed variants so the engine can dispatch on them
/// at compile time. Step ids that only exist in a custom ruleset land in
/// [`StepId::Other`] and are handled generically (terminal repeat or fallback).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepId {
    Start,
    SupervisorMenu,
    ConfirmName,
    CollectName,
    AskNewOrder,
    CollectCompany,
    CollectAddress,
    CollectEventDate,
    CollectGuestCount,
    ConfirmAge,
    Completed,
    CompletedNoOrder,
    HaltedUnderage,
    Other(String),
}

impl StepId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::SupervisorMenu => "havitush_menu",
            Self::ConfirmName => "confirm_name",
            Self::CollectName => "collect_name",
            Self::AskNewOrder => "ask_new_order",
            Self::CollectCompany => "collect_company",
            Self::CollectAddress => "collect_address",
            Self::CollectEventDate => "collect_event_date",
            Self::CollectGuestCount => "collect_guest_count",
            Self::ConfirmAge => "confirm_age",
            Self::Completed => "completed",
            Self::CompletedNoOrder => "completed_no_order",
            Self::HaltedUnderage => "halted_underage",
            Self::Other(id) => id.as_str(),
        }
    }

    /// Virtual steps are not part of the flow graph; the next message re-routes.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Start | Self::SupervisorMenu)
    }

    pub fn is_builtin_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedNoOrder | Self::HaltedUnderage)
    }

    /// Prompt key used when the ruleset has no definition for this step.
    pub fn default_prompt_key(&self) -> Option<&'static str> {
        match self {
            Self::ConfirmName => Some("confirm_name"),
            Self::CollectName => Some("collect_name"),
            Self::AskNewOrder => Some("ask_new_order"),
            Self::CollectCompany => Some("collect_company"),
            Self::CollectAddress => Some("collect_address"),
            Self::CollectEventDate => Some("collect_event_date"),
            Self::CollectGuestCount => Some("collect_guest_count"),
            Self::ConfirmAge => Some("confirm_age"),
            Self::Completed => Some("completed_success"),
            Self::CompletedNoOrder => Some("completed_no_order"),
            Self::HaltedUnderage => Some("completed_underage"),
            Self::Start | Self::SupervisorMenu | Self::Other(_) => None,
        }
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        match value.trim() {
            "start" => Self::Start,
            "havitush_menu" => Self::SupervisorMenu,
            "confirm_name" => Self::ConfirmName,
            "collect_name" => Self::CollectName,
            "ask_new_order" => Self::AskNewOrder,
            "collect_company" => Self::CollectCompany,
            "collect_address" => Self::CollectAddress,
            "collect_event_date" => Self::CollectEventDate,
            "collect_guest_count" => Self::CollectGuestCount,
            "confirm_age" => Self::ConfirmAge,
            "completed" => Self::Completed,
            "completed_no_order" => Self::CompletedNoOrder,
            "halted_underage" => Self::HaltedUnderage,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<StepId> for String {
    fn from(value: StepId) -> Self {
        match value {
            StepId::Other(id) => id,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDisposition {
    SupervisorMenu,
    Routed,
    Advanced,
    Retry,
    TerminalRepeat,
    Fallback,
}

impl TurnDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupervisorMenu => "supervisor_menu",
            Self::Routed => "routed",
            Self::Advanced => "advanced",
            Self::Retry => "retry",
            Self::TerminalRepeat => "terminal_repeat",
            Self::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for TurnDisposition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "supervisor_menu" => Ok(Self::SupervisorMenu),
            "routed" => Ok(Self::Routed),
            "advanced" => Ok(Self::Advanced),
            "retry" => Ok(Self::Retry),
            "terminal_repeat" => Ok(Self::TerminalRepeat),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown turn disposition `{other}`")),
        }
    }
}

/// Result of a single state-machine transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub from: StepId,
    pub to: StepId,
    pub disposition: TurnDisposition,
    pub reply: String,
}

#[cfg(test)]
mod tests {
    use super::{StepId, TurnDisposition};

    #[test]
    fn step_ids_round_trip_through_their_wire_names() {
        for step in [
            StepId::Start,
            StepId::SupervisorMenu,
            StepId::ConfirmName,
            StepId::CollectGuestCount,
            StepId::HaltedUnderage,
        ] {
            assert_eq!(StepId::from(step.as_str()), step);
        }
        assert_eq!(StepId::from("vip_lounge"), StepId::Other("vip_lounge".to_string()));
    }

    #[test]
    fn step_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&StepId::CollectEventDate).expect("serialize");
        assert_eq!(json, "\"collect_event_date\"");

        let parsed: StepId = serde_json::from_str("\"havitush_menu\"").expect("deserialize");
        assert_eq!(parsed, StepId::SupervisorMenu);
    }

    #[test]
    fn terminal_steps_have_completion_prompts() {
        assert_eq!(StepId::Completed.default_prompt_key(), Some("completed_success"));
        assert_eq!(StepId::HaltedUnderage.default_prompt_key(), Some("completed_underage"));
        assert!(StepId::CompletedNoOrder.is_builtin_terminal());
        assert!(!StepId::ConfirmAge.is_builtin_terminal());
        assert!(StepId::Start.is_virtual());
    }

    #[test]
    fn disposition_parses_its_own_name() {
        let parsed: TurnDisposition = "terminal_repeat".parse().expect("parse");
        assert_eq!(parsed, TurnDisposition::TerminalRepeat);
        assert!("exploded".parse::<TurnDisposition>().is_err());
    }
}
