//! Built-in Havitush ruleset.
//!
//! Used when no ruleset is configured, when a stored document cannot be
//! decoded, and entry-by-entry when a loaded document is missing a template.

use rust_decimal::Decimal;

use super::{FlowStepDefinition, Messages, RecommendationPolicy, Ruleset, StepKind, SupervisorRules};

pub const FLOW_NAME: &str = "havitush";
pub const INITIAL_STEP_EXISTING: &str = "confirm_name";
pub const INITIAL_STEP_NEW: &str = "collect_name";
pub const TRIGGER_CODE: &str = "חביתוש123";
pub const GREETING: &str = "שלום חביתוש!";
pub const COMPLETION_REPEAT_KEY: &str = "completed_repeat";

pub const MENU_LINES: &[&str] = &[
    "כאן רשימת הפעולות הזמינות:",
    "1. קבלת מידע על לקוחות",
    "2. קבלת מידע על הזמנות",
    "3. סקירת שלבי התהליך הנוכחיים",
    "ענה במספר או תאר את הבקשה שלך ואכוון אותך לשם.",
];

pub const SUMMARY: &[(&str, &str)] = &[
    ("customer_header", "פרטי לקוח:"),
    ("order_header", "פרטי ההזמנה:"),
    ("name_known", "- שם: {{ full_name }}"),
    ("name_missing", "- שם: טרם נמסר"),
    ("company_known", "- חברה: {{ company_name }}"),
    ("company_missing", "- חברה: טרם נמסרה"),
    ("phone", "- מספר טלפון: {{ phone_number }}"),
    ("address_known", "- כתובת אירוע: {{ event_address }}"),
    ("address_missing", "- כתובת אירוע: טרם נמסרה"),
    ("event_date_known", "- תאריך אירוע: {{ event_date }}"),
    ("event_date_missing", "- תאריך אירוע: טרם נבחר"),
    ("guest_count_known", "- מספר משתתפים: {{ guest_count }}"),
    ("guest_count_missing", "- מספר משתתפים: טרם נמסר"),
    (
        "guest_reco_small",
        "- המלצה: להזמנה עד 60 משתתפים ניתן להזמין באתר https://www.havitush.co.il",
    ),
    ("guest_reco_medium", "- המלצה: שירות עצמי (עלות משוערת: {{ price_self_service }} ₪)"),
    ("guest_reco_large", "- המלצה: עמדה מאוישת (עלות משוערת: {{ price_staffed }} ₪)"),
    ("guest_reco_unknown", "- המלצה: נדרש מספר משתתפים כדי להתאים הצעה"),
    ("age_pending", "- סטטוס גילאים: ממתין לאישור"),
    ("age_ok", "- סטטוס גילאים: כל המשתתפים מעל גיל 18"),
    ("age_failed", "- סטטוס גילאים: הזמנה נעצרה (מתחת לגיל 18)"),
    ("order_status_open", "- סטטוס הזמנה: בתהליך פתיחת הזמנה חדשה"),
    ("order_status_declined", "- סטטוס הזמנה: הלקוח לא ביקש לפתוח הזמנה חדשה"),
    ("order_status_unknown", "- סטטוס הזמנה: טרם הוחלט"),
];

pub const PROMPTS: &[(&str, &str)] = &[
    ("confirm_name", "האם השם שלך הוא {{ full_name }}?"),
    ("collect_name", "איך תרצה שנרשום את שמך המלא (שם פרטי ושם משפחה)?"),
    ("ask_new_order", "האם תרצה לבצע הזמנה חדשה של אירוע בחביתוש?"),
    ("collect_company", "מה שם החברה עבור ההזמנה?"),
    ("collect_address", "מהי הכתובת המלאה של האירוע?"),
    ("collect_event_date", "מהו תאריך האירוע (בפורמט YYYY-MM-DD)?"),
    ("collect_guest_count", "כמה משתתפים צפויים להגיע לאירוע?"),
    ("confirm_age", "האם כל המשתתפים באירוע מעל גיל 18?"),
    ("completed_success", "נחזור אליך עם הצעת מחיר מסודרת ביממה הקרובה. תודה שבחרת בחביתוש!"),
    ("completed_no_order", "נשמור את הפרטים שלך ונשמח לעזור כשתרצה להזמין."),
    ("completed_underage", "מצטער, לא ניתן לבצע הזמנה אם אחד מהמשתתפים מתחת לגיל 18."),
    (
        "completed_repeat",
        "הפרטים כבר נקלטו. אם תרצה לפתוח הזמנה חדשה, כתוב זאת ואעדכן בהתאם.",
    ),
];

pub const ERRORS: &[(&str, &str)] = &[
    ("confirm_name_retry", "אנא אשר/י אם זהו שמך או ציין/י את השם הנכון."),
    ("name_retry", "אשמח לשם פרטי ושם משפחה (לדוגמה: 'דנה כהן')."),
    ("guest_count_retry", "לא הצלחתי לקלוט את מספר המשתתפים. אפשר לציין מספר?"),
    ("age_retry", "אנא אשר/י אם כל המשתתפים מעל גיל 18."),
    ("new_order_retry", "לא הבנתי, האם ברצונך לבצע הזמנה חדשה בחביתוש?"),
];

pub const FALLBACK: &str = "נשמח להמשיך לעזור, רק אמור/י לי מה הצעד הבא שתרצה לבצע.";

pub const SMALL_EVENT_BELOW: u32 = 60;
pub const MEDIUM_EVENT_MAX: u32 = 120;
pub const SELF_SERVICE_PRICE_PER_GUEST: i64 = 100;
pub const STAFFED_PRICE_PER_GUEST: i64 = 80;

pub fn ruleset() -> Ruleset {
    Ruleset {
        flow_name: FLOW_NAME.to_string(),
        initial_step_existing: INITIAL_STEP_EXISTING.to_string(),
        initial_step_new: INITIAL_STEP_NEW.to_string(),
        supervisor: SupervisorRules::default(),
        flow: flow(),
        messages: messages(),
        recommendations: RecommendationPolicy::default(),
        rejected: Vec::new(),
    }
}

pub fn messages() -> Messages {
    Messages {
        summary: to_map(SUMMARY),
        prompts: to_map(PROMPTS),
        errors: to_map(ERRORS),
        fallback: Some(FALLBACK.to_string()),
    }
}

pub fn flow() -> Vec<FlowStepDefinition> {
    vec![
        FlowStepDefinition::confirm("confirm_name", "ask_new_order", "collect_name"),
        FlowStepDefinition::linear("collect_name", StepKind::Name, "ask_new_order"),
        FlowStepDefinition::confirm("ask_new_order", "collect_company", "completed_no_order"),
        FlowStepDefinition::linear("collect_company", StepKind::Text, "collect_address"),
        FlowStepDefinition::linear("collect_address", StepKind::Text, "collect_event_date"),
        FlowStepDefinition::linear("collect_event_date", StepKind::Text, "collect_guest_count"),
        FlowStepDefinition::linear("collect_guest_count", StepKind::Integer, "confirm_age"),
        FlowStepDefinition::confirm("confirm_age", "completed", "halted_underage"),
        FlowStepDefinition::terminal("completed", "completed_success"),
        FlowStepDefinition::terminal("completed_no_order", "completed_no_order"),
        FlowStepDefinition::terminal("halted_underage", "completed_underage"),
    ]
}

pub(crate) fn trigger_code() -> String {
    TRIGGER_CODE.to_string()
}

pub(crate) fn greeting() -> String {
    GREETING.to_string()
}

pub(crate) fn menu_lines() -> Vec<String> {
    MENU_LINES.iter().map(|line| (*line).to_string()).collect()
}

pub(crate) fn flow_name() -> String {
    FLOW_NAME.to_string()
}

pub(crate) fn initial_step_existing() -> String {
    INITIAL_STEP_EXISTING.to_string()
}

pub(crate) fn initial_step_new() -> String {
    INITIAL_STEP_NEW.to_string()
}

pub(crate) fn small_event_below() -> u32 {
    SMALL_EVENT_BELOW
}

pub(crate) fn medium_event_max() -> u32 {
    MEDIUM_EVENT_MAX
}

pub(crate) fn self_service_price_per_guest() -> Decimal {
    Decimal::from(SELF_SERVICE_PRICE_PER_GUEST)
}

pub(crate) fn staffed_price_per_guest() -> Decimal {
    Decimal::from(STAFFED_PRICE_PER_GUEST)
}

fn to_map(entries: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
    entries.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect()
}
