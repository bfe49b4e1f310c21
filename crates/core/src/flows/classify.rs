//! Pure input classifiers used by the flow engine.

pub const POSITIVE_KEYWORDS: &[&str] = &["כן", "בוודאי", "כמובן", "בטח", "yes", "y"];
pub const NEGATIVE_KEYWORDS: &[&str] = &["לא", "no", "לאו", "לא רוצה"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Affirmation {
    Positive,
    Negative,
    Ambiguous,
}

/// Case-insensitive substring match; positive keywords win over negative ones.
pub fn classify_affirmation(message: &str) -> Affirmation {
    let normalized = message.trim().to_lowercase();
    if POSITIVE_KEYWORDS.iter().any(|keyword| normalized.contains(keyword)) {
        Affirmation::Positive
    } else if NEGATIVE_KEYWORDS.iter().any(|keyword| normalized.contains(keyword)) {
        Affirmation::Negative
    } else {
        Affirmation::Ambiguous
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullName {
    pub first_name: String,
    pub last_name: String,
}

/// First token is the first name; the remaining tokens, single-space joined,
/// are the last name. Fewer than two tokens is not a name.
pub fn extract_full_name(message: &str) -> Option<FullName> {
    let mut tokens = message.split_whitespace();
    let first_name = tokens.next()?;
    let last_name = tokens.collect::<Vec<_>>().join(" ");
    if last_name.is_empty() {
        return None;
    }
    Some(FullName { first_name: first_name.to_string(), last_name })
}

/// Zero code points of the decimal digit blocks accepted in a guest count:
/// ASCII, Arabic-Indic, Extended Arabic-Indic, the Indic scripts, Thai, Lao,
/// Tibetan, Myanmar, Khmer, Mongolian and fullwidth forms.
const DIGIT_ZEROS: &[u32] = &[
    0x0030, 0x0660, 0x06F0, 0x07C0, 0x0966, 0x09E6, 0x0A66, 0x0AE6, 0x0B66, 0x0BE6, 0x0C66,
    0x0CE6, 0x0D66, 0x0DE6, 0x0E50, 0x0ED0, 0x0F20, 0x1040, 0x1090, 0x17E0, 0x1810, 0xFF10,
];

fn decimal_digit(c: char) -> Option<u32> {
    let code = u32::from(c);
    DIGIT_ZEROS.iter().find_map(|zero| code.checked_sub(*zero).filter(|digit| *digit < 10))
}

/// First maximal run of decimal digits, in any of the scripts above (so `٨٥`
/// reads as 85). A run too large for `u32` is rejected.
pub fn extract_guest_count(message: &str) -> Option<u32> {
    let mut digits = message
        .chars()
        .skip_while(|c| decimal_digit(*c).is_none())
        .map_while(decimal_digit)
        .peekable();
    digits.peek()?;
    digits.try_fold(0u32, |count, digit| count.checked_mul(10)?.checked_add(digit))
}
