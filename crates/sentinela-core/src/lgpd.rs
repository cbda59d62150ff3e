// LGPD masking helpers
//
// Masked forms are the only forms that may appear in logs or in the
// occurrence's nome_paciente_mascarado column.

use std::sync::OnceLock;

use regex::Regex;

/// Mask a patient name, keeping the first two characters of each word
///
/// "Joao Silva" -> "Jo** Si***"; single-character words pass through,
/// two-character words keep the first character.
pub fn mask_name(name: &str) -> String {
    name.split_whitespace()
        .map(mask_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn mask_word(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 => chars[0].to_string(),
        2 => format!("{}*", chars[0]),
        n => {
            let visible: String = chars[..2].iter().collect();
            format!("{}{}", visible, "*".repeat(n - 2))
        }
    }
}

/// Mask a phone number for logging: +5511999999999 -> +5511*****9999
///
/// Keeps the first five and last four characters. Numbers too short to mask
/// meaningfully pass through unchanged.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() < 8 {
        return phone.to_string();
    }
    let prefix: String = chars[..5].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    let masked = "*".repeat(chars.len().saturating_sub(9));
    format!("{prefix}{masked}{suffix}")
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{10,14}$").expect("valid phone regex"))
}

/// Validate an E.164 mobile phone number
pub fn validate_phone(phone: &str) -> bool {
    phone_regex().is_match(phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_name() {
        assert_eq!(mask_name("Joao Silva"), "Jo** Si***");
        assert_eq!(mask_name("Maria das Gracas Souza"), "Ma*** da* Gr**** So***");
        assert_eq!(mask_name("Li"), "L*");
        assert_eq!(mask_name("A"), "A");
        assert_eq!(mask_name(""), "");
    }

    #[test]
    fn test_mask_name_multibyte() {
        // Accented characters count as one character, not one byte
        assert_eq!(mask_name("José"), "Jo**");
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+5511999999999"), "+5511*****9999");
        assert_eq!(mask_phone("curto"), "curto");
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("+5511999999999"));
        assert!(validate_phone("+14155552671000"));
        assert!(!validate_phone("5511999999999"));
        assert!(!validate_phone("+0511999999999"));
        assert!(!validate_phone("+55 11 99999-9999"));
        assert!(!validate_phone(""));
    }
}
