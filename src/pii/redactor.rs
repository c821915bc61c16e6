//! Replace detected PII spans with bracketed placeholder tags.

use super::detector::{PiiMatch, PiiType};

fn tag_for(pii_type: PiiType) -> &'static str {
    match pii_type {
        PiiType::Email => "[EMAIL]",
        PiiType::Phone => "[PHONE]",
        PiiType::Ssn => "[SSN]",
        PiiType::CreditCard => "[CREDIT_CARD]",
        PiiType::IpAddress => "[IP_ADDRESS]",
        PiiType::DateOfBirth => "[DATE_OF_BIRTH]",
        PiiType::ApiKey => "[API_KEY]",
        PiiType::Password => "[PASSWORD]",
        PiiType::Name => "[NAME]",
        PiiType::Address => "[ADDRESS]",
    }
}

pub struct PiiRedactor;

impl PiiRedactor {
    /// Replace every match's span with its bracketed tag, rightmost
    /// first so earlier offsets stay valid.
    pub fn redact(text: &str, matches: &[PiiMatch]) -> String {
        let mut ordered: Vec<&PiiMatch> = matches.iter().collect();
        ordered.sort_by_key(|m| std::cmp::Reverse(m.start));
        let mut result = text.to_string();
        for m in ordered {
            if m.end <= result.len() {
                result.replace_range(m.start..m.end, tag_for(m.pii_type));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pii::detector::PiiDetector;

    #[test]
    fn redact_replaces_email_with_bracketed_tag() {
        let text = "email me at bob@acme.com today";
        let matches = PiiDetector::scan(text);
        let redacted = PiiRedactor::redact(text, &matches);
        assert_eq!(redacted, "email me at [EMAIL] today");
    }
}
