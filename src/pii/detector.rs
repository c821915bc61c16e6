//! Regex- and heuristic-based PII detection with per-type confidence
//! scoring and Luhn-validated credit card matching.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    DateOfBirth,
    ApiKey,
    Password,
    Name,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

pub fn risk_level_for(pii_type: PiiType) -> RiskLevel {
    match pii_type {
        PiiType::Email | PiiType::Phone => RiskLevel::Medium,
        PiiType::Ssn | PiiType::CreditCard => RiskLevel::High,
        PiiType::IpAddress | PiiType::Name => RiskLevel::Low,
        PiiType::ApiKey | PiiType::Password => RiskLevel::Critical,
        PiiType::DateOfBirth | PiiType::Address => RiskLevel::Medium,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiMatch {
    pub pii_type: PiiType,
    pub start: usize,
    pub end: usize,
    pub matched_text: String,
    pub confidence: f64,
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap());
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CREDIT_CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());
static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());
static IPV6_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").unwrap());
static DOB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\b").unwrap());
static API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(AKIA[0-9A-Z]{16}|gh[pousr]_[A-Za-z0-9]{36}|sk-[A-Za-z0-9]{20,})\b").unwrap());
static PASSWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)password\s*[:=]\s*\S+").unwrap());
static NAME_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(mr|mrs|ms|dr|dear|attn|attention)\.?\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)?)").unwrap()
});

const COMMON_EMAIL_DOMAINS: &[&str] = &["gmail.com", "yahoo.com", "outlook.com", "hotmail.com"];

pub struct PiiDetector;

impl PiiDetector {
    pub fn scan(text: &str) -> Vec<PiiMatch> {
        let mut matches = Vec::new();
        matches.extend(Self::scan_email(text));
        matches.extend(Self::scan_phone(text));
        matches.extend(Self::scan_ssn(text));
        matches.extend(Self::scan_credit_card(text));
        matches.extend(Self::scan_ip(text));
        matches.extend(Self::scan_dob(text));
        matches.extend(Self::scan_api_key(text));
        matches.extend(Self::scan_password(text));
        matches.extend(Self::scan_names(text));
        Self::remove_overlaps(matches)
    }

    fn scan_email(text: &str) -> Vec<PiiMatch> {
        EMAIL_RE
            .find_iter(text)
            .map(|m| {
                let domain = m.as_str().rsplit('@').next().unwrap_or("").to_lowercase();
                let mut confidence: f64 = 0.8;
                if COMMON_EMAIL_DOMAINS.iter().any(|d| domain == *d) {
                    confidence += 0.1;
                }
                PiiMatch {
                    pii_type: PiiType::Email,
                    start: m.start(),
                    end: m.end(),
                    matched_text: m.as_str().to_string(),
                    confidence: confidence.min(1.0),
                }
            })
            .collect()
    }

    fn scan_phone(text: &str) -> Vec<PiiMatch> {
        PHONE_RE
            .find_iter(text)
            .map(|m| {
                let digits = m.as_str().chars().filter(|c| c.is_ascii_digit()).count();
                let mut confidence: f64 = 0.8;
                if digits < 10 {
                    confidence -= 0.2;
                }
                PiiMatch {
                    pii_type: PiiType::Phone,
                    start: m.start(),
                    end: m.end(),
                    matched_text: m.as_str().to_string(),
                    confidence: confidence.max(0.0),
                }
            })
            .collect()
    }

    fn scan_ssn(text: &str) -> Vec<PiiMatch> {
        let lowered = text.to_lowercase();
        SSN_RE
            .find_iter(text)
            .map(|m| {
                let mut confidence: f64 = 0.8;
                if lowered.contains("ssn") || lowered.contains("social") || lowered.contains("security") {
                    confidence += 0.15;
                }
                PiiMatch {
                    pii_type: PiiType::Ssn,
                    start: m.start(),
                    end: m.end(),
                    matched_text: m.as_str().to_string(),
                    confidence: confidence.min(1.0),
                }
            })
            .collect()
    }

    fn scan_credit_card(text: &str) -> Vec<PiiMatch> {
        CREDIT_CARD_RE
            .find_iter(text)
            .filter_map(|m| {
                let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() < 13 || digits.len() > 19 {
                    return None;
                }
                let mut confidence: f64 = 0.8;
                if luhn_check(&digits) {
                    confidence += 0.15;
                } else {
                    confidence -= 0.3;
                }
                if confidence <= 0.3 {
                    return None;
                }
                Some(PiiMatch {
                    pii_type: PiiType::CreditCard,
                    start: m.start(),
                    end: m.end(),
                    matched_text: m.as_str().to_string(),
                    confidence: confidence.clamp(0.0, 1.0),
                })
            })
            .collect()
    }

    fn scan_ip(text: &str) -> Vec<PiiMatch> {
        let mut matches: Vec<PiiMatch> = IPV4_RE
            .find_iter(text)
            .map(|m| PiiMatch {
                pii_type: PiiType::IpAddress,
                start: m.start(),
                end: m.end(),
                matched_text: m.as_str().to_string(),
                confidence: 0.8,
            })
            .collect();
        matches.extend(IPV6_RE.find_iter(text).map(|m| PiiMatch {
            pii_type: PiiType::IpAddress,
            start: m.start(),
            end: m.end(),
            matched_text: m.as_str().to_string(),
            confidence: 0.8,
        }));
        matches
    }

    fn scan_dob(text: &str) -> Vec<PiiMatch> {
        DOB_RE
            .find_iter(text)
            .map(|m| PiiMatch {
                pii_type: PiiType::DateOfBirth,
                start: m.start(),
                end: m.end(),
                matched_text: m.as_str().to_string(),
                confidence: 0.8,
            })
            .collect()
    }

    fn scan_api_key(text: &str) -> Vec<PiiMatch> {
        API_KEY_RE
            .find_iter(text)
            .map(|m| PiiMatch {
                pii_type: PiiType::ApiKey,
                start: m.start(),
                end: m.end(),
                matched_text: m.as_str().to_string(),
                confidence: 0.95,
            })
            .collect()
    }

    fn scan_password(text: &str) -> Vec<PiiMatch> {
        PASSWORD_RE
            .find_iter(text)
            .map(|m| PiiMatch {
                pii_type: PiiType::Password,
                start: m.start(),
                end: m.end(),
                matched_text: m.as_str().to_string(),
                confidence: 0.8,
            })
            .collect()
    }

    fn scan_names(text: &str) -> Vec<PiiMatch> {
        NAME_KEYWORD_RE
            .captures_iter(text)
            .filter_map(|c| {
                let name = c.get(2)?;
                Some(PiiMatch {
                    pii_type: PiiType::Name,
                    start: name.start(),
                    end: name.end(),
                    matched_text: name.as_str().to_string(),
                    confidence: 0.6,
                })
            })
            .collect()
    }

    /// Keep the higher-confidence match whenever two spans overlap.
    fn remove_overlaps(mut matches: Vec<PiiMatch>) -> Vec<PiiMatch> {
        matches.sort_by_key(|m| m.start);
        let mut result: Vec<PiiMatch> = Vec::new();
        for m in matches {
            if let Some(last) = result.last() {
                if m.start < last.end {
                    if m.confidence > last.confidence {
                        result.pop();
                        result.push(m);
                    }
                    continue;
                }
            }
            result.push(m);
        }
        result
    }
}

fn luhn_check(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut alternate = false;
    for c in digits.chars().rev() {
        let mut d = match c.to_digit(10) {
            Some(d) => d,
            None => return false,
        };
        if alternate {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        alternate = !alternate;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_an_email_at_the_correct_offsets() {
        let matches = PiiDetector::scan("email me at bob@acme.com please");
        let email = matches.iter().find(|m| m.pii_type == PiiType::Email).unwrap();
        assert_eq!(&"email me at bob@acme.com please"[email.start..email.end], "bob@acme.com");
    }

    #[test]
    fn luhn_check_rejects_invalid_card_numbers() {
        let matches = PiiDetector::scan("card 1234 5678 9012 3456");
        assert!(matches.iter().all(|m| m.pii_type != PiiType::CreditCard));
    }

    #[test]
    fn luhn_check_accepts_a_valid_test_card_number() {
        let matches = PiiDetector::scan("card 4532015112830366");
        assert!(matches.iter().any(|m| m.pii_type == PiiType::CreditCard));
    }

    #[test]
    fn overlapping_matches_keep_the_higher_confidence_one() {
        let matches = PiiDetector::scan("Dr. Smith's ssn is 123-45-6789");
        let ssn_count = matches.iter().filter(|m| m.pii_type == PiiType::Ssn).count();
        assert_eq!(ssn_count, 1);
    }
}
