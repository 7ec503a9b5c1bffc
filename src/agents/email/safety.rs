//! Safety and policy checks for email drafts.
//!
//! Five independent checks run after drafting and again after every
//! update: PII, tone, recipients, length, subject. Length is advisory
//! only; the overall verdict is the conjunction of the other four.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::EmailDraft;

static SSN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn regex")
});

static CREDIT_CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").expect("credit card regex")
});

static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|pwd|passwd)[\s:=]+\S+").expect("password regex")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email regex")
});

/// Basic inappropriate-language indicators.
const TOXIC_KEYWORDS: &[&str] = &[
    "hate", "kill", "die", "stupid", "idiot", "moron", "damn", "hell", "crap", "shut up",
];

/// Domains that only ever receive test traffic.
const BLOCKED_DOMAINS: &[&str] = &["test.com", "spam.com", "invalid.com"];

/// Subject-line spam indicators.
const SPAM_WORDS: &[&str] = &["free", "click here", "act now", "$$$", "winner"];

/// Recipient count above which a warning is raised.
const RECIPIENT_WARN_THRESHOLD: usize = 10;

/// Overall risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Aggregated verdict across all checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub passed: bool,
    /// check name -> passed
    pub checks: BTreeMap<String, bool>,
    pub flags: Vec<String>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

impl SafetyCheckResult {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Outcome of one individual check.
struct CheckOutcome {
    passed: bool,
    flags: Vec<String>,
    recommendations: Vec<String>,
}

/// Performs safety and policy checks on email drafts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGuard;

impl SafetyGuard {
    pub fn new() -> Self {
        Self
    }

    /// Run all checks and aggregate the verdict.
    pub fn check_draft(&self, draft: &EmailDraft) -> SafetyCheckResult {
        let pii = check_pii(draft);
        let toxic = check_toxic(draft);
        let recipients = check_recipients(draft);
        let length = check_length(draft);
        let subject = check_subject(draft);

        let mut checks = BTreeMap::new();
        let mut flags = Vec::new();
        let mut recommendations = Vec::new();
        for (name, outcome) in [
            ("pii_check", &pii),
            ("toxic_check", &toxic),
            ("recipient_check", &recipients),
            ("length_check", &length),
            ("subject_check", &subject),
        ] {
            checks.insert(name.to_owned(), outcome.passed);
            flags.extend(outcome.flags.iter().cloned());
            recommendations.extend(outcome.recommendations.iter().cloned());
        }

        // Length is advisory only.
        let passed = pii.passed && toxic.passed && recipients.passed && subject.passed;
        let risk_level = risk_level(&checks, &flags);

        info!(
            draft_id = %draft.id,
            passed,
            risk = ?risk_level,
            flags = flags.len(),
            "safety check complete"
        );

        SafetyCheckResult {
            passed,
            checks,
            flags,
            risk_level,
            recommendations,
        }
    }
}

fn check_pii(draft: &EmailDraft) -> CheckOutcome {
    let combined = format!("{} {}", draft.subject, draft.body);
    let mut flags = Vec::new();
    let mut recommendations = Vec::new();

    for (name, re) in [
        ("SSN", &*SSN_RE),
        ("CREDIT_CARD", &*CREDIT_CARD_RE),
        ("PASSWORD", &*PASSWORD_RE),
    ] {
        let count = re.find_iter(&combined).count();
        if count > 0 {
            flags.push(format!("Potential {name} detected: {count} occurrence(s)"));
            recommendations.push(format!("Review and remove {name} before sending"));
        }
    }

    CheckOutcome {
        passed: flags.is_empty(),
        flags,
        recommendations,
    }
}

fn check_toxic(draft: &EmailDraft) -> CheckOutcome {
    let combined = format!("{} {}", draft.subject, draft.body).to_lowercase();
    let mut flags = Vec::new();
    let mut recommendations = Vec::new();

    let found: Vec<&str> = TOXIC_KEYWORDS
        .iter()
        .copied()
        .filter(|word| combined.contains(word))
        .collect();
    if !found.is_empty() {
        let shown: Vec<&str> = found.iter().copied().take(3).collect();
        flags.push(format!(
            "Potentially inappropriate language detected: {}",
            shown.join(", ")
        ));
        recommendations.push("Review tone and language for professionalism".to_owned());
    }

    let subject = &draft.subject;
    let is_all_caps = subject.len() > 10
        && subject.chars().any(|c| c.is_alphabetic())
        && !subject.chars().any(|c| c.is_lowercase());
    if is_all_caps {
        flags.push("Subject line in ALL CAPS may appear aggressive".to_owned());
        recommendations.push("Consider using title case for subject".to_owned());
    }

    CheckOutcome {
        passed: flags.is_empty(),
        flags,
        recommendations,
    }
}

fn check_recipients(draft: &EmailDraft) -> CheckOutcome {
    let mut flags = Vec::new();
    let mut recommendations = Vec::new();

    if !is_valid_email(&draft.to) {
        return CheckOutcome {
            passed: false,
            flags: vec![format!("Invalid recipient email: {}", draft.to)],
            recommendations: vec!["Provide a valid recipient email".to_owned()],
        };
    }

    let domain = draft.to.rsplit('@').next().unwrap_or_default().to_lowercase();
    if BLOCKED_DOMAINS.contains(&domain.as_str()) {
        flags.push(format!("Blocked domain: {domain}"));
        recommendations.push(format!("Cannot send to {domain} domain"));
    }

    for cc in draft.cc.iter().flatten() {
        if !is_valid_email(cc) {
            flags.push(format!("Invalid CC email: {cc}"));
        }
    }
    for bcc in draft.bcc.iter().flatten() {
        if !is_valid_email(bcc) {
            flags.push(format!("Invalid BCC email: {bcc}"));
        }
    }

    let total = 1usize
        .saturating_add(draft.cc.as_ref().map_or(0, Vec::len))
        .saturating_add(draft.bcc.as_ref().map_or(0, Vec::len));
    if total > RECIPIENT_WARN_THRESHOLD {
        flags.push(format!("Large recipient count: {total}"));
        recommendations.push("Consider using a mailing list for bulk emails".to_owned());
    }

    // Only invalid addresses and blocked domains fail the check; the
    // recipient-count flag is a warning.
    let passed = !flags
        .iter()
        .any(|f| f.contains("Invalid") || f.contains("Blocked"));
    CheckOutcome {
        passed,
        flags,
        recommendations,
    }
}

fn check_length(draft: &EmailDraft) -> CheckOutcome {
    let mut flags = Vec::new();
    let mut recommendations = Vec::new();
    let len = draft.body.len();

    if len < 10 {
        flags.push("Email body is very short (< 10 characters)".to_owned());
        recommendations.push("Consider adding more context to your message".to_owned());
    } else if len > 5000 {
        flags.push("Email body is very long (> 5000 characters)".to_owned());
        recommendations
            .push("Consider breaking into multiple emails or attaching a document".to_owned());
    }

    // Length warnings never block sending.
    CheckOutcome {
        passed: true,
        flags,
        recommendations,
    }
}

fn check_subject(draft: &EmailDraft) -> CheckOutcome {
    let subject = draft.subject.trim();
    let mut flags = Vec::new();
    let mut recommendations = Vec::new();

    if subject.is_empty() {
        return CheckOutcome {
            passed: false,
            flags: vec!["Subject line is empty".to_owned()],
            recommendations: vec!["Add a descriptive subject line".to_owned()],
        };
    }

    if subject.len() < 5 {
        flags.push("Subject line is very short".to_owned());
        recommendations.push("Consider a more descriptive subject".to_owned());
    } else if subject.len() > 100 {
        flags.push("Subject line is very long (> 100 characters)".to_owned());
        recommendations.push("Shorten subject line for better readability".to_owned());
    }

    let subject_lower = subject.to_lowercase();
    let found: Vec<&str> = SPAM_WORDS
        .iter()
        .copied()
        .filter(|word| subject_lower.contains(word))
        .collect();
    if !found.is_empty() {
        flags.push(format!(
            "Subject contains spam-like words: {}",
            found.join(", ")
        ));
        recommendations.push("Avoid spam trigger words in subject".to_owned());
    }

    CheckOutcome {
        passed: true,
        flags,
        recommendations,
    }
}

fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && EMAIL_RE.is_match(email)
}

/// high: ≥2 failed checks or ≥5 flags; medium: 1 failed or ≥3 flags.
fn risk_level(checks: &BTreeMap<String, bool>, flags: &[String]) -> RiskLevel {
    let failed = checks.values().filter(|passed| !**passed).count();
    if failed >= 2 || flags.len() >= 5 {
        RiskLevel::High
    } else if failed == 1 || flags.len() >= 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
