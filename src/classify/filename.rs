//! Filename tier
//!
//! Tokenizes the file stem and matches tokens against a keyword table. Every
//! matched keyword is an independent signal, so two keywords that agree on a
//! category add up.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::{FileDescriptor, Signal, SignalSource};

/// One keyword rule
#[derive(Debug, Clone, Copy)]
pub struct KeywordRule {
    pub keyword: &'static str,
    pub category: &'static str,
    pub confidence: f64,
}

const fn rule(keyword: &'static str, category: &'static str, confidence: f64) -> KeywordRule {
    KeywordRule {
        keyword,
        category,
        confidence,
    }
}

pub const KEYWORD_RULES: &[KeywordRule] = &[
    // Legal
    rule("contract", "legal/contracts", 0.60),
    rule("agreement", "legal/contracts", 0.50),
    rule("nda", "legal/contracts", 0.50),
    rule("lease", "legal/contracts", 0.45),
    rule("license", "legal", 0.35),
    // Finance
    rule("invoice", "finance/invoices", 0.60),
    rule("receipt", "finance/receipts", 0.55),
    rule("statement", "finance/statements", 0.40),
    rule("tax", "finance/taxes", 0.45),
    rule("w2", "finance/taxes", 0.50),
    rule("1099", "finance/taxes", 0.50),
    rule("payslip", "finance/payroll", 0.50),
    rule("paystub", "finance/payroll", 0.50),
    // Career
    rule("resume", "career/resumes", 0.60),
    rule("cv", "career/resumes", 0.45),
    // Images
    rule("screenshot", "images/screenshots", 0.60),
    rule("photo", "images/photos", 0.45),
    rule("img", "images/photos", 0.30),
    rule("dsc", "images/photos", 0.40),
    // Documents
    rule("report", "documents/reports", 0.35),
    rule("manual", "documents/manuals", 0.40),
    rule("slides", "documents/presentations", 0.40),
    rule("presentation", "documents/presentations", 0.40),
    rule("certificate", "documents/certificates", 0.45),
    // Software
    rule("installer", "software/installers", 0.50),
    rule("setup", "software/installers", 0.40),
];

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("token pattern is valid"));

/// Lowercase alphanumeric tokens of a file stem, in order, without repeats
pub fn tokenize(stem: &str) -> Vec<String> {
    let lower = stem.to_lowercase();
    let mut seen = HashSet::new();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

fn matches_keyword(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    // Plurals and simple suffixes ("contracts", "invoices")
    keyword.len() >= 4 && token.starts_with(keyword) && token.len() <= keyword.len() + 2
}

pub struct FilenameClassifier {
    rules: &'static [KeywordRule],
}

impl Default for FilenameClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FilenameClassifier {
    pub fn new() -> Self {
        Self {
            rules: KEYWORD_RULES,
        }
    }

    /// One signal per matched keyword. A keyword counts once per file.
    pub fn signals(&self, file: &FileDescriptor) -> Vec<Signal> {
        let tokens = tokenize(&file.stem());

        self.rules
            .iter()
            .filter(|rule| tokens.iter().any(|t| matches_keyword(t, rule.keyword)))
            .map(|rule| {
                Signal::new(
                    SignalSource::Filename,
                    rule.category,
                    rule.confidence,
                    format!("filename keyword '{}'", rule.keyword),
                )
            })
            .collect()
    }

    /// Learning keys derived from the name: `name:<token>` and `ext:<ext>`
    pub fn signal_keys(&self, file: &FileDescriptor) -> Vec<String> {
        let mut keys: Vec<String> = tokenize(&file.stem())
            .into_iter()
            .filter(|t| t.len() >= 2 && !t.chars().all(|c| c.is_ascii_digit()))
            .map(|t| format!("name:{}", t))
            .collect();
        if let Some(ext) = file.extension() {
            keys.push(format!("ext:{}", ext));
        }
        keys
    }
}
