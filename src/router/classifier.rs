//! Prompt classification and complexity estimation.
//!
//! Keyword heuristics behind small strategy traits, so a model-based
//! classifier can replace them without touching selection or scoring.

use crate::state::{Complexity, PromptType};

/// Strategy for deriving a prompt type from raw content.
pub trait PromptClassifier: Send + Sync {
    fn classify(&self, content: &str) -> PromptType;
}

/// Strategy for estimating request complexity from raw content.
pub trait ComplexityEstimator: Send + Sync {
    fn estimate(&self, content: &str) -> Complexity;
}

// First-match wins, checked in this order.
const CODE_KEYWORDS: &[&str] = &["implement", "write a", "create a", "generate", "build a"];
const REFACTOR_KEYWORDS: &[&str] = &["refactor", "optimize", "simplify", "clean up", "restructure"];
const EXPLAIN_KEYWORDS: &[&str] = &["explain", "why", "how", "what does", "describe"];
const REVIEW_KEYWORDS: &[&str] = &["review", "analyze", "audit", "critique"];
const FIX_KEYWORDS: &[&str] = &["fix", "bug", "error", "broken", "crash"];
const TEST_KEYWORDS: &[&str] = &["test", "coverage", "assert", "spec"];

const HIGH_COMPLEXITY_KEYWORDS: &[&str] = &[
    "database",
    "authentication",
    "api",
    "microservice",
    "distributed",
    "concurrent",
    "async",
    "security",
];

const HIGH_LENGTH_THRESHOLD: usize = 500;
const MEDIUM_LENGTH_THRESHOLD: usize = 200;

/// Default keyword classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl PromptClassifier for KeywordClassifier {
    fn classify(&self, content: &str) -> PromptType {
        let lower = content.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if matches(CODE_KEYWORDS) {
            PromptType::Code
        } else if matches(REFACTOR_KEYWORDS) {
            PromptType::Refactor
        } else if matches(EXPLAIN_KEYWORDS) {
            PromptType::Explain
        } else if matches(REVIEW_KEYWORDS) {
            PromptType::Review
        } else if matches(FIX_KEYWORDS) {
            PromptType::Fix
        } else if matches(TEST_KEYWORDS) {
            PromptType::Test
        } else {
            PromptType::Code
        }
    }
}

/// Default keyword-and-length complexity estimator.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordComplexityEstimator;

impl ComplexityEstimator for KeywordComplexityEstimator {
    fn estimate(&self, content: &str) -> Complexity {
        let lower = content.to_lowercase();
        if HIGH_COMPLEXITY_KEYWORDS.iter().any(|k| lower.contains(k))
            || content.len() > HIGH_LENGTH_THRESHOLD
        {
            Complexity::High
        } else if content.len() > MEDIUM_LENGTH_THRESHOLD {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }
}
