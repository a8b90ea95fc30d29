//! Order identifier extraction, including reconstruction of identifiers that
//! the recognizer wrapped across two lines.

use chrono::{Datelike, Local};
use tracing::trace;

use super::patterns::{
    ALNUM_RUN, ALNUM_TOKEN, DIGIT_RUN, LABELED_ORDER_NUMBERS, LEADING_ALNUM, LEADING_ALNUM_TAIL,
    ORDER_LABEL_ANY, TRAILING_ALNUM_HEAD,
};
use super::{ExtractionMatch, FieldExtractor};
use crate::models::config::ExtractionConfig;

/// One strategy for locating an order identifier. Stages run in the order
/// listed in [`OrderRules::stages`]; the first stage with a candidate wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStage {
    /// Label and full identifier on one line.
    Labeled,
    /// Long digit or alphanumeric run anywhere.
    Unanchored,
    /// Labeled line ending in a truncated token, completed by the next line.
    LabeledContinuation,
    /// Any adjacent line pair whose join looks like a numeric identifier.
    Continuation,
}

impl OrderStage {
    pub const ALL: [OrderStage; 4] = [
        OrderStage::Labeled,
        OrderStage::Unanchored,
        OrderStage::LabeledContinuation,
        OrderStage::Continuation,
    ];

    fn confidence(self) -> f32 {
        match self {
            OrderStage::Labeled => 0.95,
            OrderStage::Unanchored => 0.8,
            OrderStage::LabeledContinuation => 0.7,
            OrderStage::Continuation => 0.6,
        }
    }
}

/// Tunable constants for order identifier extraction.
#[derive(Debug, Clone)]
pub struct OrderRules {
    /// Stages to run, highest priority first.
    pub stages: Vec<OrderStage>,
    /// Shortest accepted identifier.
    pub min_len: usize,
    /// Longest accepted identifier.
    pub max_len: usize,
    /// Shortest trailing token considered a truncated identifier head.
    pub min_head_len: usize,
    /// Minimum share of ASCII digits for [`OrderStage::Continuation`].
    pub min_digit_ratio: f64,
    /// Prefixes of real identifiers that override year rejection in
    /// [`OrderStage::Continuation`].
    pub known_prefixes: Vec<String>,
    /// Prefixes marking a recognized timestamp rather than an identifier.
    pub rejected_year_prefixes: Vec<String>,
}

impl OrderRules {
    /// Rules rejecting the current year and the two before it.
    pub fn new() -> Self {
        Self::with_reference_year(Local::now().year(), 3)
    }

    /// Rules rejecting `window` years ending at `year`.
    pub fn with_reference_year(year: i32, window: u32) -> Self {
        Self {
            stages: OrderStage::ALL.to_vec(),
            min_len: 18,
            max_len: 32,
            min_head_len: 10,
            min_digit_ratio: 0.7,
            known_prefixes: vec!["4200".to_string(), "1000".to_string(), "372".to_string()],
            rejected_year_prefixes: recent_years(year, window),
        }
    }

    /// Build rules from configuration.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let mut rules = Self::with_reference_year(Local::now().year(), config.year_window);
        if !config.rejected_year_prefixes.is_empty() {
            rules.rejected_year_prefixes = config.rejected_year_prefixes.clone();
        }
        rules.known_prefixes = config.known_prefixes.clone();
        rules.min_digit_ratio = config.min_digit_ratio;
        rules
    }

    /// Restrict or reorder the stages.
    pub fn with_stages(mut self, stages: Vec<OrderStage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn length_ok(&self, candidate: &str) -> bool {
        (self.min_len..=self.max_len).contains(&candidate.len())
    }

    pub fn is_year_like(&self, candidate: &str) -> bool {
        self.rejected_year_prefixes
            .iter()
            .any(|p| candidate.starts_with(p.as_str()))
    }

    pub fn has_known_prefix(&self, candidate: &str) -> bool {
        self.known_prefixes
            .iter()
            .any(|p| candidate.starts_with(p.as_str()))
    }

    fn accepts(&self, candidate: &str) -> bool {
        self.length_ok(candidate) && !self.is_year_like(candidate)
    }
}

impl Default for OrderRules {
    fn default() -> Self {
        Self::new()
    }
}

fn recent_years(year: i32, window: u32) -> Vec<String> {
    (0..window as i32).map(|i| (year - i).to_string()).collect()
}

fn digit_ratio(candidate: &str) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }
    let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
    digits as f64 / candidate.chars().count() as f64
}

/// Order identifier extractor.
#[derive(Debug, Clone, Default)]
pub struct OrderNumberExtractor {
    rules: OrderRules,
}

impl OrderNumberExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: OrderRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &OrderRules {
        &self.rules
    }

    /// All acceptable candidates produced by one stage, in text order.
    pub fn stage_candidates(&self, stage: OrderStage, text: &str) -> Vec<ExtractionMatch<String>> {
        let candidates = match stage {
            OrderStage::Labeled => self.single_line(stage, text, LABELED_ORDER_NUMBERS.iter()),
            OrderStage::Unanchored => {
                self.single_line(stage, text, [&*DIGIT_RUN, &*ALNUM_RUN].into_iter())
            }
            OrderStage::LabeledContinuation => self.labeled_continuation(text),
            OrderStage::Continuation => self.continuation(text),
        };
        trace!("{:?} produced {} candidates", stage, candidates.len());
        candidates
    }

    fn single_line<'a>(
        &self,
        stage: OrderStage,
        text: &str,
        patterns: impl Iterator<Item = &'a regex::Regex>,
    ) -> Vec<ExtractionMatch<String>> {
        let mut results = Vec::new();

        for pattern in patterns {
            for caps in pattern.captures_iter(text) {
                let (Some(full), Some(id)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if self.rules.accepts(id.as_str()) {
                    results.push(
                        ExtractionMatch::new(id.as_str().to_string(), stage.confidence(), full.as_str())
                            .with_position(id.start(), id.end()),
                    );
                }
            }
        }

        results
    }

    fn labeled_continuation(&self, text: &str) -> Vec<ExtractionMatch<String>> {
        let stage = OrderStage::LabeledContinuation;
        let lines: Vec<&str> = text.lines().collect();
        let mut results = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if !ORDER_LABEL_ANY.is_match(line) {
                continue;
            }
            let Some(next) = lines.get(i + 1).map(|l| l.trim()) else {
                continue;
            };
            let Some(tail) = LEADING_ALNUM.find(next) else {
                continue;
            };

            for head in ALNUM_TOKEN.find_iter(line) {
                let head = head.as_str();
                if head.len() < self.rules.min_head_len || head.len() >= self.rules.max_len {
                    continue;
                }
                let combined = format!("{}{}", head, tail.as_str());
                if self.rules.accepts(&combined) {
                    results.push(ExtractionMatch::new(
                        combined,
                        stage.confidence(),
                        format!("{}\n{}", line.trim(), next),
                    ));
                }
            }
        }

        results
    }

    fn continuation(&self, text: &str) -> Vec<ExtractionMatch<String>> {
        let stage = OrderStage::Continuation;
        let lines: Vec<&str> = text.lines().collect();
        let mut results = Vec::new();

        for pair in lines.windows(2) {
            let (line, next) = (pair[0].trim(), pair[1].trim());

            let squeezed: String = ALNUM_TOKEN.find_iter(line).map(|m| m.as_str()).collect();
            let Some(head) = TRAILING_ALNUM_HEAD.find(&squeezed) else {
                continue;
            };
            let Some(tail) = LEADING_ALNUM_TAIL.find(next) else {
                continue;
            };

            let combined = format!("{}{}", head.as_str(), tail.as_str());
            if !self.rules.length_ok(&combined) {
                continue;
            }
            if digit_ratio(&combined) < self.rules.min_digit_ratio {
                continue;
            }
            if self.rules.has_known_prefix(&combined) || !self.rules.is_year_like(&combined) {
                results.push(ExtractionMatch::new(
                    combined,
                    stage.confidence(),
                    format!("{}\n{}", line, next),
                ));
            }
        }

        results
    }
}

impl FieldExtractor for OrderNumberExtractor {
    type Output = ExtractionMatch<String>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.rules
            .stages
            .iter()
            .find_map(|stage| self.stage_candidates(*stage, text).into_iter().next())
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        let mut results: Vec<Self::Output> = Vec::new();

        for stage in &self.rules.stages {
            for candidate in self.stage_candidates(*stage, text) {
                // Skip if already found by a higher-priority stage
                if results.iter().any(|r| r.value == candidate.value) {
                    continue;
                }
                results.push(candidate);
            }
        }

        results
    }
}

/// Extract an order identifier from text with default rules.
pub fn extract_order_number(text: &str) -> Option<String> {
    OrderNumberExtractor::new().extract(text).map(|m| m.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extractor() -> OrderNumberExtractor {
        OrderNumberExtractor::with_rules(OrderRules::with_reference_year(2025, 3))
    }

    fn first(text: &str) -> Option<String> {
        extractor().extract(text).map(|m| m.value)
    }

    #[test]
    fn test_labeled_identifier() {
        let text = "订单号：420000279120250921795551234\n金额 -¥128.50";
        let id = first(text).unwrap();
        assert_eq!(id, "420000279120250921795551234");
        assert!((18..=32).contains(&id.len()));
    }

    #[test]
    fn test_labeled_alphanumeric_identifier() {
        let text = "商户单号: wx20a1b2c3d4e5f6g7h8i9\n";
        assert_eq!(first(text), Some("wx20a1b2c3d4e5f6g7h8i9".to_string()));
    }

    #[test]
    fn test_labeled_beats_unanchored() {
        let text = "流水 12345678901234567890123\n订单号：ABCDEF123456789012345";
        let result = extractor().extract(text).unwrap();
        assert_eq!(result.value, "ABCDEF123456789012345");
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn test_unanchored_digit_run() {
        let text = "支付成功\n 10001234567890123456789 \n";
        assert_eq!(first(text), Some("10001234567890123456789".to_string()));
    }

    #[test]
    fn test_year_prefix_rejected() {
        let text = "单号：2025092112345678901234";
        assert_eq!(first(text), None);
    }

    #[test]
    fn test_year_window_follows_reference_year() {
        let text = "单号：2022092112345678901234";
        assert_eq!(first(text), Some("2022092112345678901234".to_string()));

        let older = OrderNumberExtractor::with_rules(OrderRules::with_reference_year(2023, 3));
        assert!(older.extract(text).is_none());
    }

    #[test]
    fn test_labeled_continuation() {
        let text = "商户订单号：4200002791202509\n21795551234\n";
        let result = extractor().extract(text).unwrap();
        assert_eq!(result.value, "420000279120250921795551234");
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_continuation_with_known_prefix() {
        let text = "1000 0512 3456 78\n90123456 支付成功";
        assert_eq!(first(text), Some("1000051234567890123456".to_string()));
    }

    #[test]
    fn test_continuation_rejects_timestamp() {
        let text = "2025 0921 1234 56\n78901234";
        assert_eq!(first(text), None);
    }

    #[test]
    fn test_continuation_requires_digit_ratio() {
        let text = "ABCDEFGH12\n34567890ABCD";
        assert_eq!(first(text), None);
    }

    #[test]
    fn test_continuation_length_bounds() {
        // 10 + 4 = 14 characters, too short
        assert_eq!(first("1234567890\n1234"), None);
    }

    #[test]
    fn test_extract_all_dedups_across_stages() {
        let text = "订单号：420000279120250921795551234";
        let all = extractor().extract_all(text);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, "420000279120250921795551234");
    }

    #[test]
    fn test_stage_subset() {
        let rules = OrderRules::with_reference_year(2025, 3).with_stages(vec![OrderStage::Labeled]);
        let extractor = OrderNumberExtractor::with_rules(rules);
        assert!(extractor.extract("1000 0512 3456 78\n90123456").is_none());
    }

    #[test]
    fn test_no_identifier() {
        assert_eq!(first("微信支付\n金额 12.00"), None);
        assert_eq!(first(""), None);
    }
}
