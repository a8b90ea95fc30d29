//! Transaction amount extraction.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;

use super::patterns::{
    ascii_digits, DECIMAL_AMOUNT, FULL_WIDTH_YUAN_AMOUNT, NEGATIVE_AMOUNT, YUAN_AMOUNT,
};
use super::{ExtractionMatch, FieldExtractor};
use crate::models::config::ExtractionConfig;

/// How a rule turns its matches into a single amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSelection {
    /// The first match in the text.
    First,
    /// The largest match inside the plausible range.
    LargestInRange,
}

/// One amount pattern and how to select among its matches.
#[derive(Debug, Clone)]
pub struct AmountRule {
    pub name: &'static str,
    pub pattern: &'static Regex,
    pub selection: AmountSelection,
    pub confidence: f32,
}

/// Ordered amount rules plus the plausible range for fallback values.
#[derive(Debug, Clone)]
pub struct AmountRules {
    pub rules: Vec<AmountRule>,
    /// Inclusive lower bound for [`AmountSelection::LargestInRange`].
    pub min: Decimal,
    /// Exclusive upper bound for [`AmountSelection::LargestInRange`].
    pub max: Decimal,
}

impl AmountRules {
    pub fn new() -> Self {
        Self {
            rules: vec![
                AmountRule {
                    name: "debit",
                    pattern: &NEGATIVE_AMOUNT,
                    selection: AmountSelection::First,
                    confidence: 0.95,
                },
                AmountRule {
                    name: "yuan",
                    pattern: &YUAN_AMOUNT,
                    selection: AmountSelection::First,
                    confidence: 0.9,
                },
                AmountRule {
                    name: "full_width_yuan",
                    pattern: &FULL_WIDTH_YUAN_AMOUNT,
                    selection: AmountSelection::First,
                    confidence: 0.9,
                },
                AmountRule {
                    name: "largest",
                    pattern: &DECIMAL_AMOUNT,
                    selection: AmountSelection::LargestInRange,
                    confidence: 0.6,
                },
            ],
            min: Decimal::new(1, 2),
            max: Decimal::from(100_000),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max: Decimal::from(config.max_amount),
            ..Self::new()
        }
    }

    fn in_range(&self, amount: Decimal) -> bool {
        amount >= self.min && amount < self.max
    }
}

impl Default for AmountRules {
    fn default() -> Self {
        Self::new()
    }
}

/// Amount field extractor.
#[derive(Debug, Clone, Default)]
pub struct AmountExtractor {
    rules: AmountRules,
}

impl AmountExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: AmountRules) -> Self {
        Self { rules }
    }

    /// Every match of one rule, in text order. Range filtering applies to
    /// [`AmountSelection::LargestInRange`] rules only.
    fn rule_matches(&self, rule: &AmountRule, text: &str) -> Vec<ExtractionMatch<Decimal>> {
        let mut results = Vec::new();

        for caps in rule.pattern.captures_iter(text) {
            let (Some(full), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Ok(amount) = Decimal::from_str(&ascii_digits(number.as_str())) else {
                continue;
            };
            if rule.selection == AmountSelection::LargestInRange && !self.rules.in_range(amount) {
                continue;
            }
            results.push(
                ExtractionMatch::new(amount, rule.confidence, full.as_str())
                    .with_position(full.start(), full.end()),
            );
        }

        results
    }

    fn select(&self, rule: &AmountRule, text: &str) -> Option<ExtractionMatch<Decimal>> {
        let matches = self.rule_matches(rule, text);
        match rule.selection {
            AmountSelection::First => matches.into_iter().next(),
            // max_by_key keeps the last maximum; reverse so the earliest wins ties
            AmountSelection::LargestInRange => matches.into_iter().rev().max_by_key(|m| m.value),
        }
    }
}

impl FieldExtractor for AmountExtractor {
    type Output = ExtractionMatch<Decimal>;

    fn extract(&self, text: &str) -> Option<Self::Output> {
        self.rules.rules.iter().find_map(|rule| self.select(rule, text))
    }

    fn extract_all(&self, text: &str) -> Vec<Self::Output> {
        self.rules
            .rules
            .iter()
            .flat_map(|rule| self.rule_matches(rule, text))
            .collect()
    }
}

/// Extract the transaction amount from text with default rules.
pub fn extract_amount(text: &str) -> Option<Decimal> {
    AmountExtractor::new().extract(text).map(|m| m.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_currency_amount() {
        let text = "订单号：420000279120250921795551234\n金额 -¥128.50";
        assert_eq!(extract_amount(text), Some(dec("128.50")));
    }

    #[test]
    fn test_debit_sign_has_priority() {
        let text = "¥5.00 优惠\n-36.80\n余额 1200.00";
        let result = AmountExtractor::new().extract(text).unwrap();
        assert_eq!(result.value, dec("36.80"));
        assert_eq!(result.source, "-36.80");
    }

    #[test]
    fn test_full_width_currency() {
        assert_eq!(extract_amount("支付金额 ￥99.90"), Some(dec("99.90")));
    }

    #[test]
    fn test_narrow_yuan_searched_before_full_width() {
        let text = "原价 ￥5.00\n实付 ¥10.00";
        assert_eq!(extract_amount(text), Some(dec("10.00")));
    }

    #[test]
    fn test_full_width_digits_are_parsed() {
        assert_eq!(extract_amount("实付 ￥１２.３０"), Some(dec("12.30")));
        assert_eq!(extract_amount("合计 ８８.００\n手续费 1.00"), Some(dec("88.00")));
    }

    #[test]
    fn test_fallback_takes_largest_in_range() {
        let text = "手续费 0.00\n实付 45.60\n积分 12.30\n流水 250000.00";
        assert_eq!(extract_amount(text), Some(dec("45.60")));
    }

    #[test]
    fn test_fallback_requires_two_decimals() {
        assert_eq!(extract_amount("合计 45.6 元"), None);
    }

    #[test]
    fn test_no_amount() {
        assert_eq!(extract_amount("订单号：420000279120250921795551234"), None);
        assert_eq!(extract_amount(""), None);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "商品 19.99\n优惠 2.00\n实付 17.99";
        let extractor = AmountExtractor::new();
        assert_eq!(extractor.extract(text), extractor.extract(text));
    }

    #[test]
    fn test_configured_upper_bound() {
        let config = ExtractionConfig {
            max_amount: 1000,
            ..ExtractionConfig::default()
        };
        let extractor = AmountExtractor::with_rules(AmountRules::from_config(&config));
        let result = extractor.extract("4500.00\n88.00").map(|m| m.value);
        assert_eq!(result, Some(dec("88.00")));
    }

    #[test]
    fn test_extract_all_lists_every_rule() {
        let text = "-10.00 ¥20.00";
        let all = AmountExtractor::new().extract_all(text);
        let values: Vec<Decimal> = all.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![dec("10.00"), dec("20.00"), dec("10.00"), dec("20.00")]);
    }
}
