//! Field extraction from recognized screenshot text.
//!
//! Extraction is pure: the same text always yields the same fields. The
//! two-tier recognition strategy lives in [`crate::dispatch`]; this module
//! only supplies [`PaymentParser::parse`] for the fast pass and
//! [`PaymentParser::complete`] for re-running missing fields against the
//! fast and deep text combined.

pub mod rules;

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::config::ExtractionConfig;
use rules::{AmountExtractor, AmountRules, ExtractionMatch, FieldExtractor, OrderNumberExtractor, OrderRules};

/// Fields found in one text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub order_number: Option<ExtractionMatch<String>>,
    pub amount: Option<ExtractionMatch<Decimal>>,
}

impl ExtractedFields {
    pub fn is_complete(&self) -> bool {
        self.order_number.is_some() && self.amount.is_some()
    }

    pub fn order_number(&self) -> Option<String> {
        self.order_number.as_ref().map(|m| m.value.clone())
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.amount.as_ref().map(|m| m.value)
    }
}

/// Combined order identifier and amount parser.
#[derive(Debug, Clone, Default)]
pub struct PaymentParser {
    order_numbers: OrderNumberExtractor,
    amounts: AmountExtractor,
}

impl PaymentParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            order_numbers: OrderNumberExtractor::with_rules(OrderRules::from_config(config)),
            amounts: AmountExtractor::with_rules(AmountRules::from_config(config)),
        }
    }

    pub fn with_order_rules(mut self, rules: OrderRules) -> Self {
        self.order_numbers = OrderNumberExtractor::with_rules(rules);
        self
    }

    pub fn with_amount_rules(mut self, rules: AmountRules) -> Self {
        self.amounts = AmountExtractor::with_rules(rules);
        self
    }

    /// Extract both fields from one text.
    pub fn parse(&self, text: &str) -> ExtractedFields {
        ExtractedFields {
            order_number: self.order_numbers.extract(text),
            amount: self.amounts.extract(text),
        }
    }

    /// Retry the fields missing from `fast` against the fast and deep text
    /// joined by a newline. Fields already found are kept.
    pub fn complete(&self, fast: ExtractedFields, fast_text: &str, deep_text: &str) -> ExtractedFields {
        if fast.is_complete() {
            return fast;
        }

        let combined = format!("{}\n{}", fast_text, deep_text);
        let order_number = fast
            .order_number
            .or_else(|| self.order_numbers.extract(&combined));
        let amount = fast.amount.or_else(|| self.amounts.extract(&combined));

        debug!(
            "deep pass completion: order_number={} amount={}",
            order_number.is_some(),
            amount.is_some()
        );

        ExtractedFields {
            order_number,
            amount,
        }
    }
}
