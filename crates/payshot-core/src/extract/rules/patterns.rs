//! Common regex patterns for payment screenshot extraction.

use lazy_static::lazy_static;
use regex::Regex;

/// Labels meaning "order number" on payment receipts, in priority order.
pub const ORDER_LABELS: &[&str] = &["订单号", "单号", "订单编号", "商户订单号", "交易单号"];

lazy_static! {
    // Label followed by a complete identifier on the same line
    pub static ref LABELED_ORDER_NUMBERS: Vec<Regex> = ORDER_LABELS
        .iter()
        .map(|label| {
            Regex::new(&format!(
                r"(?i){}[:：\s]*([0-9A-Za-z]{{18,32}})",
                regex::escape(label)
            ))
            .unwrap()
        })
        .collect();

    // Any order label, for locating the line an identifier starts on
    pub static ref ORDER_LABEL_ANY: Regex = Regex::new(
        &format!(
            "(?i){}",
            ORDER_LABELS.iter().map(|l| regex::escape(l)).collect::<Vec<_>>().join("|")
        )
    ).unwrap();

    // Free-standing identifiers
    pub static ref DIGIT_RUN: Regex = Regex::new(
        r"\b([0-9]{20,32})\b"
    ).unwrap();

    pub static ref ALNUM_RUN: Regex = Regex::new(
        r"\b([0-9A-Za-z]{24,32})\b"
    ).unwrap();

    // Token helpers for cross-line reconstruction
    pub static ref ALNUM_TOKEN: Regex = Regex::new(
        r"[0-9A-Za-z]+"
    ).unwrap();

    pub static ref LEADING_ALNUM: Regex = Regex::new(
        r"^[0-9A-Za-z]+"
    ).unwrap();

    pub static ref TRAILING_ALNUM_HEAD: Regex = Regex::new(
        r"[0-9A-Za-z]{10,}$"
    ).unwrap();

    pub static ref LEADING_ALNUM_TAIL: Regex = Regex::new(
        r"^[0-9A-Za-z]{4,}"
    ).unwrap();

    // Amounts: debit sign, narrow yuan, full-width yuan, bare decimal.
    // Digits may be ASCII or full-width.
    pub static ref NEGATIVE_AMOUNT: Regex = Regex::new(
        r"-([0-9０-９]+\.[0-9０-９]{2})"
    ).unwrap();

    pub static ref YUAN_AMOUNT: Regex = Regex::new(
        r"¥([0-9０-９]+\.[0-9０-９]{2})"
    ).unwrap();

    pub static ref FULL_WIDTH_YUAN_AMOUNT: Regex = Regex::new(
        r"￥([0-9０-９]+\.[0-9０-９]{2})"
    ).unwrap();

    pub static ref DECIMAL_AMOUNT: Regex = Regex::new(
        r"\b([0-9０-９]+\.[0-9０-９]{2})\b"
    ).unwrap();
}

/// Map full-width digits to ASCII, leaving everything else untouched.
pub fn ascii_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_patterns_compile_in_order() {
        assert_eq!(LABELED_ORDER_NUMBERS.len(), ORDER_LABELS.len());
        assert!(LABELED_ORDER_NUMBERS[0].is_match("订单号：ABCDEFGHIJ1234567890"));
    }

    #[test]
    fn test_digit_run_needs_boundaries() {
        assert!(DIGIT_RUN.is_match("no. 12345678901234567890 end"));
        assert!(!DIGIT_RUN.is_match("123456789012345678901234567890123"));
    }

    #[test]
    fn test_yuan_symbols_are_separate() {
        assert!(YUAN_AMOUNT.captures("支付 ￥36.00").is_none());
        let caps = FULL_WIDTH_YUAN_AMOUNT.captures("支付 ￥36.00").unwrap();
        assert_eq!(&caps[1], "36.00");
    }

    #[test]
    fn test_full_width_digits() {
        let caps = DECIMAL_AMOUNT.captures("实付 １２.３０ 元").unwrap();
        assert_eq!(ascii_digits(&caps[1]), "12.30");
        assert_eq!(ascii_digits("a１b9"), "a1b9");
    }
}
