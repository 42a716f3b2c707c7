//! Coupon types and the checkout discount preview.
//!
//! The preview mirrors the API's pricing rules so the checkout can show a
//! total before submitting; the placed order's amounts are what count.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A percentage coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub discount_percent: Decimal,
    /// Cap on the discount; `None` (or zero) means uncapped.
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    pub min_purchase_amount: Decimal,
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Coupon {
    /// Whether `subtotal` reaches the coupon's minimum purchase.
    #[must_use]
    pub fn applies_to(&self, subtotal: Decimal) -> bool {
        subtotal >= self.min_purchase_amount
    }

    /// Discount on `subtotal`: percent of the subtotal, capped, rounded down.
    #[must_use]
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        if !self.applies_to(subtotal) {
            return Decimal::ZERO;
        }

        let mut discount = subtotal * self.discount_percent / Decimal::ONE_HUNDRED;
        if let Some(cap) = self.max_discount_amount
            && cap > Decimal::ZERO
        {
            discount = discount.min(cap);
        }
        discount.floor()
    }

    /// Amount payable after the discount, never negative.
    #[must_use]
    pub fn final_total(&self, subtotal: Decimal) -> Decimal {
        (subtotal - self.discount_for(subtotal)).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(percent: i64, cap: Option<i64>, min: i64) -> Coupon {
        Coupon {
            code: "HARVEST10".to_string(),
            discount_percent: Decimal::new(percent, 0),
            max_discount_amount: cap.map(|c| Decimal::new(c, 0)),
            min_purchase_amount: Decimal::new(min, 0),
            is_active: true,
            expires_at: None,
        }
    }

    #[test]
    fn test_percent_discount_rounds_down() {
        let c = coupon(15, None, 0);
        // 15% of 99_999 = 14_999.85
        assert_eq!(c.discount_for(Decimal::new(99_999, 0)), Decimal::new(14_999, 0));
    }

    #[test]
    fn test_discount_is_capped() {
        let c = coupon(50, Some(20_000), 0);
        assert_eq!(c.discount_for(Decimal::new(100_000, 0)), Decimal::new(20_000, 0));
    }

    #[test]
    fn test_zero_cap_means_uncapped() {
        let c = coupon(50, Some(0), 0);
        assert_eq!(c.discount_for(Decimal::new(100_000, 0)), Decimal::new(50_000, 0));
    }

    #[test]
    fn test_below_minimum_gets_nothing() {
        let c = coupon(10, None, 200_000);
        assert_eq!(c.discount_for(Decimal::new(199_999, 0)), Decimal::ZERO);
        assert_eq!(c.final_total(Decimal::new(199_999, 0)), Decimal::new(199_999, 0));
    }

    #[test]
    fn test_final_total_never_negative() {
        let c = coupon(100, None, 0);
        assert_eq!(c.final_total(Decimal::new(5_000, 0)), Decimal::ZERO);
    }
}
