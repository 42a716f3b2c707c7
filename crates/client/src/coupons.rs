//! Coupon lookup and checkout discount preview.

use agrihcm_core::Coupon;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::instrument;

use crate::gateway::{ApiError, Gateway};

/// Errors from applying a coupon.
#[derive(Debug, Error)]
pub enum CouponError {
    #[error("coupon {0} does not exist")]
    NotFound(String),

    #[error("coupon {0} is no longer active")]
    Inactive(String),

    #[error("coupon {0} has expired")]
    Expired(String),

    #[error("orders must be at least {minimum} to use this coupon")]
    BelowMinimum { minimum: Decimal },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// What the checkout shows after applying a coupon.
///
/// Display only; the placed order's amounts come from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponPreview {
    pub coupon: Coupon,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub final_total: Decimal,
}

impl CouponPreview {
    /// Check `coupon` against `subtotal` at `now` and compute the preview.
    ///
    /// # Errors
    ///
    /// Returns `CouponError` if the coupon is inactive, expired, or the
    /// subtotal is under its minimum.
    pub fn compute(
        coupon: Coupon,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, CouponError> {
        if !coupon.is_active {
            return Err(CouponError::Inactive(coupon.code));
        }
        if coupon.expires_at.is_some_and(|expires| expires <= now) {
            return Err(CouponError::Expired(coupon.code));
        }
        if !coupon.applies_to(subtotal) {
            return Err(CouponError::BelowMinimum {
                minimum: coupon.min_purchase_amount,
            });
        }

        let discount = coupon.discount_for(subtotal);
        let final_total = coupon.final_total(subtotal);
        Ok(Self {
            coupon,
            subtotal,
            discount,
            final_total,
        })
    }
}

/// Coupon lookups.
#[derive(Clone)]
pub struct CouponService {
    gateway: Gateway,
}

impl CouponService {
    #[must_use]
    pub const fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Fetch a coupon by code.
    ///
    /// # Errors
    ///
    /// Returns `CouponError::NotFound` for unknown codes.
    #[instrument(skip(self))]
    pub async fn lookup(&self, code: &str) -> Result<Coupon, CouponError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CouponError::NotFound(String::new()));
        }

        let path = format!("api/coupons/{}/", urlencoding::encode(code));
        match self.gateway.get::<Coupon>(&path).await {
            Ok(Some(coupon)) => Ok(coupon),
            Ok(None) | Err(ApiError::Status { status: 404, .. }) => {
                Err(CouponError::NotFound(code.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up `code` and preview it against `subtotal`.
    ///
    /// # Errors
    ///
    /// See [`CouponService::lookup`] and [`CouponPreview::compute`].
    pub async fn preview(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponPreview, CouponError> {
        let coupon = self.lookup(code).await?;
        CouponPreview::compute(coupon, subtotal, Utc::now())
    }
}
