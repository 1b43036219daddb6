// Pricing engine
//
// Pure, deterministic price computation: service config + distance + promo
// in, quote out. No I/O. All currency arithmetic is carried out in integer
// minor units (cents); fractional intermediates from the per-mile fee and
// percentage discounts are rounded to the nearest cent exactly once, when the
// quote figure is produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{DiscountType, PromoCode, ServiceConfig};

/// Price breakdown snapshot, in cents
///
/// This is the value frozen into `Booking.price_at_booking`; it is never
/// recomputed from a later `ServiceConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Quote {
    pub base_price_cents: i64,
    pub travel_fee_cents: i64,
    pub discount_cents: i64,
    pub deposit_cents: i64,
    pub total_cents: i64,
}

/// Pricing engine, a namespace for the pure computation
pub struct PricingEngine;

impl PricingEngine {
    /// Compute the quote for a service at a given distance
    ///
    /// `travel_fee = max(0, distance − included_radius) × fee_per_mile`.
    /// A promo contributes `clamp(apply(subtotal), 0, max_discount)` when it
    /// is valid at `at`, otherwise 0. The total is floored at zero.
    pub fn price(
        service: &ServiceConfig,
        distance_miles: f64,
        promo: Option<&PromoCode>,
        at: DateTime<Utc>,
    ) -> Quote {
        let excess_miles = (distance_miles - service.included_radius_miles).max(0.0);
        let travel_fee_cents = (excess_miles * service.fee_per_mile_cents as f64).round() as i64;

        let subtotal_cents = service.base_price_cents + travel_fee_cents;

        let discount_cents = match promo {
            Some(code) if code.is_valid_at(at) => {
                let raw = match code.discount_type {
                    DiscountType::Percent => {
                        (subtotal_cents as f64 * code.discount_value as f64 / 100.0).round() as i64
                    }
                    DiscountType::Fixed => code.discount_value,
                };
                raw.clamp(0, code.max_discount_cents)
            }
            _ => 0,
        };

        let total_cents = (subtotal_cents - discount_cents).max(0);
        // Half-up rounding in integer arithmetic
        let deposit_cents = (total_cents * service.deposit_percent + 50) / 100;

        Quote {
            base_price_cents: service.base_price_cents,
            travel_fee_cents,
            discount_cents,
            deposit_cents,
            total_cents,
        }
    }
}
