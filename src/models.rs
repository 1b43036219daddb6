use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;

/// Business hours for a single weekday window
///
/// Hours are interpreted in the business timezone offset configured in
/// [`BusinessCalendarRules`]. `days_of_week` uses chrono numbering where
/// Monday = 1 and Sunday = 7.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
    pub days_of_week: Vec<u32>,
}

impl BusinessHours {
    /// Check whether the given weekday (Monday = 1) is a working day
    pub fn includes_weekday(&self, weekday: u32) -> bool {
        self.days_of_week.contains(&weekday)
    }
}

/// Immutable reference data describing a bookable service
///
/// Edited by an external admin collaborator, never by this engine. Prices are
/// integer minor units (cents).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceConfig {
    pub id: String,
    pub display_name: String,
    pub base_price_cents: i64,
    pub included_radius_miles: f64,
    pub fee_per_mile_cents: i64,
    pub default_duration_minutes: i64,
    /// Percentage of the total collected as a deposit at booking time
    pub deposit_percent: i64,
    pub business_hours: BusinessHours,
    pub active: bool,
}

/// Read-only calendar rules applied on top of external free/busy data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessCalendarRules {
    /// Exact dates on which no candidate slots are ever produced
    pub blackout_dates: HashSet<NaiveDate>,
    pub minimum_lead_time_minutes: i64,
    pub slot_granularity_minutes: i64,
    pub buffer_between_appointments_minutes: i64,
    /// Business timezone as a fixed UTC offset, resolved at the access boundary
    pub business_tz_offset_minutes: i32,
}

impl Default for BusinessCalendarRules {
    fn default() -> Self {
        Self {
            blackout_dates: HashSet::new(),
            minimum_lead_time_minutes: 120,
            slot_granularity_minutes: 30,
            buffer_between_appointments_minutes: 30,
            business_tz_offset_minutes: 0,
        }
    }
}

/// Discount type for promo codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percent,
    Fixed,
}

impl std::fmt::Display for DiscountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscountType::Percent => write!(f, "percent"),
            DiscountType::Fixed => write!(f, "fixed"),
        }
    }
}

/// Promotional code, read-only input to the pricing engine
///
/// Usage increments are an external collaborator concern; `times_used` is the
/// count as of the last sync and is only consulted for the usage cap check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent (0-100) for `Percent`, cents for `Fixed`
    pub discount_value: i64,
    /// Upper bound on the discount in cents
    pub max_discount_cents: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub usage_cap: Option<i64>,
    pub times_used: i64,
}

impl PromoCode {
    /// Check whether the code can be applied at the given instant
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        if at < self.valid_from {
            return false;
        }
        if let Some(until) = self.valid_until {
            if at > until {
                return false;
            }
        }
        if let Some(cap) = self.usage_cap {
            if self.times_used >= cap {
                return false;
            }
        }
        true
    }
}

/// A candidate interval a customer can book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Half-open interval overlap check
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Caller role, resolved once at the access boundary and passed in as a value
///
/// This engine never inspects sessions or tokens; authorization decisions
/// happen outside and arrive as one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Notary,
    Staff,
    Admin,
}

impl Role {
    /// Staff-side roles cancel on behalf of the business
    pub fn is_staff_side(&self) -> bool {
        matches!(self, Role::Notary | Role::Staff | Role::Admin)
    }
}

/// In-memory catalog of service configurations
///
/// Reference data is loaded once at startup; the admin tooling that edits it
/// lives outside this engine.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: HashMap<String, ServiceConfig>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<ServiceConfig>) -> Self {
        Self {
            services: services.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn get(&self, service_id: &str) -> Option<&ServiceConfig> {
        self.services.get(service_id)
    }

    /// Look up a service that is bookable right now
    pub fn get_active(&self, service_id: &str) -> Option<&ServiceConfig> {
        self.services.get(service_id).filter(|s| s.active)
    }
}

/// Seed promo codes, keyed by uppercase code
///
/// Production syncs these from the marketing tooling; the seed mirrors the
/// codes live at launch.
pub fn default_promos() -> HashMap<String, PromoCode> {
    let mut promos = HashMap::new();
    promos.insert(
        "WELCOME10".to_string(),
        PromoCode {
            code: "WELCOME10".to_string(),
            discount_type: DiscountType::Percent,
            discount_value: 10,
            max_discount_cents: 20_00,
            valid_from: DateTime::<Utc>::MIN_UTC,
            valid_until: None,
            usage_cap: None,
            times_used: 0,
        },
    );
    promos.insert(
        "MOBILE5".to_string(),
        PromoCode {
            code: "MOBILE5".to_string(),
            discount_type: DiscountType::Fixed,
            discount_value: 5_00,
            max_discount_cents: 5_00,
            valid_from: DateTime::<Utc>::MIN_UTC,
            valid_until: None,
            usage_cap: Some(500),
            times_used: 0,
        },
    );
    promos
}

/// Seed catalog matching the production service menu
pub fn default_catalog() -> ServiceCatalog {
    let weekdays = vec![1, 2, 3, 4, 5];
    ServiceCatalog::new(vec![
        ServiceConfig {
            id: "QUICK_STAMP_LOCAL".to_string(),
            display_name: "Quick Stamp (Local)".to_string(),
            base_price_cents: 50_00,
            included_radius_miles: 10.0,
            fee_per_mile_cents: 50,
            default_duration_minutes: 30,
            deposit_percent: 25,
            business_hours: BusinessHours {
                start_hour: 9,
                end_hour: 17,
                days_of_week: weekdays.clone(),
            },
            active: true,
        },
        ServiceConfig {
            id: "STANDARD_NOTARY".to_string(),
            display_name: "Standard Mobile Notary".to_string(),
            base_price_cents: 75_00,
            included_radius_miles: 20.0,
            fee_per_mile_cents: 50,
            default_duration_minutes: 60,
            deposit_percent: 25,
            business_hours: BusinessHours {
                start_hour: 9,
                end_hour: 17,
                days_of_week: weekdays,
            },
            active: true,
        },
        ServiceConfig {
            id: "LOAN_SIGNING".to_string(),
            display_name: "Loan Signing".to_string(),
            base_price_cents: 150_00,
            included_radius_miles: 30.0,
            fee_per_mile_cents: 75,
            default_duration_minutes: 90,
            deposit_percent: 50,
            business_hours: BusinessHours {
                start_hour: 9,
                end_hour: 19,
                days_of_week: vec![1, 2, 3, 4, 5, 6],
            },
            active: true,
        },
    ])
}
