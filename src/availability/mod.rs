// Availability resolution
//
// Merges external free/busy data with local calendar rules to produce the
// candidate slots a customer may book. The external calendar is the source of
// truth for busy time; blackout dates, business hours, lead time, granularity
// and buffers are applied locally on top of it.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, TimeZone, Utc};
use std::sync::Arc;

use crate::error::ApiError;
use crate::gateway::{QueuePolicy, RateLimitedGateway};
use crate::models::{BusinessCalendarRules, ServiceConfig, Slot};
use crate::providers::CalendarProvider;

/// Resolves bookable candidate slots for a service over a query window
///
/// The resolver is read-only: it never writes bookings or calendar events.
/// Booking creation re-runs it to revalidate the requested slot before
/// reserving.
pub struct AvailabilityResolver {
    calendar: Arc<dyn CalendarProvider>,
    gateway: Arc<RateLimitedGateway>,
    rules: BusinessCalendarRules,
    calendar_id: String,
}

impl AvailabilityResolver {
    pub fn new(
        calendar: Arc<dyn CalendarProvider>,
        gateway: Arc<RateLimitedGateway>,
        rules: BusinessCalendarRules,
        calendar_id: String,
    ) -> Self {
        Self {
            calendar,
            gateway,
            rules,
            calendar_id,
        }
    }

    pub fn rules(&self) -> &BusinessCalendarRules {
        &self.rules
    }

    /// Resolve candidate slots within `[window_start, window_end)`
    ///
    /// `existing_bookings` are the slots of non-terminal bookings already held
    /// locally; candidates must keep the configured buffer away from them.
    /// `now` is passed in so revalidation and tests see a stable clock.
    ///
    /// A transient gateway failure surfaces as `AvailabilityDegraded` so the
    /// caller can distinguish "could not determine" from "no slots".
    pub async fn resolve(
        &self,
        service: &ServiceConfig,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        existing_bookings: &[Slot],
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, ApiError> {
        if window_end <= window_start {
            return Err(ApiError::BadRequest(
                "availability window end must be after start".to_string(),
            ));
        }

        let offset = self.business_offset();
        let timezone = format_offset(offset);

        let free_windows = match self
            .gateway
            .call("calendar.free_slots", QueuePolicy::Queue, || {
                self.calendar
                    .free_slots(&self.calendar_id, window_start, window_end, &timezone)
            })
            .await
        {
            Ok(windows) => windows,
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "free/busy fetch degraded");
                return Err(ApiError::AvailabilityDegraded(err.to_string()));
            }
            Err(err) => return Err(ApiError::ProviderError(err.to_string())),
        };

        let business_windows = self.business_windows(service, window_start, window_end, offset);

        // Intersect external free time with local business-hour windows,
        // keeping the business open time as the granularity anchor
        let mut usable: Vec<(Slot, DateTime<Utc>)> = Vec::new();
        for free in &free_windows {
            let free_start = free.start.max(window_start);
            let free_end = free.end.min(window_end);
            for biz in &business_windows {
                let start = free_start.max(biz.start);
                let end = free_end.min(biz.end);
                if start < end {
                    usable.push((Slot { start, end }, biz.start));
                }
            }
        }

        let duration = Duration::minutes(service.default_duration_minutes);
        let granularity_minutes = self.rules.slot_granularity_minutes.max(1);
        let granularity = Duration::minutes(granularity_minutes);
        let buffer = Duration::minutes(self.rules.buffer_between_appointments_minutes);
        let earliest_start = now + Duration::minutes(self.rules.minimum_lead_time_minutes);

        let mut candidates: Vec<Slot> = Vec::new();
        for (window, anchor) in &usable {
            // Candidates sit on the granularity grid anchored at the business
            // open time; a partial tail that cannot hold the full duration is
            // dropped, never shortened.
            let lag = (window.start - *anchor).num_minutes();
            let steps = (lag + granularity_minutes - 1) / granularity_minutes;
            let mut start = *anchor + Duration::minutes(steps * granularity_minutes);
            while start + duration <= window.end {
                let slot = Slot {
                    start,
                    end: start + duration,
                };
                if start >= earliest_start && !self.buffered_conflict(&slot, existing_bookings, buffer)
                {
                    candidates.push(slot);
                }
                start += granularity;
            }
        }

        candidates.sort_by_key(|s| s.start);
        candidates.dedup();
        Ok(candidates)
    }

    /// Check whether a requested slot is one the resolver would offer
    pub async fn is_bookable(
        &self,
        service: &ServiceConfig,
        requested: &Slot,
        existing_bookings: &[Slot],
        now: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        if requested.end <= requested.start {
            return Err(ApiError::BadRequest(
                "slot end must be after slot start".to_string(),
            ));
        }
        let candidates = self
            .resolve(service, requested.start, requested.end, existing_bookings, now)
            .await?;
        Ok(candidates.contains(requested))
    }

    fn business_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.rules.business_tz_offset_minutes * 60).unwrap_or(Utc.fix())
    }

    /// Per-day business-hour windows in UTC, with blackout dates removed
    ///
    /// Weekdays and opening hours are evaluated in the business timezone, so
    /// a window that spans midnight UTC still lands on the right local day.
    fn business_windows(
        &self,
        service: &ServiceConfig,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Vec<Slot> {
        let hours = &service.business_hours;
        let mut windows = Vec::new();

        let mut date = window_start.with_timezone(&offset).date_naive();
        let last = window_end.with_timezone(&offset).date_naive();
        while date <= last {
            let weekday = date.weekday().number_from_monday();
            if hours.includes_weekday(weekday) && !self.rules.blackout_dates.contains(&date) {
                let open = date.and_hms_opt(hours.start_hour, 0, 0);
                let close = date.and_hms_opt(hours.end_hour, 0, 0);
                if let (Some(open), Some(close)) = (open, close) {
                    if let (Some(open), Some(close)) = (
                        offset.from_local_datetime(&open).single(),
                        offset.from_local_datetime(&close).single(),
                    ) {
                        if open < close {
                            windows.push(Slot {
                                start: open.with_timezone(&Utc),
                                end: close.with_timezone(&Utc),
                            });
                        }
                    }
                }
            }
            date += Duration::days(1);
        }
        windows
    }

    fn buffered_conflict(&self, slot: &Slot, existing: &[Slot], buffer: Duration) -> bool {
        let padded = Slot {
            start: slot.start - buffer,
            end: slot.end + buffer,
        };
        existing.iter().any(|booked| padded.overlaps(booked))
    }
}

/// Render a fixed offset as `+HH:MM` for the provider wire format
fn format_offset(offset: FixedOffset) -> String {
    let total = offset.local_minus_utc() / 60;
    let sign = if total < 0 { '-' } else { '+' };
    let abs = total.abs();
    format!("{}{:02}:{:02}", sign, abs / 60, abs % 60)
}
