use crate::bookings::BookingStatus;

/// Service for managing booking status transitions
///
/// Transitions are additionally compare-and-swap guarded at the store layer;
/// this machine decides which edges exist at all.
pub struct StatusMachine;

impl StatusMachine {
    /// Check if a status transition is valid
    ///
    /// # Valid Transitions
    /// - Requested → PendingPayment, CancelledByClient, CancelledByStaff
    /// - PendingPayment → Confirmed, FailedPayment, CancelledByClient, CancelledByStaff
    /// - Confirmed → InProgress, CancelledByClient, CancelledByStaff
    /// - InProgress → Completed, CancelledByStaff
    /// - Completed, CancelledByClient, CancelledByStaff, FailedPayment → (terminal)
    /// - Any status → Same status (idempotent)
    pub fn is_valid_transition(from: BookingStatus, to: BookingStatus) -> bool {
        // Same status is always valid (idempotent)
        if from == to {
            return true;
        }

        match (from, to) {
            // From Requested
            (BookingStatus::Requested, BookingStatus::PendingPayment) => true,
            (BookingStatus::Requested, BookingStatus::CancelledByClient) => true,
            (BookingStatus::Requested, BookingStatus::CancelledByStaff) => true,

            // From PendingPayment
            (BookingStatus::PendingPayment, BookingStatus::Confirmed) => true,
            (BookingStatus::PendingPayment, BookingStatus::FailedPayment) => true,
            (BookingStatus::PendingPayment, BookingStatus::CancelledByClient) => true,
            (BookingStatus::PendingPayment, BookingStatus::CancelledByStaff) => true,

            // From Confirmed
            (BookingStatus::Confirmed, BookingStatus::InProgress) => true,
            (BookingStatus::Confirmed, BookingStatus::CancelledByClient) => true,
            (BookingStatus::Confirmed, BookingStatus::CancelledByStaff) => true,

            // From InProgress - the client cannot cancel a visit underway
            (BookingStatus::InProgress, BookingStatus::Completed) => true,
            (BookingStatus::InProgress, BookingStatus::CancelledByStaff) => true,

            // Terminal states admit nothing (same-status handled above)
            (BookingStatus::Completed, _) => false,
            (BookingStatus::CancelledByClient, _) => false,
            (BookingStatus::CancelledByStaff, _) => false,
            (BookingStatus::FailedPayment, _) => false,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Attempt to transition from one status to another
    ///
    /// # Returns
    /// `Ok(to)` if the transition is valid, `Err(message)` otherwise
    pub fn transition(from: BookingStatus, to: BookingStatus) -> Result<BookingStatus, String> {
        if Self::is_valid_transition(from, to) {
            Ok(to)
        } else {
            Err(format!("Invalid status transition from {} to {}", from, to))
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn booking_status_strategy() -> impl Strategy<Value = BookingStatus> {
        prop_oneof![
            Just(BookingStatus::Requested),
            Just(BookingStatus::PendingPayment),
            Just(BookingStatus::Confirmed),
            Just(BookingStatus::InProgress),
            Just(BookingStatus::Completed),
            Just(BookingStatus::CancelledByClient),
            Just(BookingStatus::CancelledByStaff),
            Just(BookingStatus::FailedPayment),
        ]
    }

    /// Same-status transitions are always valid (idempotent)
    #[test]
    fn prop_same_status_is_valid() {
        proptest!(|(status in booking_status_strategy())| {
            prop_assert!(StatusMachine::is_valid_transition(status, status));
        });
    }

    /// Terminal states admit no outgoing transitions
    #[test]
    fn prop_terminal_states_are_terminal() {
        proptest!(|(
            from in booking_status_strategy(),
            to in booking_status_strategy()
        )| {
            if from.is_terminal() && from != to {
                prop_assert!(
                    !StatusMachine::is_valid_transition(from, to),
                    "terminal {} must not transition to {}",
                    from,
                    to
                );
            }
        });
    }

    /// Staff can always cancel a booking that is not yet terminal
    #[test]
    fn prop_staff_can_cancel_any_live_booking() {
        proptest!(|(from in booking_status_strategy())| {
            if !from.is_terminal() {
                prop_assert!(StatusMachine::is_valid_transition(
                    from,
                    BookingStatus::CancelledByStaff
                ));
            }
        });
    }

    /// transition() and is_valid_transition() agree
    #[test]
    fn prop_transition_consistency() {
        proptest!(|(
            from in booking_status_strategy(),
            to in booking_status_strategy()
        )| {
            let is_valid = StatusMachine::is_valid_transition(from, to);
            let result = StatusMachine::transition(from, to);
            if is_valid {
                prop_assert!(result.is_ok());
                prop_assert_eq!(result.unwrap(), to);
            } else {
                prop_assert!(result.is_err());
            }
        });
    }

    /// A booking can never re-occupy its slot after releasing it
    #[test]
    fn prop_released_slots_stay_released() {
        proptest!(|(
            from in booking_status_strategy(),
            to in booking_status_strategy()
        )| {
            if !from.occupies_slot() && from != to {
                prop_assert!(
                    !(StatusMachine::is_valid_transition(from, to) && to.occupies_slot()),
                    "{} must not re-acquire the slot via {}",
                    from,
                    to
                );
            }
        });
    }
}
