/// Alert acknowledgment lifecycle.
///
/// An alert is created unacknowledged and acknowledged exactly once. The
/// transition stamps who acknowledged it and when, and cannot be undone or
/// repeated: a second acknowledgment is an invalid-state error, not a no-op.
///
/// # Clock injection
/// `acknowledge_at` takes a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally, so tests can pin acknowledgment times without
/// mocking.

use chrono::{DateTime, Utc};

use crate::model::Alert;

/// Errors from alert state transitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlertError {
    #[error("alert {id} is already acknowledged")]
    AlreadyAcknowledged { id: String },
}

/// Marks `alert` as acknowledged by `user_id` at `now`.
///
/// Leaves the alert untouched and returns `AlreadyAcknowledged` if it was
/// acknowledged before.
pub fn acknowledge_at(alert: &mut Alert, user_id: &str, now: DateTime<Utc>) -> Result<(), AlertError> {
    if alert.acknowledged {
        return Err(AlertError::AlreadyAcknowledged { id: alert.id.clone() });
    }
    alert.acknowledged = true;
    alert.acknowledged_by = Some(user_id.to_string());
    alert.acknowledged_at = Some(now);
    Ok(())
}

/// Convenience wrapper that uses the real current time.
/// Use `acknowledge_at` in tests to keep them deterministic.
pub fn acknowledge(alert: &mut Alert, user_id: &str) -> Result<(), AlertError> {
    acknowledge_at(alert, user_id, Utc::now())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PARAM_TURBIDITY, Status};
    use chrono::TimeZone;

    fn open_alert() -> Alert {
        Alert {
            id: "alert-1".to_string(),
            reading_id: "reading-1".to_string(),
            parameter: PARAM_TURBIDITY.to_string(),
            level: Status::Warning,
            message: "Turbidity 5.2 NTU exceeds maximum (5 NTU)".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    /// A fixed "now" used across all tests: 2024-05-01 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_acknowledge_stamps_user_and_time() {
        let mut alert = open_alert();
        acknowledge_at(&mut alert, "user-4", fixed_now()).expect("open alert should acknowledge");

        assert!(alert.acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("user-4"));
        assert_eq!(alert.acknowledged_at, Some(fixed_now()));
    }

    #[test]
    fn test_second_acknowledgment_is_rejected() {
        let mut alert = open_alert();
        acknowledge_at(&mut alert, "user-4", fixed_now()).expect("first acknowledgment succeeds");

        let later = fixed_now() + chrono::Duration::hours(1);
        let result = acknowledge_at(&mut alert, "user-1", later);
        assert_eq!(
            result,
            Err(AlertError::AlreadyAcknowledged { id: "alert-1".to_string() }),
            "acknowledgment is not idempotent"
        );
    }

    #[test]
    fn test_rejected_acknowledgment_keeps_original_stamp() {
        let mut alert = open_alert();
        acknowledge_at(&mut alert, "user-4", fixed_now()).expect("first acknowledgment succeeds");
        let _ = acknowledge_at(&mut alert, "user-1", fixed_now() + chrono::Duration::days(1));

        assert_eq!(alert.acknowledged_by.as_deref(), Some("user-4"));
        assert_eq!(alert.acknowledged_at, Some(fixed_now()));
    }

    #[test]
    fn test_acknowledge_uses_current_time() {
        let mut alert = open_alert();
        let before = Utc::now();
        acknowledge(&mut alert, "user-5").expect("open alert should acknowledge");
        let stamped = alert.acknowledged_at.expect("time should be stamped");
        assert!(stamped >= before);
    }
}
