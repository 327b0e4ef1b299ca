use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferingStatus {
    Scheduled,
    Cancelled,
}

impl OfferingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferingStatus::Scheduled => "SCHEDULED",
            OfferingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OfferingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(OfferingStatus::Scheduled),
            "CANCELLED" => Ok(OfferingStatus::Cancelled),
            other => Err(format!("unknown offering status: {}", other)),
        }
    }
}

/// A time-boxed class published by a teacher, with a fixed seat capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassOffering {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: Option<String>,
    pub location: Option<String>,
    pub capacity: u32,
    pub price_cents: i64,
    pub status: OfferingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Held,
    Confirmed,
    Released,
    Cancelled,
}

impl ReservationStatus {
    /// The statuses that occupy a seat. Occupancy is always derived from
    /// these, never tracked as a stored counter.
    pub const LIVE: [ReservationStatus; 2] =
        [ReservationStatus::Held, ReservationStatus::Confirmed];

    pub fn is_live(&self) -> bool {
        matches!(self, ReservationStatus::Held | ReservationStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "HELD",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HELD" => Ok(ReservationStatus::Held),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "RELEASED" => Ok(ReservationStatus::Released),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status: {}", other)),
        }
    }
}

/// A student's claim on one seat in a class offering.
///
/// A reservation is never deleted; it only moves through the status
/// state machine, so the row doubles as an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    /// Present only while the reservation is Held.
    pub hold_deadline: Option<DateTime<Utc>>,
    /// Present only once the reservation is Confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Build a Held reservation with its payment deadline.
    pub fn held(student_id: Uuid, class_id: Uuid, now: DateTime<Utc>, hold: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            class_id,
            status: ReservationStatus::Held,
            created_at: now,
            hold_deadline: Some(now + hold),
            confirmed_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Captured,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// The captured payment for a confirmed reservation (at most one each).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub amount_cents: i64,
    pub reference: Option<String>,
    pub status: PaymentStatus,
    pub captured_at: DateTime<Utc>,
}

/// One entry in a reservation's append-only transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationEvent {
    pub reservation_id: Uuid,
    pub prev_status: Option<ReservationStatus>,
    pub next_status: ReservationStatus,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_reservation_carries_deadline() {
        let now = Utc::now();
        let r = Reservation::held(Uuid::new_v4(), Uuid::new_v4(), now, Duration::hours(2));
        assert_eq!(r.status, ReservationStatus::Held);
        assert_eq!(r.hold_deadline, Some(now + Duration::hours(2)));
        assert!(r.confirmed_at.is_none());
        assert!(r.is_live());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            ReservationStatus::Held,
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("PENDING".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn test_live_statuses() {
        assert!(ReservationStatus::Held.is_live());
        assert!(ReservationStatus::Confirmed.is_live());
        assert!(!ReservationStatus::Released.is_live());
        assert!(!ReservationStatus::Cancelled.is_live());
    }
}
