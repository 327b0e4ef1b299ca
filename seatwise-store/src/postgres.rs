use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use seatwise_core::model::{
    ClassOffering, OfferingStatus, PaymentRecord, Reservation, ReservationEvent,
    ReservationStatus,
};
use seatwise_core::store::{
    AdmissionOutcome, OfferingFilter, OfferingUpdateOutcome, ReservationFilter,
    ReservationStore, StoreError, StoreResult, TransitionChange, TransitionOutcome,
};

/// PostgreSQL-backed store.
///
/// Admission takes a row-level lock on the class offering (`FOR UPDATE`)
/// for the duration of the check-and-insert, so two concurrent bookings for
/// the last seat serialize on the class row. Status transitions run inside
/// a transaction that re-reads the reservation row under lock.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed.");
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    let transient = matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    ) || matches!(
        &e,
        // Serialization failure and deadlock are retryable.
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001" | "40P01"))
    );
    if transient {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Internal(e.to_string())
    }
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: String) -> StoreResult<T> {
    raw.parse().map_err(StoreError::Internal)
}

fn offering_from_row(row: &PgRow) -> StoreResult<ClassOffering> {
    Ok(ClassOffering {
        id: row.try_get("id").map_err(store_err)?,
        teacher_id: row.try_get("teacher_id").map_err(store_err)?,
        title: row.try_get("title").map_err(store_err)?,
        description: row.try_get("description").map_err(store_err)?,
        subject: row.try_get("subject").map_err(store_err)?,
        date: row.try_get("date").map_err(store_err)?,
        start_time: row.try_get("start_time").map_err(store_err)?,
        end_time: row.try_get("end_time").map_err(store_err)?,
        room: row.try_get("room").map_err(store_err)?,
        location: row.try_get("location").map_err(store_err)?,
        capacity: row.try_get::<i32, _>("capacity").map_err(store_err)? as u32,
        price_cents: row.try_get("price_cents").map_err(store_err)?,
        status: parse_status(row.try_get::<String, _>("status").map_err(store_err)?)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
    })
}

fn reservation_from_row(row: &PgRow) -> StoreResult<Reservation> {
    Ok(Reservation {
        id: row.try_get("id").map_err(store_err)?,
        student_id: row.try_get("student_id").map_err(store_err)?,
        class_id: row.try_get("class_id").map_err(store_err)?,
        status: parse_status(row.try_get::<String, _>("status").map_err(store_err)?)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        hold_deadline: row.try_get("hold_deadline").map_err(store_err)?,
        confirmed_at: row.try_get("confirmed_at").map_err(store_err)?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<PaymentRecord> {
    Ok(PaymentRecord {
        id: row.try_get("id").map_err(store_err)?,
        reservation_id: row.try_get("reservation_id").map_err(store_err)?,
        amount_cents: row.try_get("amount_cents").map_err(store_err)?,
        reference: row.try_get("reference").map_err(store_err)?,
        status: parse_status(row.try_get::<String, _>("status").map_err(store_err)?)?,
        captured_at: row.try_get("captured_at").map_err(store_err)?,
    })
}

const OFFERING_COLS: &str = "id, teacher_id, title, description, subject, date, start_time, \
     end_time, room, location, capacity, price_cents, status, created_at";
const RESERVATION_COLS: &str =
    "id, student_id, class_id, status, created_at, hold_deadline, confirmed_at";

#[async_trait]
impl ReservationStore for PgStore {
    async fn insert_offering(&self, offering: ClassOffering) -> StoreResult<ClassOffering> {
        sqlx::query(
            "INSERT INTO class_offerings \
             (id, teacher_id, title, description, subject, date, start_time, end_time, \
              room, location, capacity, price_cents, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(offering.id)
        .bind(offering.teacher_id)
        .bind(&offering.title)
        .bind(&offering.description)
        .bind(&offering.subject)
        .bind(offering.date)
        .bind(offering.start_time)
        .bind(offering.end_time)
        .bind(&offering.room)
        .bind(&offering.location)
        .bind(offering.capacity as i32)
        .bind(offering.price_cents)
        .bind(offering.status.as_str())
        .bind(offering.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(offering)
    }

    async fn offering(&self, id: Uuid) -> StoreResult<Option<ClassOffering>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM class_offerings WHERE id = $1",
            OFFERING_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(offering_from_row).transpose()
    }

    async fn list_offerings(&self, filter: &OfferingFilter) -> StoreResult<Vec<ClassOffering>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM class_offerings \
             WHERE ($1::uuid IS NULL OR teacher_id = $1) \
               AND ($2::date IS NULL OR date = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY date ASC, start_time ASC",
            OFFERING_COLS
        ))
        .bind(filter.teacher_id)
        .bind(filter.date)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(offering_from_row).collect()
    }

    async fn update_offering(&self, offering: &ClassOffering) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE class_offerings SET title = $2, description = $3, subject = $4, \
             date = $5, start_time = $6, end_time = $7, room = $8, location = $9, \
             capacity = $10, price_cents = $11, status = $12 \
             WHERE id = $1",
        )
        .bind(offering.id)
        .bind(&offering.title)
        .bind(&offering.description)
        .bind(&offering.subject)
        .bind(offering.date)
        .bind(offering.start_time)
        .bind(offering.end_time)
        .bind(&offering.room)
        .bind(&offering.location)
        .bind(offering.capacity as i32)
        .bind(offering.price_cents)
        .bind(offering.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Internal(format!(
                "update of unknown offering {}",
                offering.id
            )));
        }
        Ok(())
    }

    async fn update_offering_checked(
        &self,
        offering: &ClassOffering,
        price_changed: bool,
    ) -> StoreResult<OfferingUpdateOutcome> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Same class-row lock admission takes, so the live count cannot
        // move between the checks and the write.
        let locked =
            sqlx::query("SELECT id FROM class_offerings WHERE id = $1 FOR UPDATE")
                .bind(offering.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err)?;
        if locked.is_none() {
            return Ok(OfferingUpdateOutcome::NotFound);
        }

        if price_changed {
            let booked: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE class_id = $1")
                    .bind(offering.id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(store_err)?;
            if booked > 0 {
                return Ok(OfferingUpdateOutcome::PriceLocked);
            }
        }

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations \
             WHERE class_id = $1 AND status IN ('HELD', 'CONFIRMED')",
        )
        .bind(offering.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        if (offering.capacity as i64) < live {
            return Ok(OfferingUpdateOutcome::CapacityBelowLive { live: live as u32 });
        }

        sqlx::query(
            "UPDATE class_offerings SET title = $2, description = $3, subject = $4, \
             date = $5, start_time = $6, end_time = $7, room = $8, location = $9, \
             capacity = $10, price_cents = $11, status = $12 \
             WHERE id = $1",
        )
        .bind(offering.id)
        .bind(&offering.title)
        .bind(&offering.description)
        .bind(&offering.subject)
        .bind(offering.date)
        .bind(offering.start_time)
        .bind(offering.end_time)
        .bind(&offering.room)
        .bind(&offering.location)
        .bind(offering.capacity as i32)
        .bind(offering.price_cents)
        .bind(offering.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(OfferingUpdateOutcome::Applied(offering.clone()))
    }

    async fn reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reservations \
             WHERE ($1::uuid IS NULL OR student_id = $1) \
               AND ($2::uuid IS NULL OR class_id = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC",
            RESERVATION_COLS
        ))
        .bind(filter.student_id)
        .bind(filter.class_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(reservation_from_row).collect()
    }

    async fn live_reservation_count(&self, class_id: Uuid) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations \
             WHERE class_id = $1 AND status IN ('HELD', 'CONFIRMED')",
        )
        .bind(class_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count as u32)
    }

    async fn admit_reservation(&self, candidate: Reservation) -> StoreResult<AdmissionOutcome> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Lock the class row; concurrent admissions for the same class
        // serialize here for the rest of the transaction.
        let offering_row = sqlx::query(
            "SELECT capacity, status FROM class_offerings WHERE id = $1 FOR UPDATE",
        )
        .bind(candidate.class_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let offering_row = match offering_row {
            Some(row) => row,
            None => return Ok(AdmissionOutcome::UnknownOffering),
        };
        let status: OfferingStatus =
            parse_status(offering_row.try_get::<String, _>("status").map_err(store_err)?)?;
        if status == OfferingStatus::Cancelled {
            return Ok(AdmissionOutcome::OfferingCancelled);
        }
        let capacity = offering_row.try_get::<i32, _>("capacity").map_err(store_err)? as u32;

        let duplicate: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations \
             WHERE class_id = $1 AND student_id = $2 AND status IN ('HELD', 'CONFIRMED')",
        )
        .bind(candidate.class_id)
        .bind(candidate.student_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        if duplicate > 0 {
            return Ok(AdmissionOutcome::AlreadyBooked);
        }

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations \
             WHERE class_id = $1 AND status IN ('HELD', 'CONFIRMED')",
        )
        .bind(candidate.class_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;
        if live as u32 >= capacity {
            return Ok(AdmissionOutcome::Full);
        }

        sqlx::query(
            "INSERT INTO reservations \
             (id, student_id, class_id, status, created_at, hold_deadline, confirmed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(candidate.id)
        .bind(candidate.student_id)
        .bind(candidate.class_id)
        .bind(candidate.status.as_str())
        .bind(candidate.created_at)
        .bind(candidate.hold_deadline)
        .bind(candidate.confirmed_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        append_event(&mut tx, candidate.id, None, candidate.status, candidate.created_at)
            .await?;

        tx.commit().await.map_err(store_err)?;
        Ok(AdmissionOutcome::Admitted(candidate))
    }

    async fn transition_reservation(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        change: TransitionChange,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM reservations WHERE id = $1 FOR UPDATE",
            RESERVATION_COLS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let current = match row {
            Some(row) => reservation_from_row(&row)?,
            None => return Ok(TransitionOutcome::NotFound),
        };
        if current.status != expected {
            return Ok(TransitionOutcome::StatusMismatch(current.status));
        }

        let next = match change {
            TransitionChange::Confirm { payment } => {
                match current.hold_deadline {
                    Some(deadline) if now < deadline => {}
                    _ => return Ok(TransitionOutcome::DeadlinePassed),
                }
                let existing: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM payment_records WHERE reservation_id = $1",
                )
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err)?;
                if existing > 0 {
                    return Ok(TransitionOutcome::AlreadySettled);
                }

                sqlx::query(
                    "INSERT INTO payment_records \
                     (id, reservation_id, amount_cents, reference, status, captured_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(payment.id)
                .bind(payment.reservation_id)
                .bind(payment.amount_cents)
                .bind(&payment.reference)
                .bind(payment.status.as_str())
                .bind(payment.captured_at)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;

                sqlx::query(
                    "UPDATE reservations SET status = 'CONFIRMED', confirmed_at = $2, \
                     hold_deadline = NULL WHERE id = $1",
                )
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;

                let mut r = current.clone();
                r.status = ReservationStatus::Confirmed;
                r.confirmed_at = Some(now);
                r.hold_deadline = None;
                r
            }
            TransitionChange::Release => {
                sqlx::query(
                    "UPDATE reservations SET status = 'RELEASED', hold_deadline = NULL \
                     WHERE id = $1",
                )
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;

                let mut r = current.clone();
                r.status = ReservationStatus::Released;
                r.hold_deadline = None;
                r
            }
            TransitionChange::Cancel => {
                sqlx::query(
                    "UPDATE payment_records SET status = 'REFUNDED' \
                     WHERE reservation_id = $1 AND status = 'CAPTURED'",
                )
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;

                sqlx::query(
                    "UPDATE reservations SET status = 'CANCELLED', hold_deadline = NULL \
                     WHERE id = $1",
                )
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;

                let mut r = current.clone();
                r.status = ReservationStatus::Cancelled;
                r.hold_deadline = None;
                r
            }
        };

        append_event(&mut tx, id, Some(current.status), next.status, now).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(TransitionOutcome::Applied(next))
    }

    async fn payment_for(&self, reservation_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        let row = sqlx::query(
            "SELECT id, reservation_id, amount_cents, reference, status, captured_at \
             FROM payment_records WHERE reservation_id = $1",
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn expired_held(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM reservations \
             WHERE status = 'HELD' AND hold_deadline <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(ids)
    }

    async fn events_for(&self, reservation_id: Uuid) -> StoreResult<Vec<ReservationEvent>> {
        let rows = sqlx::query(
            "SELECT reservation_id, prev_status, next_status, occurred_at \
             FROM reservation_events WHERE reservation_id = $1 ORDER BY seq ASC",
        )
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let prev: Option<String> = row.try_get("prev_status").map_err(store_err)?;
                Ok(ReservationEvent {
                    reservation_id: row.try_get("reservation_id").map_err(store_err)?,
                    prev_status: prev.map(parse_status::<ReservationStatus>).transpose()?,
                    next_status: parse_status(
                        row.try_get::<String, _>("next_status").map_err(store_err)?,
                    )?,
                    occurred_at: row.try_get("occurred_at").map_err(store_err)?,
                })
            })
            .collect()
    }
}

async fn append_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    reservation_id: Uuid,
    prev: Option<ReservationStatus>,
    next: ReservationStatus,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO reservation_events (reservation_id, prev_status, next_status, occurred_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(reservation_id)
    .bind(prev.map(|s| s.as_str()))
    .bind(next.as_str())
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(store_err)?;
    Ok(())
}
