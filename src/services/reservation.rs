use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Actor, ActorRole, CounterDelta, Page, PageRequest, Payment, Reservation, ReservationFilter,
    ReservationStatus, ServiceDetails, StatusChange, Window,
};
use crate::services::conflict::ConflictScope;
use crate::services::lifecycle;
use crate::services::store::{BookingStore, ProviderDirectory};

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub requester_id: String,
    pub provider_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub details: ServiceDetails,
    /// Store without claiming the slot; the requester submits it later.
    pub draft: bool,
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub reservation_id: String,
    pub actor: Actor,
    pub target: ReservationStatus,
    pub reason: Option<String>,
}

pub struct ReservationService {
    providers: Arc<dyn ProviderDirectory>,
    bookings: Arc<dyn BookingStore>,
    timeout: Duration,
    max_window: chrono::Duration,
}

impl ReservationService {
    pub fn new(
        providers: Arc<dyn ProviderDirectory>,
        bookings: Arc<dyn BookingStore>,
        timeout: Duration,
        max_window: chrono::Duration,
    ) -> Self {
        Self {
            providers,
            bookings,
            timeout,
            max_window,
        }
    }

    fn validate_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Window, AppError> {
        let window = Window::new(start, end)?;
        if window.start < Utc::now() {
            return Err(AppError::Validation(
                "window start is in the past".to_string(),
            ));
        }
        if window.duration() > self.max_window {
            return Err(AppError::Validation(format!(
                "window is longer than {} hours",
                self.max_window.num_hours()
            )));
        }
        Ok(window)
    }

    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, AppError> {
        if req.requester_id.trim().is_empty() || req.provider_id.trim().is_empty() {
            return Err(AppError::Validation(
                "requester_id and provider_id are required".to_string(),
            ));
        }
        let window = self.validate_window(req.start, req.end)?;

        let provider = self
            .providers
            .get_provider(&req.provider_id, self.timeout)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound(format!("provider {}", req.provider_id)))?;

        if provider.counters.is_busy {
            return Err(AppError::ProviderBusy {
                next_available_at: provider.counters.next_available_at,
            });
        }

        let payment = Payment::snapshot(provider.hourly_rate_cents, &window)?;
        let now = Utc::now();
        let status = if req.draft {
            ReservationStatus::Draft
        } else {
            ReservationStatus::Pending
        };
        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            requester_id: req.requester_id.clone(),
            provider_id: provider.id.clone(),
            window,
            status,
            status_history: vec![StatusChange {
                status,
                actor_id: req.requester_id,
                actor_role: ActorRole::Requester,
                reason: None,
                at: now,
            }],
            payment,
            details: req.details,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let (guard, delta) = if req.draft {
            (None, CounterDelta::default())
        } else {
            (
                Some(ConflictScope::Claims),
                lifecycle::side_effects(ReservationStatus::Draft, ReservationStatus::Pending),
            )
        };

        let reservation = self
            .bookings
            .insert_checked(reservation, guard, delta, self.timeout)
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::SchedulingConflict) {
                    tracing::warn!(
                        provider_id = %provider.id,
                        start = %window.start,
                        end = %window.end,
                        "reservation request overlaps an existing commitment"
                    );
                }
            })?;

        tracing::info!(
            reservation_id = %reservation.id,
            provider_id = %reservation.provider_id,
            requester_id = %reservation.requester_id,
            status = reservation.status.as_str(),
            "reservation created"
        );
        Ok(reservation)
    }

    pub async fn transition_reservation(
        &self,
        req: TransitionRequest,
    ) -> Result<Reservation, AppError> {
        let current = self
            .bookings
            .get(&req.reservation_id, self.timeout)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reservation {}", req.reservation_id)))?;

        let update = lifecycle::plan(&current, req.target, &req.actor, req.reason, Utc::now())
            .inspect_err(|e| {
                tracing::warn!(
                    reservation_id = %current.id,
                    actor_id = %req.actor.id,
                    actor_role = req.actor.role.as_str(),
                    from = current.status.as_str(),
                    to = req.target.as_str(),
                    error = %e,
                    "transition refused"
                );
            })?;

        if update.change.status == ReservationStatus::Pending {
            self.check_submission(&current).await?;
        }

        let updated = self.bookings.update_if_status(update, self.timeout).await?;

        tracing::info!(
            reservation_id = %updated.id,
            provider_id = %updated.provider_id,
            from = current.status.as_str(),
            to = updated.status.as_str(),
            actor_role = req.actor.role.as_str(),
            "reservation transitioned"
        );
        Ok(updated)
    }

    /// A submitted draft becomes a live request, so it must still pass the rules a fresh
    /// request would: the window has not started and the provider is active and free.
    async fn check_submission(&self, draft: &Reservation) -> Result<(), AppError> {
        if draft.window.start < Utc::now() {
            return Err(AppError::Validation(
                "window start is in the past".to_string(),
            ));
        }

        let provider = self
            .providers
            .get_provider(&draft.provider_id, self.timeout)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound(format!("provider {}", draft.provider_id)))?;
        if provider.counters.is_busy {
            return Err(AppError::ProviderBusy {
                next_available_at: provider.counters.next_available_at,
            });
        }
        Ok(())
    }

    /// Lists what `owner` is a party to; admins see everything.
    pub async fn list_reservations(
        &self,
        owner: &Actor,
        status: Option<ReservationStatus>,
        page: PageRequest,
    ) -> Result<Page<Reservation>, AppError> {
        let filter = ReservationFilter {
            owner: match owner.role {
                ActorRole::Admin => None,
                role => Some((role, owner.id.clone())),
            },
            status,
        };
        self.bookings.list(filter, page, self.timeout).await
    }

    pub async fn get_reservation(&self, id: &str, actor: &Actor) -> Result<Reservation, AppError> {
        let reservation = self
            .bookings
            .get(id, self.timeout)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("reservation {id}")))?;

        let visible = match actor.role {
            ActorRole::Requester => reservation.requester_id == actor.id,
            ActorRole::Provider => reservation.provider_id == actor.id,
            ActorRole::Admin => true,
        };
        if !visible {
            return Err(AppError::Forbidden(format!(
                "{} {} is not a party to reservation {id}",
                actor.role.as_str(),
                actor.id
            )));
        }
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, queries};
    use crate::services::store::SqliteStore;
    use chrono::{Duration as ChronoDuration, NaiveTime, TimeZone};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn setup() -> (Arc<SqliteStore>, ReservationService) {
        let conn = db::init_db(":memory:", TIMEOUT).unwrap();
        queries::upsert_provider(&conn, "prov", "Pat", 3000, true).unwrap();
        queries::upsert_provider(&conn, "retired", "Old Pat", 3000, false).unwrap();
        let store = Arc::new(SqliteStore::new(conn));
        let service = ReservationService::new(
            store.clone(),
            store.clone(),
            TIMEOUT,
            ChronoDuration::hours(24),
        );
        (store, service)
    }

    /// `hour:00` UTC one week from today.
    fn day_d(hour: u32) -> DateTime<Utc> {
        let date = (Utc::now() + ChronoDuration::days(7)).date_naive();
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap();
        Utc.from_utc_datetime(&date.and_time(time))
    }

    fn request(start: u32, end: u32) -> NewReservation {
        NewReservation {
            requester_id: "req".to_string(),
            provider_id: "prov".to_string(),
            start: day_d(start),
            end: day_d(end),
            details: ServiceDetails::default(),
            draft: false,
        }
    }

    fn requester() -> Actor {
        Actor::new("req", ActorRole::Requester)
    }

    fn provider() -> Actor {
        Actor::new("prov", ActorRole::Provider)
    }

    async fn move_to(
        service: &ReservationService,
        id: &str,
        actor: Actor,
        target: ReservationStatus,
    ) -> Result<Reservation, AppError> {
        service
            .transition_reservation(TransitionRequest {
                reservation_id: id.to_string(),
                actor,
                target,
                reason: None,
            })
            .await
    }

    async fn confirmed(service: &ReservationService, start: u32, end: u32) -> Reservation {
        let r = service.create_reservation(request(start, end)).await.unwrap();
        move_to(service, &r.id, provider(), ReservationStatus::Accepted).await.unwrap();
        move_to(service, &r.id, requester(), ReservationStatus::Confirmed).await.unwrap()
    }

    async fn counters(store: &SqliteStore) -> crate::models::ProviderCounters {
        store.get_provider("prov", TIMEOUT).await.unwrap().unwrap().counters
    }

    #[tokio::test]
    async fn test_create_snapshots_rate_and_counts_pending() {
        let (store, service) = setup();
        let r = service.create_reservation(request(9, 11)).await.unwrap();

        assert_eq!(r.status, ReservationStatus::Pending);
        assert_eq!(r.payment.hourly_rate_cents, 3000);
        assert_eq!(r.payment.estimated_total_cents, 6000);
        assert_eq!(r.status_history.len(), 1);
        assert_eq!(counters(&store).await.pending_requests, 1);

        store
            .upsert_provider("prov".to_string(), "Pat".to_string(), 9999, true, TIMEOUT)
            .await
            .unwrap();
        let reloaded = service.get_reservation(&r.id, &requester()).await.unwrap();
        assert_eq!(reloaded.payment.hourly_rate_cents, 3000);
    }

    #[tokio::test]
    async fn test_create_validation_errors() {
        let (_store, service) = setup();

        let inverted = request(11, 9);
        assert!(matches!(service.create_reservation(inverted).await, Err(AppError::Validation(_))));

        let mut past = request(9, 10);
        past.start = Utc::now() - ChronoDuration::hours(2);
        past.end = Utc::now() - ChronoDuration::hours(1);
        assert!(matches!(service.create_reservation(past).await, Err(AppError::Validation(_))));

        let mut too_long = request(9, 10);
        too_long.end = too_long.start + ChronoDuration::hours(30);
        assert!(matches!(service.create_reservation(too_long).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_unknown_or_inactive_provider() {
        let (_store, service) = setup();

        let mut missing = request(9, 10);
        missing.provider_id = "ghost".to_string();
        assert!(matches!(service.create_reservation(missing).await, Err(AppError::NotFound(_))));

        let mut retired = request(9, 10);
        retired.provider_id = "retired".to_string();
        assert!(matches!(service.create_reservation(retired).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_scenario_a_overlap_with_confirmed_is_conflict() {
        let (_store, service) = setup();
        confirmed(&service, 10, 12).await;

        let result = service.create_reservation(request(11, 13)).await;
        assert!(matches!(result, Err(AppError::SchedulingConflict)));
    }

    #[tokio::test]
    async fn test_scenario_b_back_to_back_is_accepted() {
        let (_store, service) = setup();
        confirmed(&service, 10, 12).await;

        let r = service.create_reservation(request(12, 13)).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_scenario_d_accept_then_cancel_after_active() {
        let (store, service) = setup();
        let r = service.create_reservation(request(9, 10)).await.unwrap();
        let before = counters(&store).await;

        let accepted = move_to(&service, &r.id, provider(), ReservationStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.status, ReservationStatus::Accepted);
        let after = counters(&store).await;
        assert_eq!(after.pending_requests, before.pending_requests - 1);
        assert_eq!(after.booking_count, before.booking_count + 1);

        move_to(&service, &r.id, requester(), ReservationStatus::Confirmed).await.unwrap();
        move_to(&service, &r.id, provider(), ReservationStatus::Active).await.unwrap();
        assert!(counters(&store).await.is_busy);

        let cancel = move_to(&service, &r.id, requester(), ReservationStatus::Cancelled).await;
        assert!(matches!(cancel, Err(AppError::InvalidTransition { .. })));

        let still = service.get_reservation(&r.id, &requester()).await.unwrap();
        assert_eq!(still.status, ReservationStatus::Active);
        assert_eq!(still.status_history.len(), 4);
    }

    #[tokio::test]
    async fn test_scenario_e_cancel_pending() {
        let (store, service) = setup();
        let r = service.create_reservation(request(9, 10)).await.unwrap();
        let before = counters(&store).await;

        move_to(&service, &r.id, requester(), ReservationStatus::Cancelled).await.unwrap();

        let after = counters(&store).await;
        assert_eq!(after.pending_requests, before.pending_requests - 1);
        assert_eq!(after.booking_count, before.booking_count);
        assert_eq!(after.completed_bookings, before.completed_bookings);
        assert_eq!(after.is_busy, before.is_busy);
    }

    #[tokio::test]
    async fn test_busy_provider_is_advisory_error() {
        let (store, service) = setup();
        let r = confirmed(&service, 9, 10).await;
        move_to(&service, &r.id, provider(), ReservationStatus::Active).await.unwrap();

        let result = service.create_reservation(request(14, 15)).await;
        match result {
            Err(AppError::ProviderBusy { next_available_at }) => {
                assert_eq!(next_available_at, Some(day_d(10)));
            }
            other => panic!("expected ProviderBusy, got {other:?}"),
        }

        move_to(&service, &r.id, provider(), ReservationStatus::Completed).await.unwrap();
        let c = counters(&store).await;
        assert!(!c.is_busy);
        assert_eq!(c.completed_bookings, 1);
        assert!(service.create_reservation(request(14, 15)).await.is_ok());
    }

    #[tokio::test]
    async fn test_reissued_transition_does_not_double_count() {
        let (store, service) = setup();
        let r = service.create_reservation(request(9, 10)).await.unwrap();

        move_to(&service, &r.id, provider(), ReservationStatus::Accepted).await.unwrap();
        let again = move_to(&service, &r.id, provider(), ReservationStatus::Accepted).await;
        assert!(matches!(again, Err(AppError::InvalidTransition { .. })));

        let c = counters(&store).await;
        assert_eq!(c.pending_requests, 0);
        assert_eq!(c.booking_count, 1);
    }

    #[tokio::test]
    async fn test_forbidden_transition_leaves_reservation_untouched() {
        let (_store, service) = setup();
        let r = service.create_reservation(request(9, 10)).await.unwrap();

        let result = move_to(&service, &r.id, requester(), ReservationStatus::Accepted).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let still = service.get_reservation(&r.id, &provider()).await.unwrap();
        assert_eq!(still.status, ReservationStatus::Pending);
        assert_eq!(still.version, 1);
        assert_eq!(still.status_history.len(), 1);
    }

    #[tokio::test]
    async fn test_draft_submission_claims_slot() {
        let (store, service) = setup();
        let mut draft = request(9, 10);
        draft.draft = true;
        let d = service.create_reservation(draft).await.unwrap();
        assert_eq!(d.status, ReservationStatus::Draft);
        assert_eq!(counters(&store).await.pending_requests, 0);

        let competitor = service.create_reservation(request(9, 10)).await.unwrap();

        let submit = move_to(&service, &d.id, requester(), ReservationStatus::Pending).await;
        assert!(matches!(submit, Err(AppError::SchedulingConflict)));

        move_to(&service, &competitor.id, provider(), ReservationStatus::Rejected).await.unwrap();
        let submitted = move_to(&service, &d.id, requester(), ReservationStatus::Pending)
            .await
            .unwrap();
        assert_eq!(submitted.status, ReservationStatus::Pending);
        assert_eq!(counters(&store).await.pending_requests, 1);
    }

    #[tokio::test]
    async fn test_overflowing_rate_is_rejected_before_insert() {
        let (store, service) = setup();
        store
            .upsert_provider("prov".to_string(), "Pat".to_string(), i64::MAX / 10, true, TIMEOUT)
            .await
            .unwrap();

        let result = service.create_reservation(request(9, 11)).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(counters(&store).await.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_draft_whose_window_has_started_cannot_be_submitted() {
        let (store, service) = setup();
        let start = Utc::now() - ChronoDuration::minutes(5);
        let window = Window::new(start, start + ChronoDuration::hours(1)).unwrap();
        let draft = Reservation {
            id: "stale".to_string(),
            requester_id: "req".to_string(),
            provider_id: "prov".to_string(),
            window,
            status: ReservationStatus::Draft,
            status_history: vec![],
            payment: Payment::snapshot(3000, &window).unwrap(),
            details: ServiceDetails::default(),
            version: 1,
            created_at: start,
            updated_at: start,
        };
        store
            .insert_checked(draft, None, CounterDelta::default(), TIMEOUT)
            .await
            .unwrap();

        let submit = move_to(&service, "stale", requester(), ReservationStatus::Pending).await;
        assert!(matches!(submit, Err(AppError::Validation(_))));

        let still = service.get_reservation("stale", &requester()).await.unwrap();
        assert_eq!(still.status, ReservationStatus::Draft);
        assert_eq!(counters(&store).await.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_draft_cannot_be_submitted_while_provider_is_busy() {
        let (store, service) = setup();
        let mut draft = request(14, 15);
        draft.draft = true;
        let d = service.create_reservation(draft).await.unwrap();

        let r = confirmed(&service, 9, 10).await;
        move_to(&service, &r.id, provider(), ReservationStatus::Active).await.unwrap();

        let submit = move_to(&service, &d.id, requester(), ReservationStatus::Pending).await;
        assert!(matches!(submit, Err(AppError::ProviderBusy { .. })));

        move_to(&service, &r.id, provider(), ReservationStatus::Completed).await.unwrap();
        let submitted = move_to(&service, &d.id, requester(), ReservationStatus::Pending)
            .await
            .unwrap();
        assert_eq!(submitted.status, ReservationStatus::Pending);
        assert_eq!(counters(&store).await.pending_requests, 1);
    }

    #[tokio::test]
    async fn test_get_and_list_respect_ownership() {
        let (_store, service) = setup();
        let r = service.create_reservation(request(9, 10)).await.unwrap();
        let mut other = request(11, 12);
        other.requester_id = "someone".to_string();
        service.create_reservation(other).await.unwrap();

        let stranger = Actor::new("nosy", ActorRole::Requester);
        assert!(matches!(
            service.get_reservation(&r.id, &stranger).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.get_reservation("missing", &requester()).await,
            Err(AppError::NotFound(_))
        ));

        let mine = service
            .list_reservations(&requester(), None, PageRequest::new(1, 10))
            .await
            .unwrap();
        assert_eq!(mine.total, 1);

        let theirs = service
            .list_reservations(&provider(), Some(ReservationStatus::Pending), PageRequest::new(1, 10))
            .await
            .unwrap();
        assert_eq!(theirs.total, 2);

        let admin = Actor::new("ops", ActorRole::Admin);
        let all = service
            .list_reservations(&admin, Some(ReservationStatus::Cancelled), PageRequest::new(1, 10))
            .await
            .unwrap();
        assert_eq!(all.total, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scenario_c_concurrent_creates_for_same_slot() {
        let (store, service) = setup();
        let service = Arc::new(service);

        let mut handles = vec![];
        for i in 0..2 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let mut req = request(9, 10);
                req.requester_id = format!("req-{i}");
                service.create_reservation(req).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(r) => {
                    assert_eq!(r.status, ReservationStatus::Pending);
                    ok += 1;
                }
                Err(AppError::SchedulingConflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(counters(&store).await.pending_requests, 1);
    }
}
