//! Request admission for the download endpoints.
//!
//! Gates run in a fixed order: maintenance mode, then the block list, then
//! the per-client rate limiter. The first two are global and cheap; only a
//! request that passes both reaches the limiter and may consume a slot.
//! Requests for blocked videos are therefore never counted against the
//! client's quota.

mod block_list;
mod mode;
mod rate_limit;

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::settings::SettingsStore;

pub use block_list::BlockList;
pub use mode::ModeGate;
pub use rate_limit::{RateDecision, RateLimiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MaintenanceMode,
    Blocked,
    RateLimited,
}

impl RejectReason {
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::MaintenanceMode => StatusCode::SERVICE_UNAVAILABLE,
            Self::Blocked => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::MaintenanceMode => "MAINTENANCE_MODE",
            Self::Blocked => "VIDEO_BLOCKED",
            Self::RateLimited => "RATE_LIMITED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Only present for [`RejectReason::RateLimited`].
    pub retry_after: Option<Duration>,
}

impl Rejection {
    fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            retry_after: None,
        }
    }

    /// Retry hint rounded up to whole seconds, at least one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after.map(|retry_after| {
            let millis = retry_after.num_milliseconds().max(0) as u64;
            millis.div_ceil(1_000).max(1)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Admit,
    Reject(Rejection),
}

impl AdmissionVerdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Admit => None,
            Self::Reject(rejection) => Some(rejection.reason),
        }
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Self::Admit => Ok(()),
            Self::Reject(rejection) => Err(rejection),
        }
    }
}

#[derive(Debug)]
pub struct AdmissionController {
    settings: Arc<SettingsStore>,
    mode: ModeGate,
    block_list: BlockList,
    rate_limiter: RateLimiter,
}

impl AdmissionController {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            mode: ModeGate::new(Arc::clone(&settings)),
            block_list: BlockList::new(),
            rate_limiter: RateLimiter::new(Arc::clone(&settings)),
            settings,
        }
    }

    pub fn admit(&self, identity: &str, resource_id: &str, now: DateTime<Utc>) -> AdmissionVerdict {
        if !self.mode.is_service_enabled() {
            debug!("Rejected {identity:?} for {resource_id:?}: maintenance mode");
            return AdmissionVerdict::Reject(Rejection::new(RejectReason::MaintenanceMode));
        }

        if self.block_list.is_blocked(resource_id) {
            info!("Rejected {identity:?}: video {resource_id:?} is blocked");
            return AdmissionVerdict::Reject(Rejection::new(RejectReason::Blocked));
        }

        match self.rate_limiter.check_and_record(identity, now) {
            RateDecision::Allowed { remaining } => {
                debug!("Admitted {identity:?} for {resource_id:?} ({remaining} left in window)");
                AdmissionVerdict::Admit
            }
            RateDecision::Limited { retry_after } => {
                info!("Rejected {identity:?} for {resource_id:?}: rate limited");
                AdmissionVerdict::Reject(Rejection {
                    reason: RejectReason::RateLimited,
                    retry_after: Some(retry_after),
                })
            }
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn mode(&self) -> &ModeGate {
        &self.mode
    }

    pub fn block_list(&self) -> &BlockList {
        &self.block_list
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::settings::SettingsUpdate;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn controller(rate_limit: u32, window_seconds: u64) -> AdmissionController {
        let settings = SettingsStore::default();
        settings
            .update(SettingsUpdate {
                rate_limit: Some(rate_limit),
                window_seconds: Some(window_seconds),
                ..SettingsUpdate::default()
            })
            .unwrap();
        AdmissionController::new(Arc::new(settings))
    }

    fn set_maintenance(controller: &AdmissionController, maintenance: bool) {
        controller
            .settings()
            .update(SettingsUpdate {
                maintenance: Some(maintenance),
                ..SettingsUpdate::default()
            })
            .unwrap();
    }

    #[test]
    fn limit_three_per_minute_scenario() {
        let controller = controller(3, 60);

        for second in 0..3 {
            assert_eq!(controller.admit("A", "video", at(second)), AdmissionVerdict::Admit);
        }

        let verdict = controller.admit("A", "video", at(3));
        assert_eq!(verdict.reason(), Some(RejectReason::RateLimited));
        let AdmissionVerdict::Reject(rejection) = verdict else {
            unreachable!();
        };
        assert_eq!(rejection.retry_after, Some(Duration::seconds(57)));
        assert_eq!(rejection.retry_after_seconds(), Some(57));

        assert_eq!(controller.admit("A", "video", at(61)), AdmissionVerdict::Admit);
    }

    #[test]
    fn maintenance_preempts_everything_without_consuming_slots() {
        let controller = controller(1, 60);
        controller.block_list().block("blocked");
        set_maintenance(&controller, true);

        for second in 0..5 {
            let verdict = controller.admit("A", "video", at(second));
            assert_eq!(verdict.reason(), Some(RejectReason::MaintenanceMode));
            let verdict = controller.admit("A", "blocked", at(second));
            assert_eq!(verdict.reason(), Some(RejectReason::MaintenanceMode));
        }
        assert_eq!(controller.rate_limiter().active_identities(), 0);

        set_maintenance(&controller, false);
        assert!(controller.admit("A", "video", at(6)).is_admitted());
    }

    #[test]
    fn blocked_requests_do_not_consume_slots() {
        let controller = controller(1, 60);
        controller.block_list().block("blocked");

        for second in 0..5 {
            let verdict = controller.admit("A", "blocked", at(second));
            assert_eq!(verdict.reason(), Some(RejectReason::Blocked));
        }

        assert!(controller.admit("A", "video", at(6)).is_admitted());
        assert_eq!(
            controller.admit("A", "other", at(7)).reason(),
            Some(RejectReason::RateLimited)
        );
    }

    #[test]
    fn blocked_wins_over_rate_limit() {
        let controller = controller(1, 60);
        assert!(controller.admit("A", "video", at(0)).is_admitted());

        controller.block_list().block("video");
        assert_eq!(
            controller.admit("A", "video", at(1)).reason(),
            Some(RejectReason::Blocked)
        );

        controller.block_list().unblock("video");
        assert_eq!(
            controller.admit("A", "video", at(2)).reason(),
            Some(RejectReason::RateLimited)
        );
    }

    #[test]
    fn only_rate_limit_rejections_carry_a_hint() {
        let controller = controller(0, 60);
        let AdmissionVerdict::Reject(rejection) = controller.admit("A", "video", at(0)) else {
            panic!("a zero limit admits nothing");
        };
        assert_eq!(rejection.reason, RejectReason::RateLimited);
        assert_eq!(rejection.retry_after_seconds(), Some(60));

        set_maintenance(&controller, true);
        let AdmissionVerdict::Reject(rejection) = controller.admit("A", "video", at(0)) else {
            panic!("maintenance admits nothing");
        };
        assert_eq!(rejection.retry_after, None);
        assert_eq!(rejection.retry_after_seconds(), None);
    }

    #[test]
    fn retry_hint_rounds_up() {
        let rejection = Rejection {
            reason: RejectReason::RateLimited,
            retry_after: Some(Duration::milliseconds(1_200)),
        };
        assert_eq!(rejection.retry_after_seconds(), Some(2));

        let rejection = Rejection {
            reason: RejectReason::RateLimited,
            retry_after: Some(Duration::zero()),
        };
        assert_eq!(rejection.retry_after_seconds(), Some(1));
    }

    #[test]
    fn reasons_map_to_http_statuses() {
        assert_eq!(
            RejectReason::MaintenanceMode.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(RejectReason::Blocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            RejectReason::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn concurrent_admissions_for_one_client() {
        let controller = controller(10, 3_600);
        let now = at(0);

        let admitted: usize = std::thread::scope(|scope| {
            let handles = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..20)
                            .filter(|_| controller.admit("A", "video", now).is_admitted())
                            .count()
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|handle| handle.join().unwrap()).sum()
        });

        assert_eq!(admitted, 10);
    }
}
