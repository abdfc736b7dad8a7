//! Two-window API quota accounting.
//!
//! Every remote call that bills against the service quota is checked against
//! two independent ceilings: a per-session ceiling (one process run) and a
//! daily ceiling keyed to the quota-reset timezone's calendar date. The
//! tracker is a pure accounting layer over the state store; the store owns
//! the counters and the day-rollover logic.

use tracing::warn;

use crate::config::{ALBUM_LIST_PAGE_SIZE, DEFAULT_MAX_DAILY_REQUESTS};
use crate::state::SharedState;

/// Which ceiling (if any) has been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    None,
    Daily,
    Session,
}

/// Operations with a known request cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// One raw byte transfer plus one media-item creation. The byte transfer
    /// itself does not bill against the quota, so this is a conservative
    /// estimate.
    UploadFile,
    CreateAlbum,
    AddToAlbum,
    /// Paged listing; one request per page of 50 albums.
    ListAlbums { estimated_albums: u64 },
}

impl Operation {
    /// Estimated request cost of this operation.
    pub fn cost(self) -> u64 {
        match self {
            Operation::UploadFile => 2,
            Operation::CreateAlbum | Operation::AddToAlbum => 1,
            Operation::ListAlbums { estimated_albums } => {
                estimated_albums.div_ceil(ALBUM_LIST_PAGE_SIZE).max(1)
            }
        }
    }
}

/// Usage snapshot for one quota window.
#[derive(Debug, Clone, Copy)]
pub struct WindowStatus {
    pub used: u64,
    pub limit: u64,
}

impl WindowStatus {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn percentage(&self) -> f64 {
        if self.limit == 0 {
            return 100.0;
        }
        (self.used as f64 / self.limit as f64) * 100.0
    }
}

/// Combined status of both quota windows.
#[derive(Debug, Clone, Copy)]
pub struct QuotaStatus {
    pub daily: WindowStatus,
    pub session: WindowStatus,
}

/// Tracks request usage against the session and daily ceilings.
#[derive(Clone)]
pub struct QuotaTracker {
    state: SharedState,
    max_session_requests: u64,
    max_daily_requests: u64,
}

impl QuotaTracker {
    pub fn new(state: SharedState, max_session_requests: u64) -> Self {
        Self::with_daily_limit(state, max_session_requests, DEFAULT_MAX_DAILY_REQUESTS)
    }

    pub fn with_daily_limit(
        state: SharedState,
        max_session_requests: u64,
        max_daily_requests: u64,
    ) -> Self {
        Self {
            state,
            max_session_requests,
            max_daily_requests,
        }
    }

    /// Record `count` requests against both windows, then re-check limits.
    ///
    /// Returns `true` if the caller may continue. When a ceiling is now
    /// reached, a stop reason is recorded on the state (distinguishing the
    /// daily window, which resets tomorrow, from the session window, which
    /// resets with the next invocation) and the result is `false`.
    pub async fn record_requests(&self, count: u64) -> bool {
        let mut state = self.state.lock().await;
        state.roll_daily_quota();
        state.add_api_requests(count);

        let limit = self.limit_reached(state.session_request_count(), state.daily_request_count());
        if limit == QuotaLimit::None {
            return true;
        }

        let reason = self.stop_reason(
            limit,
            state.session_request_count(),
            state.daily_request_count(),
        );
        warn!("Quota limit reached: {reason}");
        state.set_stop_reason(&reason);
        false
    }

    /// Whether `count` more requests fit under both ceilings.
    ///
    /// Rolls the daily window first so the check never compares against a
    /// stale quota date.
    pub async fn can_make_requests(&self, count: u64) -> bool {
        let mut state = self.state.lock().await;
        state.roll_daily_quota();
        let session = state.session_request_count();
        let daily = state.daily_request_count();
        session + count <= self.max_session_requests && daily + count <= self.max_daily_requests
    }

    /// Which ceiling, if any, has already been reached.
    pub async fn check_limits(&self) -> QuotaLimit {
        let mut state = self.state.lock().await;
        state.roll_daily_quota();
        self.limit_reached(state.session_request_count(), state.daily_request_count())
    }

    /// Check whether an operation's estimated cost fits under both ceilings.
    ///
    /// On denial the reason distinguishes "a ceiling is already reached" from
    /// "not enough headroom remains for this specific operation".
    pub async fn can_perform(&self, operation: Operation) -> Result<(), String> {
        let estimated = operation.cost();

        let (session, daily) = {
            let mut state = self.state.lock().await;
            state.roll_daily_quota();
            (state.session_request_count(), state.daily_request_count())
        };

        if session + estimated <= self.max_session_requests
            && daily + estimated <= self.max_daily_requests
        {
            return Ok(());
        }

        let limit = self.limit_reached(session, daily);
        if limit != QuotaLimit::None {
            return Err(self.stop_reason(limit, session, daily));
        }

        let daily_remaining = self.max_daily_requests.saturating_sub(daily);
        let session_remaining = self.max_session_requests.saturating_sub(session);
        if daily_remaining < estimated {
            Err(format!(
                "Not enough daily quota remaining ({daily_remaining} < {estimated})"
            ))
        } else {
            Err(format!(
                "Not enough session quota remaining ({session_remaining} < {estimated})"
            ))
        }
    }

    /// Current usage of both windows.
    pub async fn status(&self) -> QuotaStatus {
        let state = self.state.lock().await;
        QuotaStatus {
            daily: WindowStatus {
                used: state.daily_request_count(),
                limit: self.max_daily_requests,
            },
            session: WindowStatus {
                used: state.session_request_count(),
                limit: self.max_session_requests,
            },
        }
    }

    /// Human-readable status block for the final report.
    pub async fn summary(&self) -> String {
        let status = self.status().await;
        let remaining = status
            .daily
            .remaining()
            .min(status.session.remaining());
        format!(
            "Quota status:\n   Daily: {}/{} ({:.1}%)\n   Session: {}/{} ({:.1}%)\n   Remaining: {} requests",
            status.daily.used,
            status.daily.limit,
            status.daily.percentage(),
            status.session.used,
            status.session.limit,
            status.session.percentage(),
            remaining
        )
    }

    /// A warning line when either window is above 80% usage.
    pub async fn usage_warning(&self) -> Option<String> {
        let status = self.status().await;
        if status.daily.percentage() > 80.0 {
            return Some(format!(
                "Daily quota at {:.1}% ({}/{})",
                status.daily.percentage(),
                status.daily.used,
                status.daily.limit
            ));
        }
        if status.session.percentage() > 80.0 {
            return Some(format!(
                "Session quota at {:.1}% ({}/{})",
                status.session.percentage(),
                status.session.used,
                status.session.limit
            ));
        }
        None
    }

    fn limit_reached(&self, session: u64, daily: u64) -> QuotaLimit {
        if daily >= self.max_daily_requests {
            QuotaLimit::Daily
        } else if session >= self.max_session_requests {
            QuotaLimit::Session
        } else {
            QuotaLimit::None
        }
    }

    fn stop_reason(&self, limit: QuotaLimit, session: u64, daily: u64) -> String {
        match limit {
            QuotaLimit::Daily => format!(
                "Daily API quota reached ({daily}/{} requests). Resume tomorrow.",
                self.max_daily_requests
            ),
            QuotaLimit::Session => format!(
                "Session limit reached ({session}/{} requests). Resume with same command.",
                self.max_session_requests
            ),
            QuotaLimit::None => "Unknown quota limit reached".to_string(),
        }
    }
}

/// Estimate the total requests a full backup would need: two per file, album
/// creation and one batched add per directory, the initial listing pages,
/// plus a 10% buffer for retries.
pub fn estimate_total_requests(files: u64, directories: u64, existing_albums: u64) -> u64 {
    let requests = files * 2
        + directories * 2
        + existing_albums.div_ceil(ALBUM_LIST_PAGE_SIZE).max(1);
    requests + requests / 10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use std::path::Path;
    use tempfile::TempDir;

    async fn tracker(max_session: u64, max_daily: u64) -> (QuotaTracker, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = StateStore::load(temp.path(), Path::new("/tmp/photos")).await;
        let shared = store.into_shared();
        (
            QuotaTracker::with_daily_limit(shared, max_session, max_daily),
            temp,
        )
    }

    #[test]
    fn test_operation_costs() {
        assert_eq!(Operation::UploadFile.cost(), 2);
        assert_eq!(Operation::CreateAlbum.cost(), 1);
        assert_eq!(Operation::AddToAlbum.cost(), 1);
        assert_eq!(Operation::ListAlbums { estimated_albums: 0 }.cost(), 1);
        assert_eq!(Operation::ListAlbums { estimated_albums: 50 }.cost(), 1);
        assert_eq!(Operation::ListAlbums { estimated_albums: 51 }.cost(), 2);
        assert_eq!(
            Operation::ListAlbums {
                estimated_albums: 250
            }
            .cost(),
            5
        );
    }

    #[tokio::test]
    async fn test_counters_are_monotonic_sums() {
        let (quota, _temp) = tracker(100, 1000).await;
        assert!(quota.record_requests(10).await);
        assert!(quota.record_requests(5).await);

        let status = quota.status().await;
        assert_eq!(status.session.used, 15);
        assert_eq!(status.daily.used, 15);
    }

    #[tokio::test]
    async fn test_can_make_requests_boundary() {
        let (quota, _temp) = tracker(10, 1000).await;
        quota.record_requests(8).await;
        assert!(quota.can_make_requests(2).await);
        assert!(!quota.can_make_requests(3).await);
    }

    #[tokio::test]
    async fn test_session_limit_sets_stop_reason() {
        let (quota, _temp) = tracker(10, 1000).await;
        assert!(!quota.record_requests(10).await);
        assert_eq!(quota.check_limits().await, QuotaLimit::Session);

        let reason = {
            let state = quota.state.lock().await;
            state.stop_reason().unwrap()
        };
        assert!(reason.contains("Session limit reached"));
        assert!(reason.contains("Resume with same command"));
    }

    #[tokio::test]
    async fn test_daily_limit_takes_precedence() {
        let (quota, _temp) = tracker(100, 10).await;
        assert!(!quota.record_requests(10).await);
        assert_eq!(quota.check_limits().await, QuotaLimit::Daily);

        let reason = {
            let state = quota.state.lock().await;
            state.stop_reason().unwrap()
        };
        assert!(reason.contains("Resume tomorrow"));
    }

    #[tokio::test]
    async fn test_can_perform_distinguishes_headroom_from_hard_limit() {
        let (quota, _temp) = tracker(3, 1000).await;

        assert!(quota.can_perform(Operation::UploadFile).await.is_ok());

        quota.record_requests(2).await;
        let headroom = quota.can_perform(Operation::UploadFile).await.unwrap_err();
        assert!(headroom.contains("Not enough session quota remaining"));

        quota.record_requests(1).await;
        let hard = quota.can_perform(Operation::UploadFile).await.unwrap_err();
        assert!(hard.contains("Session limit reached"));
    }

    #[tokio::test]
    async fn test_quota_check_rolls_stale_daily_window() {
        let (quota, _temp) = tracker(100, 10).await;
        {
            // Fabricate a window exhausted yesterday.
            let mut state = quota.state.lock().await;
            state.add_api_requests(10);
            state.state_mut().daily_quota.date = "2020-01-01".to_string();
        }

        // The next quota decision must roll the window and archive the old
        // counter; yesterday's usage no longer blocks today's requests.
        assert!(quota.can_make_requests(10).await);
        assert_eq!(quota.check_limits().await, QuotaLimit::None);

        let state = quota.state.lock().await;
        assert_eq!(state.daily_request_count(), 0);
        assert_eq!(state.state().daily_quota.resets.len(), 1);
        assert_eq!(state.state().daily_quota.resets[0].requests_at_reset, 10);
    }
}
