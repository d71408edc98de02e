//! Per-session lifecycle state and isolation.
//!
//! Each live session gets a lane in the arena: its own phase machine, its
//! own cancellation token for the in-flight stream, and a turn lock so turn
//! processing stays strictly sequential even if two connections race the
//! same session id. Lanes share nothing with each other; the store is the
//! only shared resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Row may not exist yet; nothing processed.
    Created,
    /// Row exists, turns flow.
    Active,
    /// Disconnect observed, summarization in progress.
    Finalizing,
    /// Completed in the store, summary written or marked unavailable.
    Finalized,
}

pub struct SessionLane {
    session_id: String,
    owner_id: String,
    phase: Mutex<LifecyclePhase>,
    cancel: CancellationToken,
    turn_lock: Arc<Semaphore>,
}

impl SessionLane {
    fn new(session_id: &str, owner_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            owner_id: owner_id.to_owned(),
            phase: Mutex::new(LifecyclePhase::Created),
            cancel: CancellationToken::new(),
            turn_lock: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.lock().expect("lane phase poisoned")
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn mark_active(&self) {
        let mut phase = self.phase.lock().expect("lane phase poisoned");
        if *phase == LifecyclePhase::Created {
            *phase = LifecyclePhase::Active;
        }
    }

    /// Move active -> finalizing. Returns true only for the transition that
    /// actually happened, so duplicate disconnect signals cannot start a
    /// second finalization.
    pub fn begin_finalize(&self) -> bool {
        let mut phase = self.phase.lock().expect("lane phase poisoned");
        match *phase {
            LifecyclePhase::Created | LifecyclePhase::Active => {
                *phase = LifecyclePhase::Finalizing;
                true
            }
            LifecyclePhase::Finalizing | LifecyclePhase::Finalized => false,
        }
    }

    pub fn finish_finalize(&self) {
        let mut phase = self.phase.lock().expect("lane phase poisoned");
        *phase = LifecyclePhase::Finalized;
    }

    /// Serialize turn processing within the session: a new message is not
    /// handled until the previous turn's streaming and logging finished.
    pub async fn lock_turn(&self) -> OwnedSemaphorePermit {
        self.turn_lock
            .clone()
            .acquire_owned()
            .await
            .expect("turn semaphore closed")
    }
}

/// Arena of session lanes keyed by session id.
#[derive(Default)]
pub struct SessionArena {
    lanes: Mutex<HashMap<String, Arc<SessionLane>>>,
}

impl SessionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lane for a session, creating one if absent. A lane left over
    /// from an earlier finalized connection is replaced with a fresh one so
    /// a reconnect gets a live token and phase.
    pub fn lane(&self, session_id: &str, owner_id: &str) -> Arc<SessionLane> {
        let mut lanes = self.lanes.lock().expect("arena poisoned");
        if let Some(existing) = lanes.get(session_id) {
            if existing.phase() != LifecyclePhase::Finalized {
                return existing.clone();
            }
        }
        let lane = Arc::new(SessionLane::new(session_id, owner_id));
        lanes.insert(session_id.to_owned(), lane.clone());
        lane
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionLane>> {
        self.lanes.lock().expect("arena poisoned").get(session_id).cloned()
    }

    /// Drop finalized lanes so the arena does not grow unbounded.
    pub fn cleanup_finalized(&self) {
        let mut lanes = self.lanes.lock().expect("arena poisoned");
        lanes.retain(|_, lane| lane.phase() != LifecyclePhase::Finalized);
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().expect("arena poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_phase_walk() {
        let lane = SessionLane::new("s-1", "u-1");
        assert_eq!(lane.phase(), LifecyclePhase::Created);
        lane.mark_active();
        assert_eq!(lane.phase(), LifecyclePhase::Active);
        assert!(lane.begin_finalize());
        assert_eq!(lane.phase(), LifecyclePhase::Finalizing);
        lane.finish_finalize();
        assert_eq!(lane.phase(), LifecyclePhase::Finalized);
    }

    #[test]
    fn duplicate_finalize_signals_are_noops() {
        let lane = SessionLane::new("s-1", "u-1");
        lane.mark_active();
        assert!(lane.begin_finalize());
        assert!(!lane.begin_finalize());
        lane.finish_finalize();
        assert!(!lane.begin_finalize());
    }

    #[test]
    fn arena_reuses_live_lane_and_replaces_finalized() {
        let arena = SessionArena::new();
        let lane1 = arena.lane("s-1", "u-1");
        lane1.mark_active();
        let lane2 = arena.lane("s-1", "u-1");
        assert!(Arc::ptr_eq(&lane1, &lane2));

        lane1.begin_finalize();
        lane1.finish_finalize();
        let lane3 = arena.lane("s-1", "u-1");
        assert!(!Arc::ptr_eq(&lane1, &lane3));
        assert_eq!(lane3.phase(), LifecyclePhase::Created);
    }

    #[test]
    fn arena_lanes_are_independent() {
        let arena = SessionArena::new();
        let a = arena.lane("s-1", "u-1");
        let b = arena.lane("s-2", "u-2");
        a.cancel_token().cancel();
        assert!(!b.cancel_token().is_cancelled());
    }

    #[test]
    fn cleanup_drops_only_finalized() {
        let arena = SessionArena::new();
        let a = arena.lane("s-1", "u-1");
        let _b = arena.lane("s-2", "u-2");
        a.begin_finalize();
        a.finish_finalize();
        arena.cleanup_finalized();
        assert_eq!(arena.len(), 1);
        assert!(arena.get("s-1").is_none());
        assert!(arena.get("s-2").is_some());
    }

    #[tokio::test]
    async fn turn_lock_serializes() {
        let lane = SessionLane::new("s-1", "u-1");
        let guard = lane.lock_turn().await;
        // Second acquisition must wait until the guard drops.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            lane.lock_turn(),
        )
        .await;
        assert!(second.is_err());
        drop(guard);
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            lane.lock_turn(),
        )
        .await;
        assert!(third.is_ok());
    }
}
