//! Position store: owned collection of collateral positions.
//!
//! All positions live behind one `tokio::sync::RwLock`. The two compound
//! operations, [`PositionStore::open`] and [`PositionStore::transition`], each run
//! inside a single write guard so the "at most one active position per
//! (user, asset, network)" and "per (user, token, network)" invariants cannot be
//! broken by interleaved callers. Readers always get cloned positions, never
//! references into the map.
//!
//! User and token addresses are normalized on the way in, so every lookup is an
//! exact match.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use scos_common::error::AppError;
use scos_common::types::{
    normalize_address, NewPosition, Position, PositionId, PositionKey, PositionStatus,
};

use crate::persistence::PositionSink;

/// (user, token_address, network), all normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey(String, String, String);

impl TokenKey {
    fn new(user: &str, token_address: &str, network: &str) -> Self {
        Self(
            normalize_address(user),
            normalize_address(token_address),
            network.to_string(),
        )
    }

    fn of(position: &Position) -> Self {
        Self::new(&position.user, &position.token_address, &position.network)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    positions: HashMap<PositionId, Position>,
    /// Index of active positions by key.
    active: HashMap<PositionKey, PositionId>,
    /// Index of active positions by collateral token.
    active_tokens: HashMap<TokenKey, PositionId>,
    next_id: PositionId,
}

impl StoreState {
    fn index(&mut self, position: &Position) {
        self.active.insert(position.key(), position.id);
        self.active_tokens.insert(TokenKey::of(position), position.id);
    }

    fn unindex(&mut self, position: &Position) {
        let key = position.key();
        if self.active.get(&key) == Some(&position.id) {
            self.active.remove(&key);
        }
        let token = TokenKey::of(position);
        if self.active_tokens.get(&token) == Some(&position.id) {
            self.active_tokens.remove(&token);
        }
    }
}

/// Concurrent position ledger, optionally written through to a [`PositionSink`].
#[derive(Default)]
pub struct PositionStore {
    state: RwLock<StoreState>,
    sink: Option<Arc<dyn PositionSink>>,
}

impl std::fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionStore")
            .field("persistent", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl PositionStore {
    /// A store that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with previously persisted positions that writes every
    /// change through to `sink`.
    ///
    /// Ids continue after the largest existing id. Fails with
    /// `InconsistentState` if `existing` holds two active positions for the same
    /// key or token.
    pub fn persistent(
        sink: Arc<dyn PositionSink>,
        existing: Vec<Position>,
    ) -> Result<Self, AppError> {
        let mut state = StoreState::default();

        for mut position in existing {
            position.user = normalize_address(&position.user);
            position.token_address = normalize_address(&position.token_address);

            state.next_id = state.next_id.max(position.id);
            if position.is_active() {
                if let Some(other) = state
                    .active
                    .get(&position.key())
                    .or_else(|| state.active_tokens.get(&TokenKey::of(&position)))
                {
                    return Err(AppError::InconsistentState(format!(
                        "positions {} and {} are both active for {}",
                        other,
                        position.id,
                        position.key()
                    )));
                }
                state.index(&position);
            }
            if state.positions.insert(position.id, position).is_some() {
                return Err(AppError::InconsistentState(
                    "duplicate position id in stored ledger".to_string(),
                ));
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            sink: Some(sink),
        })
    }

    /// Record a new `Active` position.
    ///
    /// Fails with `DuplicateActivePosition` if the key, or the same collateral
    /// token, already has an active position.
    pub async fn open(&self, new: NewPosition) -> Result<Position, AppError> {
        let key = new.key();
        let token = TokenKey::new(&new.user, &new.token_address, &new.network);
        let mut state = self.state.write().await;

        if state.active.contains_key(&key) {
            return Err(AppError::DuplicateActivePosition(key));
        }
        if let Some(existing) = state
            .active_tokens
            .get(&token)
            .and_then(|id| state.positions.get(id))
        {
            return Err(AppError::DuplicateActivePosition(existing.key()));
        }

        let id = state.next_id + 1;
        let now = Utc::now();
        let position = Position {
            id,
            user: key.user.clone(),
            asset: new.asset,
            token_address: token.1,
            network: new.network,
            collateral_amount: new.collateral_amount,
            borrowed_amount: new.borrowed_amount,
            entry_price: new.entry_price,
            status: PositionStatus::Active,
            created_at: now,
            updated_at: now,
        };

        if let Some(sink) = &self.sink {
            sink.insert(&position).await?;
        }

        state.next_id = id;
        state.index(&position);
        state.positions.insert(id, position.clone());

        tracing::info!(
            position_id = id,
            user = %position.user,
            asset = %position.asset,
            network = %position.network,
            "Position opened"
        );

        Ok(position)
    }

    /// The active position for `key`.
    pub async fn find_active(&self, key: &PositionKey) -> Result<Position, AppError> {
        let state = self.state.read().await;
        state
            .active
            .get(key)
            .and_then(|id| state.positions.get(id))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No active position for {}", key)))
    }

    /// The active position a user holds for a collateral token on a network.
    pub async fn find_active_by_token(
        &self,
        user: &str,
        token_address: &str,
        network: &str,
    ) -> Result<Position, AppError> {
        let token = TokenKey::new(user, token_address, network);
        let state = self.state.read().await;
        state
            .active_tokens
            .get(&token)
            .and_then(|id| state.positions.get(id))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No active position for {} with token {} on {}",
                    token.0, token.1, token.2
                ))
            })
    }

    pub async fn get(&self, id: PositionId) -> Option<Position> {
        self.state.read().await.positions.get(&id).cloned()
    }

    /// Compare-and-set the status of position `id` from `from` to `to`.
    ///
    /// Fails with `StaleState` if the current status is not `from` or the
    /// transition is not allowed by the state machine.
    pub async fn transition(
        &self,
        id: PositionId,
        from: PositionStatus,
        to: PositionStatus,
    ) -> Result<Position, AppError> {
        let mut state = self.state.write().await;

        let current = state
            .positions
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Position {} not found", id)))?;

        if current.status != from || !from.can_transition_to(to) {
            return Err(AppError::StaleState {
                id,
                expected: from,
                actual: current.status,
            });
        }

        let mut updated = current.clone();
        updated.status = to;
        updated.updated_at = Utc::now();

        if let Some(sink) = &self.sink {
            sink.update_status(&updated, from).await?;
        }

        if to.is_terminal() {
            state.unindex(&updated);
        }
        state.positions.insert(id, updated.clone());

        tracing::info!(position_id = id, from = %from, to = %to, "Position transitioned");
        Ok(updated)
    }

    /// Cloned snapshot of every active position, ordered by id.
    pub async fn list_active(&self) -> Vec<Position> {
        let state = self.state.read().await;
        let mut active: Vec<Position> = state
            .active
            .values()
            .filter_map(|id| state.positions.get(id))
            .cloned()
            .collect();
        active.sort_by_key(|p| p.id);
        active
    }

    /// All positions ever opened by `user`, ordered by id.
    pub async fn list_by_user(&self, user: &str) -> Vec<Position> {
        let user = normalize_address(user);
        let state = self.state.read().await;
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.user == user)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.id);
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistFuture;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn new_position(user: &str, asset: &str) -> NewPosition {
        NewPosition {
            user: user.to_string(),
            asset: asset.to_string(),
            token_address: format!("0xtoken_{}", asset.to_lowercase()),
            network: "reddio".to_string(),
            collateral_amount: dec!(20),
            borrowed_amount: dec!(1428.571428),
            entry_price: dec!(100),
        }
    }

    #[tokio::test]
    async fn test_open_assigns_increasing_ids() {
        let store = PositionStore::new();
        let a = store.open(new_position("0xa", "APPLE")).await.unwrap();
        let b = store.open(new_position("0xa", "GOOGLE")).await.unwrap();
        assert_eq!(a.status, PositionStatus::Active);
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_duplicate_active_rejected() {
        let store = PositionStore::new();
        store.open(new_position("0xa", "APPLE")).await.unwrap();
        let err = store.open(new_position("0xa", "APPLE")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateActivePosition(_)));
        assert_eq!(store.list_active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_after_terminal_gets_fresh_id() {
        let store = PositionStore::new();
        let first = store.open(new_position("0xa", "APPLE")).await.unwrap();
        store
            .transition(first.id, PositionStatus::Active, PositionStatus::Redeemed)
            .await
            .unwrap();

        let second = store.open(new_position("0xa", "APPLE")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            store.get(first.id).await.unwrap().status,
            PositionStatus::Redeemed
        );
    }

    #[tokio::test]
    async fn test_find_active() {
        let store = PositionStore::new();
        let key = PositionKey::new("0xa", "APPLE", "reddio");
        assert!(matches!(
            store.find_active(&key).await,
            Err(AppError::NotFound(_))
        ));

        let opened = store.open(new_position("0xa", "APPLE")).await.unwrap();
        assert_eq!(store.find_active(&key).await.unwrap().id, opened.id);

        let by_token = store
            .find_active_by_token("0xa", "0xTOKEN_APPLE", "reddio")
            .await
            .unwrap();
        assert_eq!(by_token.id, opened.id);
    }

    #[tokio::test]
    async fn test_transition_compare_and_set() {
        let store = PositionStore::new();
        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();

        let liquidated = store
            .transition(p.id, PositionStatus::Active, PositionStatus::Liquidated)
            .await
            .unwrap();
        assert_eq!(liquidated.status, PositionStatus::Liquidated);
        assert_eq!(liquidated.borrowed_amount, p.borrowed_amount);
        assert_eq!(liquidated.entry_price, p.entry_price);

        let err = store
            .transition(p.id, PositionStatus::Active, PositionStatus::Redeemed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::StaleState {
                actual: PositionStatus::Liquidated,
                ..
            }
        ));
        assert!(store.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_transition_out_of_terminal_rejected() {
        let store = PositionStore::new();
        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();
        store
            .transition(p.id, PositionStatus::Active, PositionStatus::Redeemed)
            .await
            .unwrap();

        let err = store
            .transition(p.id, PositionStatus::Redeemed, PositionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StaleState { .. }));
    }

    #[tokio::test]
    async fn test_transition_unknown_id() {
        let store = PositionStore::new();
        assert!(matches!(
            store
                .transition(42, PositionStatus::Active, PositionStatus::Redeemed)
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_active_is_a_snapshot() {
        let store = PositionStore::new();
        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();
        let snapshot = store.list_active().await;

        store
            .transition(p.id, PositionStatus::Active, PositionStatus::Liquidated)
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, PositionStatus::Active);
    }

    #[tokio::test]
    async fn test_list_by_user_includes_terminal() {
        let store = PositionStore::new();
        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();
        store.open(new_position("0xa", "GOOGLE")).await.unwrap();
        store.open(new_position("0xb", "APPLE")).await.unwrap();
        store
            .transition(p.id, PositionStatus::Active, PositionStatus::Redeemed)
            .await
            .unwrap();

        let positions = store.list_by_user("0xA").await;
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].status, PositionStatus::Redeemed);
    }

    #[tokio::test]
    async fn test_token_bound_to_one_active_position() {
        let store = PositionStore::new();
        let apple = store.open(new_position("0xa", "APPLE")).await.unwrap();

        let mut google = new_position("0xa", "GOOGLE");
        google.token_address = "0xTOKEN_APPLE".to_string();
        let err = store.open(google.clone()).await.unwrap_err();
        match err {
            AppError::DuplicateActivePosition(key) => assert_eq!(key.asset, "APPLE"),
            other => panic!("unexpected error: {other}"),
        }

        let found = store
            .find_active_by_token("0xa", "0xtoken_apple", "reddio")
            .await
            .unwrap();
        assert_eq!(found.id, apple.id);

        store
            .transition(apple.id, PositionStatus::Active, PositionStatus::Redeemed)
            .await
            .unwrap();
        let reopened = store.open(google).await.unwrap();
        assert_eq!(reopened.asset, "GOOGLE");
        assert_eq!(
            store
                .find_active_by_token("0xa", "0xtoken_apple", "reddio")
                .await
                .unwrap()
                .id,
            reopened.id
        );
    }

    #[tokio::test]
    async fn test_addresses_normalized_on_open() {
        let store = PositionStore::new();
        let mut new = new_position(" 0xABC ", "APPLE");
        new.token_address = "0xToKeN".to_string();
        let opened = store.open(new).await.unwrap();
        assert_eq!(opened.user, "0xabc");
        assert_eq!(opened.token_address, "0xtoken");

        let key = PositionKey::new("0xAbC", "APPLE", "reddio");
        assert_eq!(store.find_active(&key).await.unwrap().id, opened.id);
        assert_eq!(
            store
                .find_active_by_token("0xabc", "0xTOKEN", "reddio")
                .await
                .unwrap()
                .id,
            opened.id
        );

        let err = store.open(new_position("0xabc", "APPLE")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateActivePosition(_)));
        assert_eq!(store.list_by_user("0XABC").await.len(), 1);
    }

    #[derive(Default)]
    struct RecordingSink {
        inserted: Mutex<Vec<PositionId>>,
        updated: Mutex<Vec<(PositionId, PositionStatus, PositionStatus)>>,
        fail: AtomicBool,
    }

    impl PositionSink for RecordingSink {
        fn insert<'a>(&'a self, position: &'a Position) -> PersistFuture<'a> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(AppError::Internal("sink down".to_string()));
                }
                self.inserted.lock().unwrap().push(position.id);
                Ok(())
            })
        }

        fn update_status<'a>(
            &'a self,
            position: &'a Position,
            from: PositionStatus,
        ) -> PersistFuture<'a> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(AppError::Internal("sink down".to_string()));
                }
                self.updated
                    .lock()
                    .unwrap()
                    .push((position.id, from, position.status));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_changes_written_through_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let store = PositionStore::persistent(sink.clone(), Vec::new()).unwrap();

        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();
        store
            .transition(p.id, PositionStatus::Active, PositionStatus::Liquidated)
            .await
            .unwrap();

        assert_eq!(*sink.inserted.lock().unwrap(), vec![p.id]);
        assert_eq!(
            *sink.updated.lock().unwrap(),
            vec![(p.id, PositionStatus::Active, PositionStatus::Liquidated)]
        );
    }

    #[tokio::test]
    async fn test_sink_failure_leaves_memory_unchanged() {
        let sink = Arc::new(RecordingSink::default());
        let store = PositionStore::persistent(sink.clone(), Vec::new()).unwrap();
        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();

        sink.fail.store(true, Ordering::SeqCst);
        assert!(store.open(new_position("0xa", "GOOGLE")).await.is_err());
        assert!(
            store
                .transition(p.id, PositionStatus::Active, PositionStatus::Redeemed)
                .await
                .is_err()
        );

        let active = store.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, PositionStatus::Active);

        sink.fail.store(false, Ordering::SeqCst);
        let google = store.open(new_position("0xa", "GOOGLE")).await.unwrap();
        assert_eq!(google.id, p.id + 1);
    }

    #[tokio::test]
    async fn test_persistent_rebuilds_indexes() {
        let seed = PositionStore::new();
        let apple = seed.open(new_position("0xa", "APPLE")).await.unwrap();
        let google = seed.open(new_position("0xa", "GOOGLE")).await.unwrap();
        let google = seed
            .transition(google.id, PositionStatus::Active, PositionStatus::Liquidated)
            .await
            .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let store = PositionStore::persistent(sink, vec![apple.clone(), google.clone()]).unwrap();

        assert_eq!(store.list_active().await, vec![apple.clone()]);
        assert!(
            store
                .find_active_by_token("0xa", "0xtoken_apple", "reddio")
                .await
                .is_ok()
        );
        assert_eq!(
            store.get(google.id).await.unwrap().status,
            PositionStatus::Liquidated
        );

        let reopened = store.open(new_position("0xa", "GOOGLE")).await.unwrap();
        assert_eq!(reopened.id, google.id + 1);
        assert!(store.open(new_position("0xa", "APPLE")).await.is_err());
    }

    #[tokio::test]
    async fn test_persistent_rejects_two_active_for_one_token() {
        let seed = PositionStore::new();
        let apple = seed.open(new_position("0xa", "APPLE")).await.unwrap();
        let mut clash = seed.open(new_position("0xb", "APPLE")).await.unwrap();
        clash.user = "0xa".to_string();
        clash.asset = "GOOGLE".to_string();

        let sink = Arc::new(RecordingSink::default());
        let err = PositionStore::persistent(sink, vec![apple, clash]).unwrap_err();
        assert!(matches!(err, AppError::InconsistentState(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_leave_one_active() {
        let store = Arc::new(PositionStore::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.open(new_position("0xa", "APPLE")).await })
            })
            .collect();

        let mut opened = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => opened += 1,
                Err(AppError::DuplicateActivePosition(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(opened, 1);
        assert_eq!(store.list_active().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_single_winner() {
        let store = Arc::new(PositionStore::new());
        let p = store.open(new_position("0xa", "APPLE")).await.unwrap();

        let redeem = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transition(p.id, PositionStatus::Active, PositionStatus::Redeemed)
                    .await
            })
        };
        let liquidate = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transition(p.id, PositionStatus::Active, PositionStatus::Liquidated)
                    .await
            })
        };

        let results = [redeem.await.unwrap(), liquidate.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let stale = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::StaleState { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(stale, 1);
    }
}
