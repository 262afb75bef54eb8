// src/leaderboard.rs
//! Room manager: per-room ranking cache, refresh tickers and membership.
//!
//! Every room owns an async mutex around its cached [`RoomState`]. The
//! freshness check, the store query and the overwrite all happen while that
//! lock is held, so concurrent callers on a cold or stale room share a single
//! store query and then observe its result.

use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::error::StoreError;
use crate::ranking::{derive_entries, fallback_entries, fingerprint};
use crate::room::RoomKey;
use crate::state::{new_client_rooms, new_room_registry, ClientRooms, RoomRegistry};
use crate::types::{LeaderboardUpdate, RankEntry, RoomStats};
use crate::user_store::{LocalityFilter, UserStore};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RoomState {
    pub entries: Arc<Vec<RankEntry>>,
    pub fingerprint: String,
    /// `None` until the store has answered successfully at least once.
    pub last_refreshed_at: Option<Instant>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl RoomState {
    fn loaded(entries: Vec<RankEntry>, now: Instant) -> Self {
        Self {
            fingerprint: fingerprint(&entries),
            entries: Arc::new(entries),
            last_refreshed_at: Some(now),
            refreshed_at: Some(Utc::now()),
        }
    }

    fn fallback() -> Self {
        let entries = fallback_entries();
        Self {
            fingerprint: fingerprint(&entries),
            entries: Arc::new(entries),
            last_refreshed_at: None,
            refreshed_at: None,
        }
    }

    fn is_fresh(&self, now: Instant, window: std::time::Duration) -> bool {
        self.last_refreshed_at
            .map(|at| now.duration_since(at) <= window)
            .unwrap_or(false)
    }
}

pub struct RoomSlot {
    key: RoomKey,
    state: AsyncMutex<Option<RoomState>>,
    members: DashSet<String>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    store_failures: AtomicU32,
    last_broadcast: Mutex<Option<String>>,
    // 最近一次加载结果的副本，统计接口读它，不等待 state 锁
    published: Mutex<Option<RoomState>>,
    eviction_pending: AtomicBool,
    idle_since: Mutex<Instant>,
}

impl RoomSlot {
    fn new(key: RoomKey) -> Self {
        Self {
            key,
            state: AsyncMutex::new(None),
            members: DashSet::new(),
            ticker: Mutex::new(None),
            store_failures: AtomicU32::new(0),
            last_broadcast: Mutex::new(None),
            published: Mutex::new(None),
            eviction_pending: AtomicBool::new(false),
            idle_since: Mutex::new(Instant::now()),
        }
    }

    fn ticker_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn is_idle(&self) -> bool {
        self.members.is_empty() && !self.ticker_running()
    }

    fn idle_deadline(&self, delay: std::time::Duration) -> Instant {
        *self.idle_since.lock().unwrap_or_else(PoisonError::into_inner) + delay
    }
}

struct Inner {
    config: Arc<Config>,
    store: Arc<dyn UserStore>,
    broadcaster: Arc<dyn Broadcaster>,
    rooms: RoomRegistry,
    clients: ClientRooms,
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct LeaderboardManager {
    inner: Arc<Inner>,
}

impl LeaderboardManager {
    pub fn new(config: Arc<Config>, store: Arc<dyn UserStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                broadcaster,
                rooms: new_room_registry(),
                clients: new_client_rooms(),
            }),
        }
    }

    /// Room the client is currently subscribed to, if any.
    pub fn room_of(&self, client_id: &str) -> Option<RoomKey> {
        self.inner.clients.get(client_id).map(|r| r.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn member_count(&self, key: &RoomKey) -> usize {
        self.inner.rooms.get(key).map(|r| r.members.len()).unwrap_or(0)
    }

    pub fn ticker_running(&self, key: &RoomKey) -> bool {
        self.inner.rooms.get(key).map(|r| r.ticker_running()).unwrap_or(false)
    }

    // ==========================================================================
    // 缓存
    // ==========================================================================

    /// Returns the room's state, loading it on first access and reloading it
    /// once it is older than the freshness window.
    pub async fn ensure_room(&self, key: &RoomKey) -> RoomState {
        let slot = self.slot(key);
        self.ensure_slot(&slot).await
    }

    fn slot(&self, key: &RoomKey) -> Arc<RoomSlot> {
        self.inner
            .rooms
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RoomSlot::new(key.clone())))
            .value()
            .clone()
    }

    async fn ensure_slot(&self, slot: &RoomSlot) -> RoomState {
        let mut guard = slot.state.lock().await;
        let now = Instant::now();
        let window = self.inner.config.freshness_window;

        if let Some(state) = guard.as_ref() {
            if state.is_fresh(now, window) {
                return state.clone();
            }
        }

        match self.load_entries(&slot.key).await {
            Ok(entries) => {
                let previous = slot.store_failures.swap(0, Ordering::Relaxed);
                if previous > 0 {
                    info!("✅ [Store] {} recovered after {} failed queries", slot.key, previous);
                }
                let state = RoomState::loaded(entries, now);
                debug!("🔄 [Leaderboard] {} reloaded: {} entries", slot.key, state.entries.len());
                *guard = Some(state);
            }
            Err(e) => {
                let failures = slot.store_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.inner.config.store_failure_alert_threshold {
                    error!("🔥 [Store] {} failed {} times in a row: {}", slot.key, failures, e);
                } else {
                    warn!("⚠️ [Store] {} query failed ({}), serving cached board", slot.key, e);
                }
                // 保留上一次成功的数据；冷房间则用演示数据
                if guard.is_none() {
                    *guard = Some(RoomState::fallback());
                }
            }
        }

        let state = guard.clone().unwrap_or_else(RoomState::fallback);
        *slot.published.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        state
    }

    async fn load_entries(&self, key: &RoomKey) -> Result<Vec<RankEntry>, StoreError> {
        let filter = if key.covers_all_users() {
            LocalityFilter::All
        } else {
            LocalityFilter::City(key.locality().to_string())
        };
        let limit = self.inner.config.store_query_timeout;
        let users = timeout(limit, self.inner.store.find_users_by_locality(&filter))
            .await
            .map_err(|_| StoreError::Timeout(limit))??;
        Ok(derive_entries(users, key, self.inner.config.max_entries))
    }

    // ==========================================================================
    // 订阅
    // ==========================================================================

    /// Moves `client_id` into `key`, then refreshes the room, makes sure its
    /// ticker runs and broadcasts an immediate snapshot to the room.
    ///
    /// The transport must already have placed the client in the room so the
    /// immediate snapshot reaches it.
    pub async fn join(&self, client_id: &str, key: RoomKey) -> LeaderboardUpdate {
        if let Some(previous) = self.inner.clients.insert(client_id.to_string(), key.clone()) {
            if previous != key {
                self.leave_room(client_id, &previous);
            }
        }

        // 成员变更与回收都在注册表分片锁内完成，避免加入一个刚被回收的房间
        let slot = {
            let entry = self
                .inner
                .rooms
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RoomSlot::new(key.clone())));
            entry.members.insert(client_id.to_string());
            entry.value().clone()
        };
        info!("🔔 [Leaderboard] {} -> {} ({} members)", client_id, key, slot.members.len());

        let state = self.ensure_slot(&slot).await;
        self.start_ticker(&slot, client_id);

        let update = snapshot_update(&key, &state);
        self.inner.broadcaster.broadcast(&key, &update).await;
        *slot.last_broadcast.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.fingerprint);
        update
    }

    /// Drops every membership of a disconnected client.
    pub fn leave(&self, client_id: &str) {
        if let Some((_, key)) = self.inner.clients.remove(client_id) {
            self.leave_room(client_id, &key);
        }
    }

    fn leave_room(&self, client_id: &str, key: &RoomKey) {
        let Some(slot) = self.inner.rooms.get(key).map(|r| r.value().clone()) else {
            return;
        };
        slot.members.remove(client_id);
        debug!("📤 [Leaderboard] {} left {}", client_id, key);
        if slot.members.is_empty() {
            self.stop_ticker_if_idle(&slot);
            self.schedule_eviction(&slot);
        }
    }

    /// Current snapshot of a room without subscribing to it.
    pub async fn snapshot(&self, key: &RoomKey) -> LeaderboardUpdate {
        let slot = self.slot(key);
        let state = self.ensure_slot(&slot).await;
        if slot.members.is_empty() {
            self.schedule_eviction(&slot);
        }
        snapshot_update(key, &state)
    }

    /// Per-room summary built from the last completed load; never waits on a
    /// reload in progress.
    pub fn room_stats(&self) -> Vec<RoomStats> {
        let slots: Vec<Arc<RoomSlot>> = self.inner.rooms.iter().map(|r| r.value().clone()).collect();
        let mut stats = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.published.lock().unwrap_or_else(PoisonError::into_inner).clone();
            stats.push(RoomStats {
                room: slot.key.to_string(),
                members: slot.members.len(),
                ticker_running: slot.ticker_running(),
                entries: state.as_ref().map(|s| s.entries.len()).unwrap_or(0),
                fingerprint: state.as_ref().map(|s| s.fingerprint.clone()).unwrap_or_default(),
                refreshed_at: state.and_then(|s| s.refreshed_at),
            });
        }
        stats.sort_by(|a, b| a.room.cmp(&b.room));
        stats
    }

    /// Restarts the room's idle clock and makes sure exactly one eviction
    /// task is waiting on it.
    fn schedule_eviction(&self, slot: &Arc<RoomSlot>) {
        *slot.idle_since.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        if slot.eviction_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.room_idle_eviction;
        let slot = slot.clone();
        tokio::spawn(async move {
            // 等待期间又有人访问过则顺延
            let mut deadline = slot.idle_deadline(delay);
            while Instant::now() < deadline {
                sleep_until(deadline).await;
                deadline = slot.idle_deadline(delay);
            }
            // 先清标记再检查，之后的 leave 会重新安排回收
            slot.eviction_pending.store(false, Ordering::Release);
            let Some(inner) = weak.upgrade() else { return };
            let evicted = inner
                .rooms
                .remove_if(&slot.key, |_, current| Arc::ptr_eq(current, &slot) && current.is_idle())
                .is_some();
            if evicted {
                info!("🧹 [Leaderboard] Evicted idle room {}", slot.key);
            } else {
                debug!("♻️ [Leaderboard] {} is active again, keeping it", slot.key);
            }
        });
    }

    // ==========================================================================
    // Ticker
    // ==========================================================================

    /// Starts the room's ticker on behalf of `client_id`, unless that client
    /// has already left again while the room was loading.
    fn start_ticker(&self, slot: &Arc<RoomSlot>, client_id: &str) {
        let mut ticker = slot.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        // 与 stop_ticker_if_idle 一样在 ticker 锁内检查成员
        if !slot.members.contains(client_id) {
            debug!("⏭️ [Ticker] {} not started, {} already left", slot.key, client_id);
            return;
        }
        let period = self.inner.config.tick_interval;
        info!("⏱️ [Ticker] {} started ({:?})", slot.key, period);
        *ticker = Some(tokio::spawn(run_ticker(
            Arc::downgrade(&self.inner),
            slot.clone(),
        )));
    }

    fn stop_ticker_if_idle(&self, slot: &RoomSlot) {
        let mut ticker = slot.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        // 加锁后再检查一次，防止与并发 join 交错
        if !slot.members.is_empty() {
            return;
        }
        if let Some(handle) = ticker.take() {
            handle.abort();
            info!("💤 [Ticker] {} stopped, no subscribers left", slot.key);
        }
    }

    async fn tick(&self, slot: &RoomSlot) {
        let state = self.ensure_slot(slot).await;
        let changed = {
            let last = slot.last_broadcast.lock().unwrap_or_else(PoisonError::into_inner);
            last.as_deref() != Some(state.fingerprint.as_str())
        };
        if !changed && self.inner.config.suppress_unchanged_broadcasts {
            debug!("⏭️ [Ticker] {} unchanged, skipping broadcast", slot.key);
            return;
        }

        let update = snapshot_update(&slot.key, &state);
        self.inner.broadcaster.broadcast(&slot.key, &update).await;
        *slot.last_broadcast.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.fingerprint);
    }
}

async fn run_ticker(inner: Weak<Inner>, slot: Arc<RoomSlot>) {
    let Some(period) = inner.upgrade().map(|i| i.config.tick_interval) else {
        return;
    };
    // join 时已经推送过一次快照，第一次 tick 在一个周期之后
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        LeaderboardManager { inner }.tick(&slot).await;
    }
}

fn snapshot_update(key: &RoomKey, state: &RoomState) -> LeaderboardUpdate {
    LeaderboardUpdate {
        room: key.to_string(),
        updated_at: Utc::now(),
        entries: state.entries.clone(),
    }
}
