// src/state.rs
use super::leaderboard::RoomSlot;
use super::room::RoomKey;
use dashmap::DashMap;
use std::sync::Arc;

// 房间注册表: RoomKey -> 房间缓存/成员/ticker
pub type RoomRegistry = Arc<DashMap<RoomKey, Arc<RoomSlot>>>;

// 反向索引: Socket ID -> 当前所在房间 (每个客户端同一时间只在一个排行榜房间)
pub type ClientRooms = Arc<DashMap<String, RoomKey>>;

pub fn new_room_registry() -> RoomRegistry {
    Arc::new(DashMap::new())
}

pub fn new_client_rooms() -> ClientRooms {
    Arc::new(DashMap::new())
}
