// src/broadcaster.rs
use crate::room::RoomKey;
use crate::types::LeaderboardUpdate;
use futures_util::future::BoxFuture;
use socketioxide::SocketIo;
use tracing::warn;

pub const LEADERBOARD_UPDATE_EVENT: &str = "leaderboard-update";

/// Delivers one snapshot to every current member of a room.
pub trait Broadcaster: Send + Sync + 'static {
    fn broadcast<'a>(&'a self, room: &'a RoomKey, update: &'a LeaderboardUpdate) -> BoxFuture<'a, ()>;
}

impl Broadcaster for SocketIo {
    fn broadcast<'a>(&'a self, room: &'a RoomKey, update: &'a LeaderboardUpdate) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // 发送失败只记录，不影响下一次 tick
            if let Err(e) = self.to(room.to_string()).emit(LEADERBOARD_UPDATE_EVENT, update).await {
                warn!("❌ [Broadcast] {} emit failed: {}", room, e);
            }
        })
    }
}
