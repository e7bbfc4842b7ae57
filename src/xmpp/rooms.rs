//! Joined-room bookkeeping and on-demand joins.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_xmpp::parsers::BareJid;
use tracing::{debug, info, warn};

use crate::common::error::{RelayError, RelayResult};

use super::connection::ConnectionCommand;

type JoinWaiter = oneshot::Sender<RelayResult<()>>;

#[derive(Debug, Default)]
struct RoomTable {
    joined: HashSet<BareJid>,
    /// Rooms with a join in flight, and everyone waiting on it.
    pending: HashMap<BareJid, Vec<JoinWaiter>>,
}

/// Tracks which rooms the session is in and joins new ones on demand.
///
/// Rooms are keyed by normalized `BareJid`, so `Team@host` and `team@host`
/// are the same room.
///
/// Waits run on the caller's task; confirmations are delivered by the
/// connection's event loop through [`confirm_joined`](Self::confirm_joined)
/// and [`reject`](Self::reject).
#[derive(Debug)]
pub struct RoomSessionManager {
    table: Mutex<RoomTable>,
    commands_tx: mpsc::UnboundedSender<ConnectionCommand>,
    join_timeout: Duration,
}

impl RoomSessionManager {
    pub fn new(commands_tx: mpsc::UnboundedSender<ConnectionCommand>, join_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(RoomTable::default()),
            commands_tx,
            join_timeout,
        }
    }

    /// Make sure the session is in `room`, joining it if necessary.
    ///
    /// Concurrent callers for the same room share a single join request.
    pub async fn ensure_joined(&self, room: &BareJid) -> RelayResult<BareJid> {
        let rx = {
            let mut table = self.table.lock().await;
            if table.joined.contains(room) {
                return Ok(room.clone());
            }

            let (tx, rx) = oneshot::channel();
            if let Some(waiters) = table.pending.get_mut(room) {
                waiters.push(tx);
            } else {
                let command = ConnectionCommand::Join { room: room.clone() };
                if self.commands_tx.send(command).is_err() {
                    return Err(RelayError::TransportDisconnect {
                        reason: "connection loop has stopped".to_string(),
                    });
                }
                debug!(room = %room, "Requested room join");
                table.pending.insert(room.clone(), vec![tx]);
            }
            rx
        };

        match tokio::time::timeout(self.join_timeout, rx).await {
            Ok(Ok(result)) => result.map(|()| room.clone()),
            Ok(Err(_)) => Err(RelayError::TransportDisconnect {
                reason: "join request abandoned".to_string(),
            }),
            Err(_) => {
                let err = RelayError::JoinTimeout {
                    room: room.to_string(),
                    waited: self.join_timeout,
                };
                self.fail_pending(room, err.clone()).await;
                Err(err)
            }
        }
    }

    /// Record `room` as joined and release everyone waiting on it.
    ///
    /// Late confirmations (after a timeout) still mark the room joined.
    pub async fn confirm_joined(&self, room: &BareJid) {
        let waiters = {
            let mut table = self.table.lock().await;
            if table.joined.insert(room.clone()) {
                info!(room = %room, "Joined room");
            }
            table.pending.remove(room).unwrap_or_default()
        };

        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Fail a pending join with the room's refusal.
    pub async fn reject(&self, room: &BareJid, reason: &str) {
        warn!(room = %room, reason = %reason, "Room join rejected");
        self.fail_pending(
            room,
            RelayError::JoinRejected {
                room: room.to_string(),
                reason: reason.to_string(),
            },
        )
        .await;
    }

    /// Fail every waiter of a pending join with `err`.
    pub async fn fail_pending(&self, room: &BareJid, err: RelayError) {
        let waiters = self.table.lock().await.pending.remove(room).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Forget every room and fail pending joins. Called on disconnect.
    pub async fn reset(&self, reason: &str) {
        let pending = {
            let mut table = self.table.lock().await;
            table.joined.clear();
            std::mem::take(&mut table.pending)
        };

        let err = RelayError::TransportDisconnect {
            reason: reason.to_string(),
        };
        for waiter in pending.into_values().flatten() {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Snapshot of the joined rooms, sorted.
    #[cfg(test)]
    pub async fn joined_rooms(&self) -> Vec<BareJid> {
        let mut rooms: Vec<_> = self.table.lock().await.joined.iter().cloned().collect();
        rooms.sort_by_cached_key(|room| room.to_string());
        rooms
    }

    pub async fn is_joined(&self, room: &BareJid) -> bool {
        self.table.lock().await.joined.contains(room)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const ROOM: &str = "team@conf.example.com";

    fn jid(s: &str) -> BareJid {
        s.parse().unwrap()
    }

    fn manager(timeout: Duration) -> (Arc<RoomSessionManager>, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RoomSessionManager::new(tx, timeout)), rx)
    }

    fn count_joins(rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) -> usize {
        let mut joins = 0;
        while let Ok(command) = rx.try_recv() {
            if matches!(command, ConnectionCommand::Join { .. }) {
                joins += 1;
            }
        }
        joins
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_join() {
        let (rooms, mut rx) = manager(Duration::from_secs(5));

        let first = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.ensure_joined(&jid(ROOM)).await }
        });
        let second = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.ensure_joined(&jid(ROOM)).await }
        });

        // Wait for the single join request, then confirm it
        match rx.recv().await {
            Some(ConnectionCommand::Join { room }) => assert_eq!(room, jid(ROOM)),
            other => panic!("expected join, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        rooms.confirm_joined(&jid(ROOM)).await;

        assert_eq!(first.await.unwrap().unwrap(), jid(ROOM));
        assert_eq!(second.await.unwrap().unwrap(), jid(ROOM));
        assert_eq!(count_joins(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_mixed_case_room_matches_confirmation() {
        let (rooms, mut rx) = manager(Duration::from_secs(5));

        let waiter = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.ensure_joined(&jid("Team@conf.example.com")).await }
        });
        match rx.recv().await {
            Some(ConnectionCommand::Join { room }) => assert_eq!(room.to_string(), ROOM),
            other => panic!("expected join, got {:?}", other),
        }

        // The server echoes the room in its normalized form
        rooms.confirm_joined(&jid("team@conf.example.com")).await;

        assert_eq!(waiter.await.unwrap().unwrap(), jid(ROOM));
        assert!(rooms.is_joined(&jid("TEAM@conf.example.com")).await);
    }

    #[tokio::test]
    async fn test_joined_room_returns_immediately() {
        let (rooms, mut rx) = manager(Duration::from_secs(5));
        rooms.confirm_joined(&jid(ROOM)).await;

        assert_eq!(rooms.ensure_joined(&jid(ROOM)).await.unwrap(), jid(ROOM));
        assert_eq!(rooms.ensure_joined(&jid(ROOM)).await.unwrap(), jid(ROOM));
        assert_eq!(count_joins(&mut rx), 0);
        assert!(rooms.is_joined(&jid(ROOM)).await);
    }

    #[tokio::test]
    async fn test_join_timeout_then_retry() {
        let (rooms, mut rx) = manager(Duration::from_millis(50));

        let err = rooms.ensure_joined(&jid(ROOM)).await.unwrap_err();
        assert!(matches!(err, RelayError::JoinTimeout { .. }));
        assert!(!err.is_fatal());
        assert_eq!(count_joins(&mut rx), 1);

        // Next caller issues a fresh join
        let _ = rooms.ensure_joined(&jid(ROOM)).await;
        assert_eq!(count_joins(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_late_confirmation_still_recorded() {
        let (rooms, _rx) = manager(Duration::from_millis(20));

        assert!(rooms.ensure_joined(&jid(ROOM)).await.is_err());
        rooms.confirm_joined(&jid(ROOM)).await;

        assert_eq!(rooms.joined_rooms().await, vec![jid(ROOM)]);
    }

    #[tokio::test]
    async fn test_rejection_reaches_waiter() {
        let (rooms, mut rx) = manager(Duration::from_secs(5));

        let waiter = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.ensure_joined(&jid(ROOM)).await }
        });
        assert!(rx.recv().await.is_some());
        rooms.reject(&jid(ROOM), "forbidden").await;

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            RelayError::JoinRejected {
                room: ROOM.to_string(),
                reason: "forbidden".to_string()
            }
        );
        assert!(!rooms.is_joined(&jid(ROOM)).await);
    }

    #[tokio::test]
    async fn test_reset_clears_and_fails_pending() {
        let (rooms, mut rx) = manager(Duration::from_secs(5));
        rooms.confirm_joined(&jid("ops@conf.example.com")).await;

        let waiter = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.ensure_joined(&jid(ROOM)).await }
        });
        assert!(rx.recv().await.is_some());
        rooms.reset("stream closed").await;

        assert!(waiter.await.unwrap().unwrap_err().is_fatal());
        assert!(rooms.joined_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_loop_is_reported() {
        let (rooms, rx) = manager(Duration::from_secs(5));
        drop(rx);

        let err = rooms.ensure_joined(&jid(ROOM)).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
