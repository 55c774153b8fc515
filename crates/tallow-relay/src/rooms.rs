//! Room table
//!
//! Rooms are keyed by the BLAKE3 hash of the code phrase and live
//! exclusively inside the relay. Lifecycle: CREATED (one peer waiting)
//! → JOINED (both bound) → ACTIVE (first bytes pumped) → CLOSED
//! (disconnect, byte cap, or TTL). The ACTIVE edge is recorded by
//! [`RoomTable::mark_active`] when a pump moves its first bytes; close
//! is deterministic and leaves no state behind.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Room key: BLAKE3 of the room code
pub type RoomId = [u8; 32];

/// Byte pump channel depth (chunks of raw bytes)
const PUMP_DEPTH: usize = 64;

/// Raw byte sender toward one peer
pub type PeerSender = mpsc::Sender<Vec<u8>>;

/// Raw byte receiver for one peer
pub type PeerReceiver = mpsc::Receiver<Vec<u8>>;

/// A room pairing creator and joiner
pub struct Room {
    /// Sends toward the creator's socket
    pub creator_tx: PeerSender,
    /// Sends toward the joiner's socket (set at join)
    pub joiner_tx: Option<PeerSender>,
    /// Set once the joiner binds (level-triggered)
    pub joined: CancellationToken,
    /// Total bytes pumped in both directions
    pub bytes_relayed: Arc<AtomicU64>,
    /// Set once the pump has moved bytes (the JOINED -> ACTIVE edge)
    pub active: Arc<AtomicBool>,
    /// Set when the room closes (cap exceeded, TTL, peer gone)
    pub closed: CancellationToken,
    /// Creation time for TTL enforcement
    pub created_at: Instant,
}

/// Error cases for room operations
#[derive(Debug, PartialEq, Eq)]
pub enum RoomError {
    /// Join for a room that does not exist here
    NotFound,
    /// Room already has both peers
    Full,
    /// Server at room capacity
    TooManyRooms,
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomError::NotFound => write!(f, "room not found"),
            RoomError::Full => write!(f, "room is full"),
            RoomError::TooManyRooms => write!(f, "server at room capacity"),
        }
    }
}

/// What a successful create yields
#[derive(Debug)]
pub struct Created {
    /// The creator's inbound byte stream (from the joiner)
    pub rx: PeerReceiver,
    /// Set once the joiner binds
    pub joined: CancellationToken,
    /// Shared byte counter
    pub bytes_relayed: Arc<AtomicU64>,
    /// Shared ACTIVE marker, flipped at first pumped bytes
    pub active: Arc<AtomicBool>,
    /// Shared close signal
    pub closed: CancellationToken,
}

/// What a successful join yields
#[derive(Debug)]
pub struct Joined {
    /// The joiner's inbound byte stream (from the creator)
    pub rx: PeerReceiver,
    /// Sender toward the creator
    pub peer_tx: PeerSender,
    /// Shared byte counter
    pub bytes_relayed: Arc<AtomicU64>,
    /// Shared ACTIVE marker, flipped at first pumped bytes
    pub active: Arc<AtomicBool>,
    /// Shared close signal
    pub closed: CancellationToken,
}

/// Concurrent room table
pub struct RoomTable {
    rooms: DashMap<RoomId, Room>,
    max_rooms: usize,
}

impl RoomTable {
    /// Create a table bounded to `max_rooms`
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_rooms,
        }
    }

    /// Create a room; the caller becomes the creator and waits for a join
    pub fn create(&self, id: RoomId) -> Result<Created, RoomError> {
        // Capacity check happens before the entry lock: len() read-locks
        // all shards and would deadlock inside entry()
        if self.rooms.len() >= self.max_rooms && !self.rooms.contains_key(&id) {
            return Err(RoomError::TooManyRooms);
        }

        use dashmap::mapref::entry::Entry;
        match self.rooms.entry(id) {
            Entry::Occupied(_) => Err(RoomError::Full),
            Entry::Vacant(entry) => {
                let (creator_tx, rx) = mpsc::channel(PUMP_DEPTH);
                let joined = CancellationToken::new();
                let bytes_relayed = Arc::new(AtomicU64::new(0));
                let active = Arc::new(AtomicBool::new(false));
                let closed = CancellationToken::new();
                entry.insert(Room {
                    creator_tx,
                    joiner_tx: None,
                    joined: joined.clone(),
                    bytes_relayed: bytes_relayed.clone(),
                    active: active.clone(),
                    closed: closed.clone(),
                    created_at: Instant::now(),
                });
                debug!("room created");
                Ok(Created {
                    rx,
                    joined,
                    bytes_relayed,
                    active,
                    closed,
                })
            }
        }
    }

    /// Join an existing room as the second peer
    pub fn join(&self, id: &RoomId) -> Result<Joined, RoomError> {
        let mut room = self.rooms.get_mut(id).ok_or(RoomError::NotFound)?;
        if room.joiner_tx.is_some() {
            return Err(RoomError::Full);
        }
        let (joiner_tx, rx) = mpsc::channel(PUMP_DEPTH);
        let peer_tx = room.creator_tx.clone();
        room.joiner_tx = Some(joiner_tx);
        room.joined.cancel();
        debug!("room joined");
        Ok(Joined {
            rx,
            peer_tx,
            bytes_relayed: room.bytes_relayed.clone(),
            active: room.active.clone(),
            closed: room.closed.clone(),
        })
    }

    /// The sender toward the joiner, once bound
    pub fn joiner_sender(&self, id: &RoomId) -> Option<PeerSender> {
        self.rooms.get(id).and_then(|room| room.joiner_tx.clone())
    }

    /// Record the JOINED -> ACTIVE edge; idempotent, logs once
    pub fn mark_active(active: &AtomicBool) {
        if !active.swap(true, Ordering::Relaxed) {
            debug!("room active");
        }
    }

    /// Whether a room has reached ACTIVE
    pub fn is_active(&self, id: &RoomId) -> bool {
        self.rooms
            .get(id)
            .map(|room| room.active.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Close and remove a room; both pumps observe the close signal
    pub fn close(&self, id: &RoomId) {
        if let Some((_, room)) = self.rooms.remove(id) {
            room.closed.cancel();
            debug!(
                bytes = room.bytes_relayed.load(Ordering::Relaxed),
                "room closed"
            );
        }
    }

    /// Close rooms past their TTL; returns how many closed
    pub fn expire(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| now.duration_since(entry.created_at) >= ttl)
            .map(|entry| *entry.key())
            .collect();
        for id in &expired {
            self.close(id);
        }
        expired.len()
    }

    /// Number of live rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when no rooms are live
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> RoomId {
        [n; 32]
    }

    #[test]
    fn test_create_then_join() {
        let table = RoomTable::new(100);
        let created = table.create(id(1)).unwrap();
        let joined = table.join(&id(1)).unwrap();
        assert!(table.joiner_sender(&id(1)).is_some());
        drop(created);
        drop(joined);
    }

    #[test]
    fn test_join_missing_room() {
        let table = RoomTable::new(100);
        assert_eq!(table.join(&id(9)).unwrap_err(), RoomError::NotFound);
    }

    #[test]
    fn test_third_peer_rejected() {
        let table = RoomTable::new(100);
        let _created = table.create(id(1)).unwrap();
        let _joined = table.join(&id(1)).unwrap();
        assert_eq!(table.join(&id(1)).unwrap_err(), RoomError::Full);
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let table = RoomTable::new(100);
        let _created = table.create(id(1)).unwrap();
        assert_eq!(table.create(id(1)).unwrap_err(), RoomError::Full);
    }

    #[test]
    fn test_room_capacity() {
        let table = RoomTable::new(2);
        let _a = table.create(id(1)).unwrap();
        let _b = table.create(id(2)).unwrap();
        assert_eq!(table.create(id(3)).unwrap_err(), RoomError::TooManyRooms);
    }

    #[test]
    fn test_close_removes_room() {
        let table = RoomTable::new(100);
        let _created = table.create(id(1)).unwrap();
        table.close(&id(1));
        assert!(table.is_empty());
        assert_eq!(table.join(&id(1)).unwrap_err(), RoomError::NotFound);
    }

    #[test]
    fn test_ttl_expiry() {
        let table = RoomTable::new(100);
        let _created = table.create(id(1)).unwrap();
        assert_eq!(table.expire(Duration::from_secs(3600)), 0);
        assert_eq!(table.expire(Duration::ZERO), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_lifecycle_reaches_active_once_bytes_flow() {
        let table = RoomTable::new(100);
        let created = table.create(id(8)).unwrap();
        assert!(!table.is_active(&id(8)));

        let _joined = table.join(&id(8)).unwrap();
        // JOINED but not yet ACTIVE: no bytes pumped
        assert!(!table.is_active(&id(8)));

        RoomTable::mark_active(&created.active);
        assert!(table.is_active(&id(8)));
        // Idempotent
        RoomTable::mark_active(&created.active);
        assert!(table.is_active(&id(8)));
    }

    #[tokio::test]
    async fn test_join_notifies_creator() {
        let table = Arc::new(RoomTable::new(100));
        let created = table.create(id(1)).unwrap();
        let notified = created.joined.clone();

        let waiter = tokio::spawn(async move {
            notified.cancelled().await;
        });
        let _joined = table.join(&id(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("creator should be notified")
            .unwrap();
    }
}
