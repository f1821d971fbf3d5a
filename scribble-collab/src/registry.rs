//! Room registry: room id → `Room`, plus roster and color assignment.
//!
//! Rooms are created lazily on first reference and kept for the lifetime of
//! the process. Empty rooms are never evicted; a long-running deployment
//! with many short-lived rooms should add eviction before going to
//! production. Only `get_or_create` and `add_participant` create rooms;
//! lookups, listings and removals leave unknown room ids alone.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::op::ParticipantId;
use crate::protocol::Participant;
use crate::room::Room;
use crate::session::{RoomSession, SessionConfig};
use crate::storage::StoreConfig;

/// Number of hues in the participant palette.
pub const PALETTE_SIZE: usize = 24;

/// Palette entry `index` (taken modulo the palette size).
pub fn palette_color(index: usize) -> String {
    let hue = (index % PALETTE_SIZE) * 360 / PALETTE_SIZE;
    format!("hsl({hue} 80% 50%)")
}

/// Participants of a room in join order.
#[derive(Debug, Default)]
pub struct Roster {
    participants: Vec<Participant>,
    next_color: usize,
}

impl Roster {
    /// Register a new participant with the next palette color.
    ///
    /// Colors are not reclaimed on leave and repeat past `PALETTE_SIZE`.
    pub fn admit(&mut self) -> Participant {
        let participant = Participant {
            id: Uuid::new_v4(),
            color: palette_color(self.next_color),
        };
        self.next_color += 1;
        self.participants.push(participant.clone());
        participant
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let pos = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(pos))
    }

    pub fn list(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Maps room ids to rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    store: StoreConfig,
    session_config: SessionConfig,
    broadcast_capacity: usize,
}

impl RoomRegistry {
    pub fn new(
        store: StoreConfig,
        session_config: SessionConfig,
        broadcast_capacity: usize,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            session_config,
            broadcast_capacity,
        }
    }

    /// Get a room, creating and loading it on first reference.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let (log_store, checkpoints) = self.store.open();
        let config = self.session_config.clone();
        let session = RoomSession::open(room_id, log_store, checkpoints, config);
        let room = Arc::new(Room::new(room_id, session, self.broadcast_capacity));
        rooms.insert(room_id.to_string(), room.clone());
        log::info!("Room {room_id:?} created ({} rooms)", rooms.len());
        room
    }

    /// Look up a room without creating it.
    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn add_participant(&self, room_id: &str) -> Participant {
        self.get_or_create(room_id).await.add_participant().await
    }

    /// Remove a participant. An unknown room is a no-op.
    pub async fn remove_participant(
        &self,
        room_id: &str,
        participant_id: ParticipantId,
    ) -> Option<Participant> {
        self.get(room_id)
            .await?
            .remove_participant(participant_id)
            .await
    }

    /// Participants of a room, ordered by join. Empty for an unknown room.
    pub async fn list_participants(&self, room_id: &str) -> Vec<Participant> {
        match self.get(room_id).await {
            Some(room) => room.participants().await,
            None => Vec::new(),
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_ids(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
