//! In-process network layer.
//!
//! Tracks connected clients and entity ownership and records every
//! transmission instead of putting it on a socket. The server uses it to
//! report what would have been replicated; tests read the outbox.

use std::{
    collections::HashMap,
    sync::{Mutex, RwLock},
};

use engine_shared::{
    ecs::{EntityId, EntityRef},
    event::Event,
    net::{ClientId, NetworkMode, NetworkSystem},
};
use tracing::debug;

/// Where a recorded transmission went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Client(ClientId),
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub to: Destination,
    pub entity: EntityId,
    pub event: &'static str,
    pub payload: String,
}

#[derive(Debug)]
pub struct LoopbackNetwork {
    mode: NetworkMode,
    clients: RwLock<Vec<ClientId>>,
    owners: RwLock<HashMap<EntityId, ClientId>>,
    outbox: Mutex<Vec<Transmission>>,
}

impl LoopbackNetwork {
    pub fn new(mode: NetworkMode) -> Self {
        Self {
            mode,
            clients: RwLock::new(Vec::new()),
            owners: RwLock::new(HashMap::new()),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new client and returns its id.
    pub fn connect(&self) -> ClientId {
        let id = ClientId::new_unique();
        self.clients.write().unwrap_or_else(|p| p.into_inner()).push(id);
        debug!(client = %id, "Client connected");
        id
    }

    pub fn disconnect(&self, client: ClientId) {
        self.clients
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|c| *c != client);
        self.owners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, owner| *owner != client);
    }

    pub fn set_owner(&self, entity: EntityId, client: ClientId) {
        self.owners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(entity, client);
    }

    /// Takes everything transmitted so far.
    pub fn drain_outbox(&self) -> Vec<Transmission> {
        std::mem::take(&mut *self.outbox.lock().unwrap_or_else(|p| p.into_inner()))
    }

    fn record(&self, to: Destination, event: &dyn Event, entity: &EntityRef) {
        let transmission = Transmission {
            to,
            entity: entity.id(),
            event: event.type_name(),
            payload: format!("{event:?}"),
        };
        debug!(?to, entity = %entity.id(), event = transmission.event, "Transmit");
        self.outbox
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(transmission);
    }
}

impl NetworkSystem for LoopbackNetwork {
    fn mode(&self) -> NetworkMode {
        self.mode
    }

    fn owner_of(&self, entity: &EntityRef) -> Option<ClientId> {
        self.owners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&entity.id())
            .copied()
    }

    fn connected_clients(&self) -> Vec<ClientId> {
        self.clients.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn transmit(&self, client: ClientId, event: &dyn Event, entity: &EntityRef) {
        self.record(Destination::Client(client), event, entity);
    }

    fn transmit_to_server(&self, event: &dyn Event, entity: &EntityRef) {
        self.record(Destination::Server, event, entity);
    }
}
