//! The dispatch engine.
//!
//! [`EventSystem`] owns the event type registry, the handler table and the
//! receiving end of the cross-thread queue. It is `Send` but not `Sync`: it
//! lives on the dispatch thread, and other threads reach it through an
//! [`EventSender`].
//!
//! Handlers may send further events or (un)register handlers while they run;
//! no internal borrow is held across a handler call.

use std::{
    cell::{Cell, RefCell},
    sync::Arc,
    thread::{self, ThreadId},
};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, trace, warn};

use super::{
    handler::ReceiverHandler,
    priority,
    queue::{self, EventSender, PendingEvent},
    ComponentSystem, Event, EventReceiver, EventTypeId, EventTypeInfo, EventTypeRegistry, EventUri,
    HandlerId, HandlerInfo, HandlerOwner, HandlerSet, HandlerTable, InvokeOutcome,
    RegistrationError, ReplicationMode,
};
use crate::{
    config::EventSystemConfig,
    ecs::{ComponentType, EntityRef},
    net::{NetworkComponent, NetworkMode, NetworkSystem, NullNetwork},
};

/// Result of [`EventSystem::send`].
#[derive(Debug)]
pub enum Sent<E> {
    /// Delivered on this thread; the event is handed back with whatever the
    /// handlers wrote into it.
    Dispatched(E),
    /// Called off the dispatch thread; delivered by the next `process()`.
    Queued,
}

impl<E> Sent<E> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Sent::Queued)
    }

    pub fn dispatched(self) -> Option<E> {
        match self {
            Sent::Dispatched(event) => Some(event),
            Sent::Queued => None,
        }
    }
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events delivered on the dispatch thread, queued ones included.
    pub dispatched: u64,
    /// Events taken off the cross-thread queue.
    pub drained: u64,
    pub handler_calls: u64,
    /// Handler calls that returned an error or panicked.
    pub handler_failures: u64,
    /// Consumable events that stopped early.
    pub consumed: u64,
}

pub struct EventSystem {
    config: EventSystemConfig,
    network: Arc<dyn NetworkSystem>,
    registry: RefCell<EventTypeRegistry>,
    table: RefCell<HandlerTable>,
    sender: EventSender,
    pending: RefCell<UnboundedReceiver<PendingEvent>>,
    dispatch_thread: Cell<ThreadId>,
    next_handler_id: Cell<u64>,
    stats: Cell<DispatchStats>,
}

impl EventSystem {
    /// Creates an event system whose dispatch thread is the calling thread.
    pub fn new(config: EventSystemConfig, network: Arc<dyn NetworkSystem>) -> Self {
        let (sender, pending) = queue::channel();
        Self {
            registry: RefCell::new(EventTypeRegistry::new(config.duplicate_events)),
            config,
            network,
            table: RefCell::new(HandlerTable::new()),
            sender,
            pending: RefCell::new(pending),
            dispatch_thread: Cell::new(thread::current().id()),
            next_handler_id: Cell::new(0),
            stats: Cell::new(DispatchStats::default()),
        }
    }

    /// Default settings, no network.
    pub fn standalone() -> Self {
        Self::new(EventSystemConfig::default(), Arc::new(NullNetwork))
    }

    pub fn config(&self) -> &EventSystemConfig {
        &self.config
    }

    /// Makes the calling thread the dispatch thread.
    pub fn set_dispatch_thread_to_current(&self) {
        self.dispatch_thread.set(thread::current().id());
    }

    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.dispatch_thread.get()
    }

    /// A handle other threads can send through.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.get()
    }

    fn bump(&self, f: impl FnOnce(&mut DispatchStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn next_id(&self) -> HandlerId {
        let id = self.next_handler_id.get();
        self.next_handler_id.set(id + 1);
        HandlerId(id)
    }

    /// Delivers everything queued from other threads before this call, oldest
    /// first. Returns how many events were drained.
    pub fn process(&self) -> usize {
        if !self.is_dispatch_thread() {
            warn!("process() called off the dispatch thread, ignoring");
            return 0;
        }

        // Events offered while draining wait for the next call.
        let budget = self.pending.borrow().len();
        let mut drained = 0;
        while drained < budget {
            let next = queue::poll(&mut self.pending.borrow_mut());
            let Some(pending) = next else {
                break;
            };
            drained += 1;
            let (entity, event, component) = pending.into_parts();
            match component {
                Some(component) => self.dispatch_to_component(&entity, event.as_ref(), component),
                None => self.dispatch(&entity, event.as_ref()),
            }
        }

        if drained > 0 {
            self.bump(|s| s.drained += drained as u64);
            trace!(drained, "Processed pending events");
        }
        drained
    }

    /// Registers an event type under `uri`. Failures are logged and returned;
    /// the offending registration is skipped.
    pub fn register_event(&self, uri: &str, info: EventTypeInfo) -> Result<(), RegistrationError> {
        let result = uri
            .parse::<EventUri>()
            .map_err(|reason| RegistrationError::InvalidUri {
                uri: uri.to_string(),
                reason,
            })
            .and_then(|uri| self.registry.borrow_mut().register(uri, info));
        if let Err(err) = &result {
            error!(error = %err, "Failed to register event");
        }
        result
    }

    pub fn event_uri(&self, event_type: EventTypeId) -> Option<EventUri> {
        self.registry.borrow().uri_of(event_type).cloned()
    }

    pub fn event_type(&self, uri: &EventUri) -> Option<EventTypeId> {
        self.registry.borrow().type_of(uri)
    }

    pub fn replication_mode(&self, event_type: EventTypeId) -> ReplicationMode {
        self.registry.borrow().replication_mode(event_type)
    }

    pub fn descendants(&self, event_type: EventTypeId) -> Vec<EventTypeId> {
        self.registry.borrow().descendants(event_type).to_vec()
    }

    /// Read access to the registry. Do not register events inside `f`.
    pub fn with_registry<R>(&self, f: impl FnOnce(&EventTypeRegistry) -> R) -> R {
        f(&self.registry.borrow())
    }

    /// Number of distinct registered handlers.
    pub fn handler_count(&self) -> usize {
        self.table.borrow().len()
    }

    /// Registers every handler `system` declares, skipping those whose
    /// [`super::RegisterMode`] does not match this process. Returns how many
    /// were registered.
    pub fn register_event_handler<S: ComponentSystem>(&self, system: &Arc<S>) -> usize {
        let mut set = HandlerSet::new();
        system.declare_handlers(&mut set);

        let owner = HandlerOwner::of(system);
        let authority = self.network.mode().is_authority();
        let mut registered = 0;
        debug!(system = %system.name(), "Registering event handler");

        for decl in set.into_decls() {
            if !decl.net_filter_mode().is_valid_for(authority, self.config.headless) {
                debug!(
                    system = %system.name(),
                    handler = %decl.name(),
                    "Skipping handler for this network role"
                );
                continue;
            }
            let info = decl.into_info(self.next_id(), owner, system);
            self.add_handler(info);
            registered += 1;
        }
        registered
    }

    /// Removes every handler `system` registered. Safe to call twice.
    pub fn unregister_event_handler<S: ComponentSystem>(&self, system: &Arc<S>) -> usize {
        let removed = self.table.borrow_mut().remove_handlers_of(HandlerOwner::of(system));
        debug!(system = %system.name(), removed, "Unregistered event handler");
        removed
    }

    /// Registers a receiver for events of type `E` on entities holding every
    /// component in `components`.
    pub fn register_event_receiver<E, R>(
        &self,
        receiver: &Arc<R>,
        priority: i32,
        components: &[ComponentType],
    ) -> HandlerId
    where
        E: Event,
        R: EventReceiver<E>,
    {
        let id = self.next_id();
        let info = HandlerInfo::new(
            id,
            HandlerOwner::of(receiver),
            EventTypeId::of::<E>(),
            std::any::type_name::<R>(),
            priority,
            None,
            components.to_vec(),
            Vec::new(),
            Box::new(ReceiverHandler::<E, R>::new(receiver.clone())),
        );
        self.add_handler(info);
        id
    }

    /// Removes what [`Self::register_event_receiver`] added for the same
    /// receiver, event type and components.
    pub fn unregister_event_receiver<E, R>(
        &self,
        receiver: &Arc<R>,
        components: &[ComponentType],
    ) -> usize
    where
        E: Event,
        R: EventReceiver<E>,
    {
        self.table
            .borrow_mut()
            .remove_receiver(HandlerOwner::of(receiver), EventTypeId::of::<E>(), components)
    }

    /// Adds an already built handler.
    pub fn add_handler(&self, info: HandlerInfo) {
        trace!(
            handler = %info.name(),
            event = %info.event_type(),
            priority = info.priority(),
            "Adding handler"
        );
        self.table.borrow_mut().add(Arc::new(info));
    }

    /// Sends `event` to `entity`.
    ///
    /// On the dispatch thread the event is replicated if its type asks for it,
    /// then delivered to every matching handler, highest priority first, and
    /// handed back. Elsewhere it is queued for the next [`Self::process`].
    pub fn send<E: Event>(&self, entity: &EntityRef, event: E) -> Sent<E> {
        if !self.is_dispatch_thread() {
            self.sender.offer(PendingEvent::new(entity.clone(), Box::new(event)));
            return Sent::Queued;
        }
        self.dispatch(entity, &event);
        Sent::Dispatched(event)
    }

    /// Sends `event` only to handlers bound to `component` on `entity`.
    ///
    /// General handlers do not see it and it is never replicated.
    pub fn send_to_component<E: Event>(
        &self,
        entity: &EntityRef,
        event: E,
        component: ComponentType,
    ) -> Sent<E> {
        if !self.is_dispatch_thread() {
            self.sender
                .offer(PendingEvent::for_component(entity.clone(), Box::new(event), component));
            return Sent::Queued;
        }
        self.dispatch_to_component(entity, &event, component);
        Sent::Dispatched(event)
    }

    fn dispatch(&self, entity: &EntityRef, event: &dyn Event) {
        if !entity.exists() {
            debug!(
                event = %event.type_name(),
                entity = %entity.id(),
                "Event sent to missing entity"
            );
            return;
        }
        self.bump(|s| s.dispatched += 1);

        self.replicate(entity, event);

        let lineage = self.registry.borrow().lineage(event.event_type());
        let mut handlers = self.table.borrow().select_candidates(&lineage, entity);
        handlers.sort_by(|a, b| priority::compare(a, b));
        self.invoke_all(entity, event, &handlers);
    }

    fn dispatch_to_component(
        &self,
        entity: &EntityRef,
        event: &dyn Event,
        component: ComponentType,
    ) {
        if !entity.exists() {
            debug!(
                event = %event.type_name(),
                entity = %entity.id(),
                "Event sent to missing entity"
            );
            return;
        }
        self.bump(|s| s.dispatched += 1);

        let lineage = self.registry.borrow().lineage(event.event_type());
        let mut handlers = self.table.borrow().component_candidates(&lineage, component);
        handlers.sort_by(|a, b| priority::compare(a, b));
        self.invoke_all(entity, event, &handlers);
    }

    fn invoke_all(&self, entity: &EntityRef, event: &dyn Event, handlers: &[Arc<HandlerInfo>]) {
        let consumable = event.consumable();
        for handler in handlers {
            // Re-checked per handler: an earlier one may have removed a
            // component.
            if !handler.is_valid_for(entity) {
                continue;
            }
            let outcome = handler.invoke(entity, event, self);
            self.bump(|s| {
                s.handler_calls += 1;
                if outcome != InvokeOutcome::Completed {
                    s.handler_failures += 1;
                }
            });
            if consumable.is_some_and(|c| c.is_consumed()) {
                trace!(event = %event.type_name(), handler = %handler.name(), "Event consumed");
                self.bump(|s| s.consumed += 1);
                return;
            }
        }
    }

    fn replicate(&self, entity: &EntityRef, event: &dyn Event) {
        let event_type = event.event_type();
        let (mode, skip_instigator) = {
            let registry = self.registry.borrow();
            (
                registry.replication_mode(event_type),
                registry.should_skip_instigator(event_type),
            )
        };
        if mode == ReplicationMode::None {
            return;
        }

        let role = self.network.mode();
        let identified = entity.has::<NetworkComponent>();
        match mode {
            ReplicationMode::Broadcast if role.is_server() && identified => {
                let instigator = if skip_instigator {
                    event.instigator().and_then(|i| self.network.owner_of(i))
                } else {
                    None
                };
                debug!(event = %event_type, entity = %entity.id(), "Broadcasting event");
                for client in self.network.connected_clients() {
                    if Some(client) != instigator {
                        self.network.transmit(client, event, entity);
                    }
                }
            }
            ReplicationMode::Owner if role.is_server() && identified => {
                if let Some(owner) = self.network.owner_of(entity) {
                    debug!(
                        event = %event_type,
                        entity = %entity.id(),
                        %owner,
                        "Sending event to owner"
                    );
                    self.network.transmit(owner, event, entity);
                }
            }
            ReplicationMode::Server if role == NetworkMode::Client && identified => {
                debug!(event = %event_type, entity = %entity.id(), "Sending event to server");
                self.network.transmit_to_server(event, entity);
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for EventSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSystem")
            .field("config", &self.config)
            .field("events", &self.registry.borrow().len())
            .field("handlers", &self.table.borrow().len())
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}
