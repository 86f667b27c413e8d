//! Cross-thread hand-off.
//!
//! Threads other than the dispatch thread never touch handlers. They push a
//! [`PendingEvent`] onto an unbounded FIFO, and the dispatch thread drains it
//! once per tick in [`super::EventSystem::process`]. Offering never blocks
//! and never drops while the event system is alive.

use std::fmt;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use super::Event;
use crate::ecs::{ComponentType, EntityRef};

/// An event waiting for the dispatch thread.
pub struct PendingEvent {
    entity: EntityRef,
    event: Box<dyn Event>,
    component: Option<ComponentType>,
}

impl PendingEvent {
    pub fn new(entity: EntityRef, event: Box<dyn Event>) -> Self {
        Self {
            entity,
            event,
            component: None,
        }
    }

    pub fn for_component(
        entity: EntityRef,
        event: Box<dyn Event>,
        component: ComponentType,
    ) -> Self {
        Self {
            entity,
            event,
            component: Some(component),
        }
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn event(&self) -> &dyn Event {
        self.event.as_ref()
    }

    pub fn component(&self) -> Option<ComponentType> {
        self.component
    }

    pub(crate) fn into_parts(self) -> (EntityRef, Box<dyn Event>, Option<ComponentType>) {
        (self.entity, self.event, self.component)
    }
}

impl fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEvent")
            .field("entity", &self.entity)
            .field("event", &self.event)
            .field("component", &self.component)
            .finish()
    }
}

pub(crate) fn channel() -> (EventSender, UnboundedReceiver<PendingEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Takes the next pending event, if any.
pub(crate) fn poll(rx: &mut UnboundedReceiver<PendingEvent>) -> Option<PendingEvent> {
    match rx.try_recv() {
        Ok(pending) => Some(pending),
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
}

/// Cloneable handle for sending events from any thread.
///
/// Everything sent through it is delivered on the dispatch thread by the
/// next [`super::EventSystem::process`].
#[derive(Clone)]
pub struct EventSender {
    tx: UnboundedSender<PendingEvent>,
}

impl EventSender {
    /// Queues `event` for `entity`. Returns false if the event system is gone.
    pub fn send<E: Event>(&self, entity: &EntityRef, event: E) -> bool {
        self.offer(PendingEvent::new(entity.clone(), Box::new(event)))
    }

    /// Queues a component-scoped send.
    pub fn send_to_component<E: Event>(
        &self,
        entity: &EntityRef,
        event: E,
        component: ComponentType,
    ) -> bool {
        self.offer(PendingEvent::for_component(entity.clone(), Box::new(event), component))
    }

    pub fn offer(&self, pending: PendingEvent) -> bool {
        match self.tx.send(pending) {
            Ok(()) => true,
            Err(mpsc::error::SendError(lost)) => {
                warn!(
                    event = %lost.event().type_name(),
                    entity = %lost.entity().id(),
                    "Event system shut down, dropping event"
                );
                false
            }
        }
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::World;

    #[derive(Debug, PartialEq)]
    struct Tick(u32);
    impl Event for Tick {}

    #[test]
    fn pending_events_come_out_in_offer_order() {
        let world = World::new();
        let e = world.spawn();
        let (sender, mut rx) = channel();

        let worker = {
            let sender = sender.clone();
            let e = e.clone();
            std::thread::spawn(move || {
                for i in 0..3 {
                    assert!(sender.send(&e, Tick(i)));
                }
            })
        };
        worker.join().unwrap();

        let drained: Vec<u32> = std::iter::from_fn(|| poll(&mut rx))
            .map(|p| p.event().downcast_ref::<Tick>().unwrap().0)
            .collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(poll(&mut rx).is_none());
    }

    #[test]
    fn sending_after_shutdown_reports_failure() {
        let world = World::new();
        let e = world.spawn();
        let (sender, rx) = channel();
        drop(rx);
        assert!(!sender.send(&e, Tick(0)));
    }
}
