//! Event dispatch.
//!
//! Events are sent to an entity and delivered to every handler interested in
//! that event type, optionally filtered to entities holding specific
//! components, highest priority first.
//! - Consumable events stop at the first handler that consumes them.
//! - Event types may declare parent types; handlers on a parent also receive
//!   the child.
//! - Handlers only run on the dispatch thread. Sends from other threads are
//!   queued and delivered by [`EventSystem::process`].

use std::{
    any::{Any, TypeId},
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::ecs::EntityRef;

pub mod handler;
pub mod priority;
pub mod queue;
pub mod registry;
pub mod system;
pub mod systems;
pub mod table;

pub use handler::{
    EventContext, EventReceiver, HandlerId, HandlerInfo, HandlerOwner, HandlerResult, Invocable,
    InvokeOutcome, RegisterMode,
};
pub use queue::{EventSender, PendingEvent};
pub use registry::{
    EventType, EventTypeId, EventTypeInfo, EventTypeRegistry, EventUri, RegistrationError,
    ReplicationMode, UriParseError,
};
pub use system::{DispatchStats, EventSystem, Sent};
pub use systems::{ComponentSystem, HandlerDecl, HandlerSet};
pub use table::HandlerTable;

/// Object-safe access to the concrete type behind a trait object.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Something that can be sent to an entity.
pub trait Event: AsAny + Send + Sync + fmt::Debug {
    /// Consumable events return their flag here.
    fn consumable(&self) -> Option<&dyn Consumable> {
        None
    }

    /// The entity that caused this event, for network events that should not
    /// be echoed back to the instigating client.
    fn instigator(&self) -> Option<&EntityRef> {
        None
    }

    /// The embedded payload of a declared parent type, so that typed handlers
    /// registered on the parent can read a child event.
    fn parent_view(&self, parent: TypeId) -> Option<&dyn Any> {
        let _ = parent;
        None
    }
}

impl dyn Event {
    pub fn event_type(&self) -> EventTypeId {
        EventTypeId::from_parts(self.as_any().type_id(), self.type_name())
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// This event as `E`, either directly or through [`Event::parent_view`].
    pub fn view<E: Event>(&self) -> Option<&E> {
        self.downcast_ref::<E>().or_else(|| {
            self.parent_view(TypeId::of::<E>())
                .and_then(|parent| parent.downcast_ref::<E>())
        })
    }

    pub fn is_consumed(&self) -> bool {
        self.consumable().is_some_and(|c| c.is_consumed())
    }
}

/// Capability of events whose delivery can be cut short by a handler.
pub trait Consumable {
    fn is_consumed(&self) -> bool;
    fn consume(&self);
}

/// Consumed flag to embed in consumable events.
///
/// Handlers only get `&E`, so the flag is set through a shared reference.
#[derive(Debug, Default)]
pub struct ConsumedFlag(AtomicBool);

impl ConsumedFlag {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clone for ConsumedFlag {
    fn clone(&self) -> Self {
        Self(AtomicBool::new(self.is_consumed()))
    }
}

impl Consumable for ConsumedFlag {
    fn is_consumed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn consume(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Damaged {
        amount: i32,
    }

    impl Event for Damaged {}

    #[derive(Debug)]
    struct FireDamaged {
        base: Damaged,
        consumed: ConsumedFlag,
    }

    impl Event for FireDamaged {
        fn consumable(&self) -> Option<&dyn Consumable> {
            Some(&self.consumed)
        }

        fn parent_view(&self, parent: TypeId) -> Option<&dyn Any> {
            (parent == TypeId::of::<Damaged>()).then_some(&self.base as &dyn Any)
        }
    }

    #[test]
    fn event_type_reflects_concrete_type() {
        let boxed: Box<dyn Event> = Box::new(Damaged { amount: 1 });
        assert_eq!(boxed.as_ref().event_type(), EventTypeId::of::<Damaged>());
    }

    #[test]
    fn child_event_is_viewable_as_parent() {
        let event = FireDamaged {
            base: Damaged { amount: 7 },
            consumed: ConsumedFlag::new(),
        };
        let event: &dyn Event = &event;
        assert_eq!(event.view::<Damaged>().map(|d| d.amount), Some(7));
        assert!(event.view::<FireDamaged>().is_some());
    }

    #[test]
    fn consuming_sets_the_flag() {
        let event = FireDamaged {
            base: Damaged { amount: 1 },
            consumed: ConsumedFlag::new(),
        };
        let event: &dyn Event = &event;
        assert!(!event.is_consumed());
        event.consumable().unwrap().consume();
        assert!(event.is_consumed());

        let plain: &dyn Event = &Damaged { amount: 1 };
        assert!(!plain.is_consumed());
    }
}
