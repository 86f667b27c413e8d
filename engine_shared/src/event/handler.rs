//! Handler invocation.
//!
//! A [`HandlerInfo`] wraps one registered callback together with the
//! components an entity must hold for it to run and its priority. Invoking it
//! never lets a failure escape: errors and panics are logged and reported as
//! an [`InvokeOutcome`].

use std::{
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{error, info_span};

use super::{Event, EventSystem, EventTypeId};
use crate::ecs::{ComponentType, ComponentValue, EntityRef};

/// What handler callbacks return.
pub type HandlerResult = anyhow::Result<()>;

/// Registration sequence number. Also breaks priority ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

/// Identity of whatever registered a handler (a system or a receiver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerOwner(usize);

impl HandlerOwner {
    /// Identity of the value behind `owner`. Handlers keep their owner alive,
    /// so the address is not reused while any of them is registered.
    pub fn of<T: ?Sized>(owner: &Arc<T>) -> Self {
        Self(Arc::as_ptr(owner) as *const () as usize)
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

/// Which network roles a system handler is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterMode {
    #[default]
    Always,
    /// Only where the game state is authoritative (server or standalone).
    Authority,
    /// Only on clients connected to a remote server.
    RemoteClient,
    /// Only where there is a local player (not headless).
    Client,
}

impl RegisterMode {
    pub fn is_valid_for(self, authority: bool, headless: bool) -> bool {
        match self {
            RegisterMode::Always => true,
            RegisterMode::Authority => authority,
            RegisterMode::RemoteClient => !authority,
            RegisterMode::Client => !headless,
        }
    }
}

/// What a handler sees besides the event.
pub struct EventContext<'a> {
    entity: &'a EntityRef,
    events: &'a EventSystem,
    components: Vec<(ComponentType, ComponentValue)>,
}

impl<'a> EventContext<'a> {
    pub fn entity(&self) -> &'a EntityRef {
        self.entity
    }

    /// The event system, for sending follow-up events.
    pub fn events(&self) -> &'a EventSystem {
        self.events
    }

    /// Value of a component declared as a handler parameter, read just
    /// before the handler was called.
    pub fn component<C: Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        let wanted = ComponentType::of::<C>();
        self.components
            .iter()
            .find(|(ty, _)| *ty == wanted)
            .and_then(|(_, value)| value.clone().downcast::<C>().ok())
    }
}

/// A callable handler body.
pub trait Invocable: Send + Sync {
    fn invoke(&self, event: &dyn Event, ctx: &EventContext<'_>) -> HandlerResult;
}

/// Receives events of type `E` outside of a [`super::ComponentSystem`].
pub trait EventReceiver<E: Event>: Send + Sync + 'static {
    fn on_event(&self, event: &E, entity: &EntityRef) -> HandlerResult;
}

impl<E, F> EventReceiver<E> for F
where
    E: Event,
    F: Fn(&E, &EntityRef) -> HandlerResult + Send + Sync + 'static,
{
    fn on_event(&self, event: &E, entity: &EntityRef) -> HandlerResult {
        self(event, entity)
    }
}

/// Typed closure over `(event, ctx)`.
pub(crate) struct FnHandler<E, F> {
    callback: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnHandler<E, F>
where
    E: Event,
    F: Fn(&E, &EventContext<'_>) -> HandlerResult + Send + Sync,
{
    pub(crate) fn new(callback: F) -> Self {
        Self {
            callback,
            _event: PhantomData,
        }
    }
}

impl<E, F> Invocable for FnHandler<E, F>
where
    E: Event,
    F: Fn(&E, &EventContext<'_>) -> HandlerResult + Send + Sync,
{
    fn invoke(&self, event: &dyn Event, ctx: &EventContext<'_>) -> HandlerResult {
        let typed = event.view::<E>().ok_or_else(|| {
            anyhow::anyhow!(
                "{} cannot be read as {}",
                event.type_name(),
                std::any::type_name::<E>()
            )
        })?;
        (self.callback)(typed, ctx)
    }
}

pub(crate) struct ReceiverHandler<E, R> {
    receiver: Arc<R>,
    _event: PhantomData<fn(&E)>,
}

impl<E, R> ReceiverHandler<E, R> {
    pub(crate) fn new(receiver: Arc<R>) -> Self {
        Self {
            receiver,
            _event: PhantomData,
        }
    }
}

impl<E: Event, R: EventReceiver<E>> Invocable for ReceiverHandler<E, R> {
    fn invoke(&self, event: &dyn Event, ctx: &EventContext<'_>) -> HandlerResult {
        let typed = event.view::<E>().ok_or_else(|| {
            anyhow::anyhow!(
                "{} cannot be read as {}",
                event.type_name(),
                std::any::type_name::<E>()
            )
        })?;
        self.receiver.on_event(typed, ctx.entity())
    }
}

/// How one invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeOutcome {
    Completed,
    Failed,
    Panicked,
}

/// One registered handler.
pub struct HandlerInfo {
    id: HandlerId,
    owner: HandlerOwner,
    event_type: EventTypeId,
    name: String,
    priority: i32,
    activity: Option<String>,
    required: Vec<ComponentType>,
    params: Vec<ComponentType>,
    callback: Box<dyn Invocable>,
}

impl HandlerInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: HandlerId,
        owner: HandlerOwner,
        event_type: EventTypeId,
        name: impl Into<String>,
        priority: i32,
        activity: Option<String>,
        required: Vec<ComponentType>,
        params: Vec<ComponentType>,
        callback: Box<dyn Invocable>,
    ) -> Self {
        let mut filter: Vec<ComponentType> = Vec::with_capacity(required.len() + params.len());
        for component in required.into_iter().chain(params.iter().copied()) {
            if !filter.contains(&component) {
                filter.push(component);
            }
        }
        Self {
            id,
            owner,
            event_type,
            name: name.into(),
            priority,
            activity,
            required: filter,
            params,
            callback,
        }
    }

    /// Handler around a plain closure, no component parameters.
    pub fn from_fn<E, F>(
        id: HandlerId,
        owner: HandlerOwner,
        name: impl Into<String>,
        priority: i32,
        required: Vec<ComponentType>,
        callback: F,
    ) -> Self
    where
        E: Event,
        F: Fn(&E, &EventContext<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(
            id,
            owner,
            EventTypeId::of::<E>(),
            name,
            priority,
            None,
            required,
            Vec::new(),
            Box::new(FnHandler::<E, F>::new(callback)),
        )
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn owner(&self) -> HandlerOwner {
        self.owner
    }

    pub fn event_type(&self) -> EventTypeId {
        self.event_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn activity(&self) -> Option<&str> {
        self.activity.as_deref()
    }

    /// Every component the entity must hold, in declaration order.
    pub fn required_components(&self) -> &[ComponentType] {
        &self.required
    }

    pub fn is_general(&self) -> bool {
        self.required.is_empty()
    }

    pub fn is_valid_for(&self, entity: &EntityRef) -> bool {
        self.required.iter().all(|c| entity.has_component(*c))
    }

    /// Calls the handler. Errors and panics are logged here and go no
    /// further.
    pub fn invoke(
        &self,
        entity: &EntityRef,
        event: &dyn Event,
        events: &EventSystem,
    ) -> InvokeOutcome {
        let components = self
            .params
            .iter()
            .filter_map(|ty| entity.get_component(*ty).map(|value| (*ty, value)))
            .collect();
        let ctx = EventContext {
            entity,
            events,
            components,
        };

        let _activity = self
            .activity
            .as_deref()
            .map(|activity| info_span!("activity", activity).entered());

        match panic::catch_unwind(AssertUnwindSafe(|| self.callback.invoke(event, &ctx))) {
            Ok(Ok(())) => InvokeOutcome::Completed,
            Ok(Err(err)) => {
                error!(
                    handler = %self.name,
                    event = %event.type_name(),
                    entity = %entity.id(),
                    error = ?err,
                    "Event handler failed"
                );
                InvokeOutcome::Failed
            }
            Err(payload) => {
                error!(
                    handler = %self.name,
                    event = %event.type_name(),
                    entity = %entity.id(),
                    panic = %panic_message(payload.as_ref()),
                    "Event handler panicked"
                );
                InvokeOutcome::Panicked
            }
        }
    }
}

impl fmt::Debug for HandlerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic>".to_string()
    }
}
