//! Component systems.
//!
//! A [`ComponentSystem`] declares its handlers once through a [`HandlerSet`]
//! and is registered as a unit with
//! [`super::EventSystem::register_event_handler`]:
//!
//! ```ignore
//! impl ComponentSystem for HealthSystem {
//!     fn declare_handlers(&self, handlers: &mut HandlerSet<Self>) {
//!         handlers
//!             .on::<Damaged, _>("on_damaged", |system, event, ctx| system.apply(event, ctx))
//!             .with::<Health>()
//!             .priority(priority::HIGH);
//!     }
//! }
//! ```

use std::sync::Arc;

use super::{
    priority, Event, EventContext, EventTypeId, HandlerId, HandlerInfo, HandlerOwner, HandlerResult,
    Invocable, RegisterMode,
};
use crate::ecs::ComponentType;

type SystemCallback<S> =
    Arc<dyn Fn(&S, &dyn Event, &EventContext<'_>) -> HandlerResult + Send + Sync>;

pub trait ComponentSystem: Send + Sync + Sized + 'static {
    /// Used in logs. Defaults to the type name without its path.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn declare_handlers(&self, handlers: &mut HandlerSet<Self>);
}

/// Handlers declared by one system.
pub struct HandlerSet<S> {
    decls: Vec<HandlerDecl<S>>,
}

impl<S: ComponentSystem> HandlerSet<S> {
    pub(crate) fn new() -> Self {
        Self { decls: Vec::new() }
    }

    /// Declares a handler for events of type `E` (and, through the type
    /// hierarchy, its descendants).
    pub fn on<E, F>(&mut self, name: &str, callback: F) -> &mut HandlerDecl<S>
    where
        E: Event,
        F: Fn(&S, &E, &EventContext<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let callback: SystemCallback<S> = Arc::new(
            move |system: &S, event: &dyn Event, ctx: &EventContext<'_>| -> HandlerResult {
                let typed = event.view::<E>().ok_or_else(|| {
                    let wanted = std::any::type_name::<E>();
                    anyhow::anyhow!("{} cannot be read as {wanted}", event.type_name())
                })?;
                callback(system, typed, ctx)
            },
        );
        self.decls.push(HandlerDecl {
            name: name.to_string(),
            event_type: EventTypeId::of::<E>(),
            required: Vec::new(),
            params: Vec::new(),
            priority: priority::NORMAL,
            activity: None,
            net_filter: RegisterMode::Always,
            callback,
        });
        let last = self.decls.len() - 1;
        &mut self.decls[last]
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub(crate) fn into_decls(self) -> Vec<HandlerDecl<S>> {
        self.decls
    }
}

/// One declared handler, configured in builder style.
pub struct HandlerDecl<S> {
    name: String,
    event_type: EventTypeId,
    required: Vec<ComponentType>,
    params: Vec<ComponentType>,
    priority: i32,
    activity: Option<String>,
    net_filter: RegisterMode,
    callback: SystemCallback<S>,
}

impl<S: ComponentSystem> HandlerDecl<S> {
    /// Requires `C` and hands its value to the handler through
    /// [`EventContext::component`].
    pub fn with<C: Send + Sync + 'static>(&mut self) -> &mut Self {
        let ty = ComponentType::of::<C>();
        if !self.params.contains(&ty) {
            self.params.push(ty);
        }
        self
    }

    /// Requires `C` without passing it in.
    pub fn filter<C: Send + Sync + 'static>(&mut self) -> &mut Self {
        let ty = ComponentType::of::<C>();
        if !self.required.contains(&ty) {
            self.required.push(ty);
        }
        self
    }

    pub fn priority(&mut self, priority: i32) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Runs the handler inside an `activity` span with this name.
    pub fn activity(&mut self, activity: impl Into<String>) -> &mut Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn net_filter(&mut self, mode: RegisterMode) -> &mut Self {
        self.net_filter = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn net_filter_mode(&self) -> RegisterMode {
        self.net_filter
    }

    pub(crate) fn into_info(
        self,
        id: HandlerId,
        owner: HandlerOwner,
        system: &Arc<S>,
    ) -> HandlerInfo {
        let name = format!("{}::{}", system.name(), self.name);
        HandlerInfo::new(
            id,
            owner,
            self.event_type,
            name,
            self.priority,
            self.activity,
            self.required,
            self.params,
            Box::new(SystemHandler {
                system: system.clone(),
                callback: self.callback,
            }),
        )
    }
}

struct SystemHandler<S> {
    system: Arc<S>,
    callback: SystemCallback<S>,
}

impl<S: ComponentSystem> Invocable for SystemHandler<S> {
    fn invoke(&self, event: &dyn Event, ctx: &EventContext<'_>) -> HandlerResult {
        (self.callback)(&self.system, event, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        config::EventSystemConfig,
        ecs::World,
        event::EventSystem,
        net::NullNetwork,
    };

    #[derive(Debug)]
    struct Damaged {
        amount: i32,
    }
    impl Event for Damaged {}

    #[derive(Debug, Clone, PartialEq)]
    struct Health(i32);

    struct Invulnerable;

    #[derive(Default)]
    struct HealthSystem {
        seen: Mutex<Vec<(String, i32)>>,
    }

    impl ComponentSystem for HealthSystem {
        fn declare_handlers(&self, handlers: &mut HandlerSet<Self>) {
            handlers
                .on::<Damaged, _>("apply", |system, event, ctx| {
                    let health = ctx
                        .component::<Health>()
                        .ok_or_else(|| anyhow::anyhow!("health missing"))?;
                    system.seen.lock().unwrap().push(("apply".into(), health.0 - event.amount));
                    Ok(())
                })
                .with::<Health>()
                .priority(priority::HIGH);
            handlers
                .on::<Damaged, _>("shield", |system, event, _| {
                    system.seen.lock().unwrap().push(("shield".into(), event.amount));
                    Ok(())
                })
                .filter::<Invulnerable>()
                .priority(priority::CRITICAL);
            handlers
                .on::<Damaged, _>("hud", |system, event, _| {
                    system.seen.lock().unwrap().push(("hud".into(), event.amount));
                    Ok(())
                })
                .net_filter(RegisterMode::Client);
        }
    }

    #[test]
    fn default_name_is_the_short_type_name() {
        assert_eq!(HealthSystem::default().name(), "HealthSystem");
    }

    #[test]
    fn declared_handlers_follow_their_filters() {
        let world = World::new();
        let e = world.spawn();
        world.insert(e.id(), Health(10));

        let config = EventSystemConfig {
            headless: true,
            ..Default::default()
        };
        let events = EventSystem::new(config, Arc::new(NullNetwork));
        let system = Arc::new(HealthSystem::default());

        // "hud" is client-only and this process is headless.
        assert_eq!(events.register_event_handler(&system), 2);

        events.send(&e, Damaged { amount: 3 });
        assert_eq!(*system.seen.lock().unwrap(), vec![("apply".to_string(), 7)]);

        world.insert(e.id(), Invulnerable);
        system.seen.lock().unwrap().clear();
        events.send(&e, Damaged { amount: 3 });
        assert_eq!(
            *system.seen.lock().unwrap(),
            vec![("shield".to_string(), 3), ("apply".to_string(), 7)]
        );

        assert_eq!(events.unregister_event_handler(&system), 2);
        assert_eq!(events.unregister_event_handler(&system), 0);
    }
}
