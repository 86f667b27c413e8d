//! Gameplay events and systems hosted by the server.
//!
//! Damage goes through three steps, each a separate event:
//! - `AttackRequested` is what callers (console, other threads) send.
//! - `BeforeDamaged` is consumable; armor blocks hits it can absorb.
//! - `Damaged` (or its child `FireDamaged`) applies the hit to `Health` and
//!   is broadcast to clients.

use std::{
    any::{Any, TypeId},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use engine_shared::{
    ecs::{EntityRef, World},
    event::{
        priority, ComponentSystem, Consumable, ConsumedFlag, Event, EventContext, EventReceiver,
        EventSystem, EventTypeInfo, HandlerResult, HandlerSet, RegisterMode,
    },
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

impl Health {
    pub fn full(max: i32) -> Self {
        Self { current: max, max }
    }
}

/// Damage absorbed per hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Armor(pub i32);

#[derive(Debug, Clone)]
pub struct AttackRequested {
    pub amount: i32,
    pub fire: bool,
    pub attacker: Option<EntityRef>,
}

impl Event for AttackRequested {}

#[derive(Debug)]
pub struct BeforeDamaged {
    pub amount: i32,
    consumed: ConsumedFlag,
}

impl BeforeDamaged {
    pub fn new(amount: i32) -> Self {
        Self {
            amount,
            consumed: ConsumedFlag::new(),
        }
    }

    pub fn block(&self) {
        self.consumed.consume();
    }

    pub fn is_blocked(&self) -> bool {
        self.consumed.is_consumed()
    }
}

impl Event for BeforeDamaged {
    fn consumable(&self) -> Option<&dyn Consumable> {
        Some(&self.consumed)
    }
}

#[derive(Debug, Clone)]
pub struct Damaged {
    pub amount: i32,
    pub attacker: Option<EntityRef>,
}

impl Event for Damaged {
    fn instigator(&self) -> Option<&EntityRef> {
        self.attacker.as_ref()
    }
}

/// Fire damage. Handlers on [`Damaged`] receive it too.
#[derive(Debug, Clone)]
pub struct FireDamaged {
    pub base: Damaged,
}

impl Event for FireDamaged {
    fn instigator(&self) -> Option<&EntityRef> {
        self.base.attacker.as_ref()
    }

    fn parent_view(&self, parent: TypeId) -> Option<&dyn Any> {
        (parent == TypeId::of::<Damaged>()).then_some(&self.base as &dyn Any)
    }
}

#[derive(Debug, Clone)]
pub struct Healed {
    pub amount: i32,
}

impl Event for Healed {}

#[derive(Debug, Clone)]
pub struct Died {
    pub killer: Option<EntityRef>,
}

impl Event for Died {}

/// Registers every gameplay event type with `events`.
pub fn register_events(events: &EventSystem) -> anyhow::Result<()> {
    events.register_event("engine:attackRequested", EventTypeInfo::of::<AttackRequested>())?;
    events.register_event("engine:beforeDamaged", EventTypeInfo::of::<BeforeDamaged>())?;
    events.register_event(
        "engine:damaged",
        EventTypeInfo::of::<Damaged>().broadcast().skip_instigator(),
    )?;
    events.register_event(
        "engine:fireDamaged",
        EventTypeInfo::of::<FireDamaged>()
            .parent::<Damaged>()
            .broadcast()
            .skip_instigator(),
    )?;
    events.register_event("engine:healed", EventTypeInfo::of::<Healed>().owner())?;
    events.register_event("engine:died", EventTypeInfo::of::<Died>().broadcast())?;
    Ok(())
}

/// Turns attack requests into damage unless something blocks them.
#[derive(Debug, Default)]
pub struct CombatSystem;

impl CombatSystem {
    fn on_attack(&self, event: &AttackRequested, ctx: &EventContext<'_>) -> HandlerResult {
        let entity = ctx.entity();
        let check = ctx.events().send(entity, BeforeDamaged::new(event.amount));
        if check.dispatched().is_some_and(|before| before.is_blocked()) {
            debug!(entity = %entity.id(), amount = event.amount, "Attack blocked");
            return Ok(());
        }

        let damaged = Damaged {
            amount: event.amount,
            attacker: event.attacker.clone(),
        };
        if event.fire {
            ctx.events().send(entity, FireDamaged { base: damaged });
        } else {
            ctx.events().send(entity, damaged);
        }
        Ok(())
    }
}

impl ComponentSystem for CombatSystem {
    fn declare_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers
            .on::<AttackRequested, _>("on_attack", Self::on_attack)
            .net_filter(RegisterMode::Authority);
    }
}

#[derive(Debug, Default)]
pub struct ArmorSystem;

impl ComponentSystem for ArmorSystem {
    fn declare_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers
            .on::<BeforeDamaged, _>("absorb", |_, event, ctx| {
                let armor = ctx
                    .component::<Armor>()
                    .ok_or_else(|| anyhow::anyhow!("armor missing on {}", ctx.entity().id()))?;
                if armor.0 >= event.amount {
                    event.block();
                }
                Ok(())
            })
            .with::<Armor>()
            .priority(priority::HIGH);
    }
}

/// Keeps `Health` in step with damage and healing.
pub struct HealthSystem {
    world: Arc<World>,
}

impl HealthSystem {
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }

    fn on_damaged(&self, event: &Damaged, ctx: &EventContext<'_>) -> HandlerResult {
        let entity = ctx.entity();
        let mut change = None;
        self.world.update::<Health>(entity.id(), |health| {
            let before = health.current;
            health.current = (health.current - event.amount).max(0);
            change = Some((before, health.current));
        });

        match change {
            Some((0, _)) => debug!(entity = %entity.id(), "Damage on a dead entity"),
            Some((_, 0)) => {
                info!(entity = %entity.id(), "Entity died");
                ctx.events().send(
                    entity,
                    Died {
                        killer: event.attacker.clone(),
                    },
                );
            }
            Some((_, current)) => debug!(entity = %entity.id(), current, "Entity damaged"),
            None => warn!(entity = %entity.id(), "Health vanished during damage"),
        }
        Ok(())
    }

    fn on_healed(&self, event: &Healed, ctx: &EventContext<'_>) -> HandlerResult {
        anyhow::ensure!(event.amount >= 0, "negative heal of {}", event.amount);
        self.world.update::<Health>(ctx.entity().id(), |health| {
            health.current = (health.current + event.amount).min(health.max);
        });
        Ok(())
    }
}

impl ComponentSystem for HealthSystem {
    fn declare_handlers(&self, handlers: &mut HandlerSet<Self>) {
        handlers
            .on::<Damaged, _>("on_damaged", Self::on_damaged)
            .filter::<Health>()
            .activity("health");
        handlers
            .on::<Healed, _>("on_healed", Self::on_healed)
            .filter::<Health>()
            .activity("health");
    }
}

/// Counts deaths. Registered as a plain receiver rather than a system.
#[derive(Debug, Default)]
pub struct DeathCounter {
    deaths: AtomicU64,
}

impl DeathCounter {
    pub fn deaths(&self) -> u64 {
        self.deaths.load(Ordering::Relaxed)
    }
}

impl EventReceiver<Died> for DeathCounter {
    fn on_event(&self, _event: &Died, _entity: &EntityRef) -> HandlerResult {
        self.deaths.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_shared::ecs::ComponentType;

    struct Fixture {
        world: Arc<World>,
        events: EventSystem,
        deaths: Arc<DeathCounter>,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let world = World::new();
        let events = EventSystem::standalone();
        register_events(&events)?;
        events.register_event_handler(&Arc::new(CombatSystem));
        events.register_event_handler(&Arc::new(ArmorSystem));
        events.register_event_handler(&Arc::new(HealthSystem::new(world.clone())));
        let deaths = Arc::new(DeathCounter::default());
        let health = [ComponentType::of::<Health>()];
        events.register_event_receiver::<Died, _>(&deaths, priority::NORMAL, &health);
        Ok(Fixture { world, events, deaths })
    }

    fn attack(amount: i32, fire: bool) -> AttackRequested {
        AttackRequested {
            amount,
            fire,
            attacker: None,
        }
    }

    #[test]
    fn armor_blocks_small_hits() -> anyhow::Result<()> {
        let f = fixture()?;
        let e = f.world.spawn();
        f.world.insert(e.id(), Health::full(100));
        f.world.insert(e.id(), Armor(5));

        f.events.send(&e, attack(5, false));
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(100));

        f.events.send(&e, attack(8, false));
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(92));
        Ok(())
    }

    #[test]
    fn fire_damage_reaches_damage_handlers() -> anyhow::Result<()> {
        let f = fixture()?;
        let e = f.world.spawn();
        f.world.insert(e.id(), Health::full(10));

        f.events.send(&e, attack(4, true));
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(6));
        Ok(())
    }

    #[test]
    fn lethal_damage_counts_a_death_once() -> anyhow::Result<()> {
        let f = fixture()?;
        let e = f.world.spawn();
        f.world.insert(e.id(), Health::full(10));

        f.events.send(&e, attack(25, false));
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(0));
        assert_eq!(f.deaths.deaths(), 1);

        f.events.send(&e, attack(20, false));
        f.events.send(&e, attack(20, true));
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(0));
        assert_eq!(f.deaths.deaths(), 1);
        Ok(())
    }

    #[test]
    fn healing_is_capped_and_rejects_negatives() -> anyhow::Result<()> {
        let f = fixture()?;
        let e = f.world.spawn();
        f.world.insert(e.id(), Health { current: 5, max: 10 });

        f.events.send(&e, Healed { amount: 50 });
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(10));

        let failures = f.events.stats().handler_failures;
        f.events.send(&e, Healed { amount: -3 });
        assert_eq!(f.events.stats().handler_failures, failures + 1);
        assert_eq!(f.world.get::<Health>(e.id()).map(|h| h.current), Some(10));
        Ok(())
    }
}
