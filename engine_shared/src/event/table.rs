//! Handler table.
//!
//! Two indices over registered handlers: general handlers keyed by event
//! type, and component-specific handlers keyed by event type then component
//! type. Selection only touches the buckets of the event's lineage and the
//! components the entity actually holds.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use super::{EventTypeId, HandlerId, HandlerInfo, HandlerOwner};
use crate::ecs::{ComponentType, EntityRef};

#[derive(Debug, Default)]
pub struct HandlerTable {
    general: HashMap<EventTypeId, Vec<Arc<HandlerInfo>>>,
    component_specific: HashMap<EventTypeId, HashMap<ComponentType, Vec<Arc<HandlerInfo>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a handler under its own event type, by its required
    /// components if it has any.
    pub fn add(&mut self, handler: Arc<HandlerInfo>) {
        let event_type = handler.event_type();
        if handler.is_general() {
            self.add_general_handler(event_type, handler);
        } else {
            let required = handler.required_components().to_vec();
            self.add_component_handler(event_type, handler, &required);
        }
    }

    pub fn add_general_handler(&mut self, event_type: EventTypeId, handler: Arc<HandlerInfo>) {
        self.general.entry(event_type).or_default().push(handler);
    }

    /// Indexes the handler once per required component.
    pub fn add_component_handler(
        &mut self,
        event_type: EventTypeId,
        handler: Arc<HandlerInfo>,
        required: &[ComponentType],
    ) {
        let by_component = self.component_specific.entry(event_type).or_default();
        for component in required {
            let bucket = by_component.entry(*component).or_default();
            if !bucket.iter().any(|h| h.id() == handler.id()) {
                bucket.push(handler.clone());
            }
        }
    }

    /// Removes every handler registered by `owner`. Returns how many distinct
    /// handlers went away.
    pub fn remove_handlers_of(&mut self, owner: HandlerOwner) -> usize {
        let mut removed = HashSet::new();
        for bucket in self.general.values_mut() {
            drain_owner(bucket, owner, &mut removed);
        }
        for by_component in self.component_specific.values_mut() {
            for bucket in by_component.values_mut() {
                drain_owner(bucket, owner, &mut removed);
            }
        }
        self.prune();
        removed.len()
    }

    /// Removes the handlers `owner` registered for exactly `event_type` and
    /// `required`.
    pub fn remove_receiver(
        &mut self,
        owner: HandlerOwner,
        event_type: EventTypeId,
        required: &[ComponentType],
    ) -> usize {
        let mut removed = HashSet::new();
        if required.is_empty() {
            if let Some(bucket) = self.general.get_mut(&event_type) {
                drain_owner(bucket, owner, &mut removed);
            }
        } else if let Some(by_component) = self.component_specific.get_mut(&event_type) {
            for component in required {
                if let Some(bucket) = by_component.get_mut(component) {
                    drain_owner(bucket, owner, &mut removed);
                }
            }
        }
        self.prune();
        removed.len()
    }

    fn prune(&mut self) {
        self.general.retain(|_, bucket| !bucket.is_empty());
        for by_component in self.component_specific.values_mut() {
            by_component.retain(|_, bucket| !bucket.is_empty());
        }
        self.component_specific.retain(|_, by_component| !by_component.is_empty());
    }

    /// Handlers interested in an event whose type and ancestors are
    /// `lineage`, sent to `entity`. Each handler appears once, whatever the
    /// number of components it matched through. Unsorted.
    pub fn select_candidates(
        &self,
        lineage: &[EventTypeId],
        entity: &EntityRef,
    ) -> Vec<Arc<HandlerInfo>> {
        let mut seen: HashSet<HandlerId> = HashSet::new();
        let mut out = Vec::new();

        for event_type in lineage {
            if let Some(bucket) = self.general.get(event_type) {
                for handler in bucket {
                    if seen.insert(handler.id()) {
                        out.push(handler.clone());
                    }
                }
            }

            let Some(by_component) = self.component_specific.get(event_type) else {
                continue;
            };
            for (component, bucket) in by_component {
                if !entity.has_component(*component) {
                    continue;
                }
                for handler in bucket {
                    if !seen.contains(&handler.id()) && handler.is_valid_for(entity) {
                        seen.insert(handler.id());
                        out.push(handler.clone());
                    }
                }
            }
        }
        out
    }

    /// Component-specific handlers bound to `component` for an event with the
    /// given lineage. General handlers are never included.
    pub fn component_candidates(
        &self,
        lineage: &[EventTypeId],
        component: ComponentType,
    ) -> Vec<Arc<HandlerInfo>> {
        let mut seen: HashSet<HandlerId> = HashSet::new();
        lineage
            .iter()
            .filter_map(|event_type| self.component_specific.get(event_type))
            .filter_map(|by_component| by_component.get(&component))
            .flatten()
            .filter(|handler| seen.insert(handler.id()))
            .cloned()
            .collect()
    }

    /// Number of distinct registered handlers.
    pub fn len(&self) -> usize {
        let general = self.general.values().flatten();
        let specific = self.component_specific.values().flat_map(|m| m.values()).flatten();
        general
            .chain(specific)
            .map(|h| h.id())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.general.is_empty() && self.component_specific.is_empty()
    }
}

fn drain_owner(
    bucket: &mut Vec<Arc<HandlerInfo>>,
    owner: HandlerOwner,
    removed: &mut HashSet<HandlerId>,
) {
    bucket.retain(|handler| {
        if handler.owner() == owner {
            removed.insert(handler.id());
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::World;
    use crate::event::Event;

    #[derive(Debug)]
    struct Damaged;
    impl Event for Damaged {}

    struct Health;
    struct Armor;

    fn handler(id: u64, owner: usize, required: Vec<ComponentType>) -> Arc<HandlerInfo> {
        Arc::new(HandlerInfo::from_fn::<Damaged, _>(
            HandlerId(id),
            HandlerOwner::from_raw(owner),
            format!("h{id}"),
            0,
            required,
            |_, _| Ok(()),
        ))
    }

    fn ids(handlers: &[Arc<HandlerInfo>]) -> Vec<u64> {
        let mut ids: Vec<u64> = handlers.iter().map(|h| h.id().0).collect();
        ids.sort();
        ids
    }

    #[test]
    fn selection_filters_by_components_and_dedups() {
        let world = World::new();
        let both = world.spawn();
        world.insert(both.id(), Health);
        world.insert(both.id(), Armor);
        let bare = world.spawn();

        let mut table = HandlerTable::new();
        table.add(handler(0, 1, Vec::new()));
        table.add(handler(1, 1, vec![ComponentType::of::<Health>(), ComponentType::of::<Armor>()]));
        table.add(handler(2, 2, vec![ComponentType::of::<Health>()]));

        let lineage = [EventTypeId::of::<Damaged>()];
        assert_eq!(ids(&table.select_candidates(&lineage, &both)), vec![0, 1, 2]);
        assert_eq!(ids(&table.select_candidates(&lineage, &bare)), vec![0]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn component_candidates_skip_general_handlers() {
        let mut table = HandlerTable::new();
        table.add(handler(0, 1, Vec::new()));
        table.add(handler(1, 1, vec![ComponentType::of::<Health>()]));
        table.add(handler(2, 1, vec![ComponentType::of::<Armor>()]));

        let lineage = [EventTypeId::of::<Damaged>()];
        let health = ComponentType::of::<Health>();
        assert_eq!(ids(&table.component_candidates(&lineage, health)), vec![1]);
    }

    #[test]
    fn removing_an_owner_is_idempotent() {
        let mut table = HandlerTable::new();
        table.add(handler(0, 1, Vec::new()));
        table.add(handler(1, 1, vec![ComponentType::of::<Health>(), ComponentType::of::<Armor>()]));
        table.add(handler(2, 2, Vec::new()));

        assert_eq!(table.remove_handlers_of(HandlerOwner::from_raw(1)), 2);
        assert_eq!(table.remove_handlers_of(HandlerOwner::from_raw(1)), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn receiver_removal_is_scoped_to_its_components() {
        let mut table = HandlerTable::new();
        table.add(handler(0, 1, vec![ComponentType::of::<Health>()]));
        table.add(handler(1, 1, Vec::new()));

        let removed = table.remove_receiver(
            HandlerOwner::from_raw(1),
            EventTypeId::of::<Damaged>(),
            &[ComponentType::of::<Health>()],
        );
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }
}
