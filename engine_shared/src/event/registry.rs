//! Event type registry.
//!
//! Maps stable string ids (`"<namespace>:<name>"`) to event types and keeps
//! the parent/child lattice between them. The lattice is rebuilt from the
//! declared parents of every registered type on each registration, so the
//! order in which a module registers its events never matters.

use std::{
    any::TypeId,
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Event;
use crate::config::DuplicateEventPolicy;

/// Stable identifier of an event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventUri {
    namespace: String,
    name: String,
}

impl EventUri {
    pub fn new(namespace: &str, name: &str) -> Result<Self, UriParseError> {
        if namespace.is_empty() {
            return Err(UriParseError::EmptyNamespace);
        }
        if name.is_empty() {
            return Err(UriParseError::EmptyName);
        }
        if namespace.contains(':') || name.contains(':') {
            return Err(UriParseError::TooManySeparators);
        }
        Ok(Self {
            namespace: namespace.to_lowercase(),
            name: name.to_lowercase(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for EventUri {
    type Err = UriParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s.trim().split_once(':').ok_or(UriParseError::MissingSeparator)?;
        EventUri::new(namespace, name)
    }
}

impl fmt::Display for EventUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Error type for event uri parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriParseError {
    MissingSeparator,
    TooManySeparators,
    EmptyNamespace,
    EmptyName,
}

impl fmt::Display for UriParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UriParseError::MissingSeparator => write!(f, "expected '<namespace>:<name>'"),
            UriParseError::TooManySeparators => write!(f, "more than one ':' in event uri"),
            UriParseError::EmptyNamespace => write!(f, "empty namespace in event uri"),
            UriParseError::EmptyName => write!(f, "empty name in event uri"),
        }
    }
}

impl std::error::Error for UriParseError {}

/// Runtime identity of an event type (or of a parent category type).
#[derive(Clone, Copy)]
pub struct EventTypeId {
    id: TypeId,
    name: &'static str,
}

impl EventTypeId {
    pub fn of<T: 'static>() -> Self {
        Self::from_parts(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub(crate) fn from_parts(id: TypeId, name: &'static str) -> Self {
        Self { id, name }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for EventTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventTypeId {}

impl Hash for EventTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Which peers receive a copy of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Local only.
    #[default]
    None,
    /// Server to every connected client.
    Broadcast,
    /// Server to the client owning the entity.
    Owner,
    /// Client up to the server.
    Server,
}

/// Declaration of an event type, built at module init.
#[derive(Debug, Clone)]
pub struct EventTypeInfo {
    event_type: EventTypeId,
    parents: Vec<EventTypeId>,
    replication: ReplicationMode,
    skip_instigator: bool,
}

impl EventTypeInfo {
    pub fn of<E: Event>() -> Self {
        Self {
            event_type: EventTypeId::of::<E>(),
            parents: Vec::new(),
            replication: ReplicationMode::None,
            skip_instigator: false,
        }
    }

    /// Declares `P` as a parent: handlers on `P` also receive this event.
    /// `P` does not have to be an event itself; a marker type works as a
    /// category.
    pub fn parent<P: 'static>(mut self) -> Self {
        let parent = EventTypeId::of::<P>();
        if parent != self.event_type && !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
        self
    }

    pub fn replication(mut self, mode: ReplicationMode) -> Self {
        self.replication = mode;
        self
    }

    pub fn broadcast(self) -> Self {
        self.replication(ReplicationMode::Broadcast)
    }

    pub fn owner(self) -> Self {
        self.replication(ReplicationMode::Owner)
    }

    pub fn server(self) -> Self {
        self.replication(ReplicationMode::Server)
    }

    /// Broadcasts skip the client that owns the event's instigator.
    pub fn skip_instigator(mut self) -> Self {
        self.skip_instigator = true;
        self
    }

    pub fn event_type(&self) -> EventTypeId {
        self.event_type
    }

    pub fn parents(&self) -> &[EventTypeId] {
        &self.parents
    }
}

/// A registered event type.
#[derive(Debug, Clone)]
pub struct EventType {
    uri: EventUri,
    info: EventTypeInfo,
    ancestors: Vec<EventTypeId>,
}

impl EventType {
    pub fn uri(&self) -> &EventUri {
        &self.uri
    }

    pub fn id(&self) -> EventTypeId {
        self.info.event_type
    }

    pub fn parents(&self) -> &[EventTypeId] {
        &self.info.parents
    }

    /// Every ancestor, nearest first.
    pub fn ancestors(&self) -> &[EventTypeId] {
        &self.ancestors
    }

    pub fn replication(&self) -> ReplicationMode {
        self.info.replication
    }

    pub fn skip_instigator(&self) -> bool {
        self.info.skip_instigator
    }

    pub fn is_network_event(&self) -> bool {
        self.info.replication != ReplicationMode::None
    }
}

/// Event registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidUri {
        uri: String,
        reason: UriParseError,
    },
    /// The uri is already taken by another type.
    DuplicateEvent {
        uri: EventUri,
        existing: &'static str,
        attempted: &'static str,
    },
    /// The type is already registered under another uri.
    DuplicateType {
        event: &'static str,
        existing: EventUri,
        attempted: EventUri,
    },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::InvalidUri { uri, reason } => {
                write!(f, "invalid event uri '{}': {}", uri, reason)
            }
            RegistrationError::DuplicateEvent {
                uri,
                existing,
                attempted,
            } => write!(
                f,
                "event uri {} already registered to {}, cannot register {}",
                uri, existing, attempted
            ),
            RegistrationError::DuplicateType {
                event,
                existing,
                attempted,
            } => write!(
                f,
                "event {} already registered as {}, cannot register as {}",
                event, existing, attempted
            ),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Id ↔ type map plus the event-type lattice.
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    policy: DuplicateEventPolicy,
    by_uri: HashMap<EventUri, EventTypeId>,
    types: HashMap<EventTypeId, EventType>,
    descendants: HashMap<EventTypeId, Vec<EventTypeId>>,
}

impl EventTypeRegistry {
    pub fn new(policy: DuplicateEventPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Records `uri` ↔ `info.event_type()`.
    ///
    /// Registering the same pair twice is a no-op. Conflicting pairs follow
    /// the duplicate policy.
    pub fn register(
        &mut self,
        uri: EventUri,
        info: EventTypeInfo,
    ) -> Result<(), RegistrationError> {
        let event_type = info.event_type;

        if let Some(&existing) = self.by_uri.get(&uri) {
            if existing == event_type {
                debug!(event = %uri, "Event already registered");
                return Ok(());
            }
            match self.policy {
                DuplicateEventPolicy::Reject => {
                    return Err(RegistrationError::DuplicateEvent {
                        uri,
                        existing: existing.name(),
                        attempted: event_type.name(),
                    });
                }
                DuplicateEventPolicy::Replace => {
                    warn!(
                        event = %uri,
                        old = %existing,
                        new = %event_type,
                        "Replacing event registration"
                    );
                    self.types.remove(&existing);
                    self.by_uri.remove(&uri);
                }
            }
        }

        if let Some(previous) = self.types.get(&event_type).map(|t| t.uri.clone()) {
            match self.policy {
                DuplicateEventPolicy::Reject => {
                    return Err(RegistrationError::DuplicateType {
                        event: event_type.name(),
                        existing: previous,
                        attempted: uri,
                    });
                }
                DuplicateEventPolicy::Replace => {
                    warn!(
                        event = %event_type,
                        old = %previous,
                        new = %uri,
                        "Re-registering event under new uri"
                    );
                    self.by_uri.remove(&previous);
                    self.types.remove(&event_type);
                }
            }
        }

        debug!(event = %uri, ty = %event_type, parents = ?info.parents, "Registering event");
        self.by_uri.insert(uri.clone(), event_type);
        self.types.insert(
            event_type,
            EventType {
                uri,
                info,
                ancestors: Vec::new(),
            },
        );
        self.rebuild_lattice();
        Ok(())
    }

    fn rebuild_lattice(&mut self) {
        let ancestors: Vec<(EventTypeId, Vec<EventTypeId>)> = self
            .types
            .keys()
            .map(|&ty| (ty, self.collect_ancestors(ty)))
            .collect();

        self.descendants.clear();
        for (ty, ancestors) in ancestors {
            for &ancestor in &ancestors {
                self.descendants.entry(ancestor).or_default().push(ty);
            }
            if let Some(entry) = self.types.get_mut(&ty) {
                entry.ancestors = ancestors;
            }
        }
        for children in self.descendants.values_mut() {
            children.sort_by_key(|ty| ty.name());
        }
    }

    /// Breadth-first walk over declared parents. Parents that are not
    /// registered still count, but their own parents are unknown.
    fn collect_ancestors(&self, ty: EventTypeId) -> Vec<EventTypeId> {
        let mut seen = HashSet::from([ty]);
        let mut out = Vec::new();
        let mut frontier: VecDeque<EventTypeId> = VecDeque::from([ty]);
        while let Some(current) = frontier.pop_front() {
            let Some(entry) = self.types.get(&current) else {
                continue;
            };
            for &parent in &entry.info.parents {
                if seen.insert(parent) {
                    out.push(parent);
                    frontier.push_back(parent);
                }
            }
        }
        out
    }

    pub fn get(&self, ty: EventTypeId) -> Option<&EventType> {
        self.types.get(&ty)
    }

    pub fn uri_of(&self, ty: EventTypeId) -> Option<&EventUri> {
        self.types.get(&ty).map(|t| &t.uri)
    }

    pub fn type_of(&self, uri: &EventUri) -> Option<EventTypeId> {
        self.by_uri.get(uri).copied()
    }

    pub fn is_network_replicable(&self, ty: EventTypeId) -> bool {
        self.types.get(&ty).is_some_and(EventType::is_network_event)
    }

    pub fn replication_mode(&self, ty: EventTypeId) -> ReplicationMode {
        self.types
            .get(&ty)
            .map(EventType::replication)
            .unwrap_or_default()
    }

    pub fn should_skip_instigator(&self, ty: EventTypeId) -> bool {
        self.types.get(&ty).is_some_and(EventType::skip_instigator)
    }

    /// Every registered subtype of `ty`, direct and transitive.
    pub fn descendants(&self, ty: EventTypeId) -> &[EventTypeId] {
        self.descendants.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `ty` followed by all of its ancestors. Unregistered types have no
    /// ancestors.
    pub fn lineage(&self, ty: EventTypeId) -> Vec<EventTypeId> {
        let mut lineage = vec![ty];
        if let Some(entry) = self.types.get(&ty) {
            lineage.extend_from_slice(&entry.ancestors);
        }
        lineage
    }

    /// Registered types that take part in replication.
    pub fn network_events(&self) -> impl Iterator<Item = &EventType> {
        self.types.values().filter(|t| t.is_network_event())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Damaged;
    impl Event for Damaged {}

    #[derive(Debug)]
    struct FireDamaged;
    impl Event for FireDamaged {}

    #[derive(Debug)]
    struct Healed;
    impl Event for Healed {}

    struct AnyHealthChange;

    fn uri(s: &str) -> EventUri {
        s.parse().unwrap()
    }

    #[test]
    fn uri_parses_and_normalises_case() {
        let parsed: EventUri = "Core:Damaged".parse().unwrap();
        assert_eq!(parsed.to_string(), "core:damaged");
        assert_eq!(parsed.namespace(), "core");
        assert_eq!("nocolon".parse::<EventUri>(), Err(UriParseError::MissingSeparator));
        assert_eq!(":x".parse::<EventUri>(), Err(UriParseError::EmptyNamespace));
        assert_eq!("a:".parse::<EventUri>(), Err(UriParseError::EmptyName));
        assert_eq!("a:b:c".parse::<EventUri>(), Err(UriParseError::TooManySeparators));
    }

    #[test]
    fn child_is_descendant_of_transitive_parents() {
        let mut registry = EventTypeRegistry::default();
        registry
            .register(
                uri("core:damaged"),
                EventTypeInfo::of::<Damaged>().parent::<AnyHealthChange>(),
            )
            .unwrap();
        registry
            .register(
                uri("core:fire_damaged"),
                EventTypeInfo::of::<FireDamaged>().parent::<Damaged>(),
            )
            .unwrap();

        let fire = EventTypeId::of::<FireDamaged>();
        assert_eq!(
            registry.lineage(fire),
            vec![fire, EventTypeId::of::<Damaged>(), EventTypeId::of::<AnyHealthChange>()]
        );
        assert_eq!(registry.descendants(EventTypeId::of::<Damaged>()), &[fire]);
        let mut under_any = registry.descendants(EventTypeId::of::<AnyHealthChange>()).to_vec();
        under_any.sort_by_key(|t| t.name());
        assert_eq!(under_any.len(), 2);
        assert!(registry.descendants(EventTypeId::of::<Healed>()).is_empty());
    }

    #[test]
    fn lattice_does_not_depend_on_registration_order() {
        let mut registry = EventTypeRegistry::default();
        registry
            .register(
                uri("core:fire_damaged"),
                EventTypeInfo::of::<FireDamaged>().parent::<Damaged>(),
            )
            .unwrap();
        registry
            .register(
                uri("core:damaged"),
                EventTypeInfo::of::<Damaged>().parent::<AnyHealthChange>(),
            )
            .unwrap();

        assert!(registry
            .lineage(EventTypeId::of::<FireDamaged>())
            .contains(&EventTypeId::of::<AnyHealthChange>()));
    }

    #[test]
    fn identical_registration_is_idempotent() {
        let mut registry = EventTypeRegistry::default();
        registry.register(uri("core:damaged"), EventTypeInfo::of::<Damaged>()).unwrap();
        registry.register(uri("core:damaged"), EventTypeInfo::of::<Damaged>()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_uri_is_rejected_by_default() {
        let mut registry = EventTypeRegistry::default();
        registry.register(uri("core:damaged"), EventTypeInfo::of::<Damaged>()).unwrap();
        let err = registry
            .register(uri("core:damaged"), EventTypeInfo::of::<Healed>())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateEvent { .. }));
        assert_eq!(registry.type_of(&uri("core:damaged")), Some(EventTypeId::of::<Damaged>()));

        let err = registry
            .register(uri("core:hurt"), EventTypeInfo::of::<Damaged>())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateType { .. }));
    }

    #[test]
    fn replace_policy_overwrites() {
        let mut registry = EventTypeRegistry::new(DuplicateEventPolicy::Replace);
        registry.register(uri("core:damaged"), EventTypeInfo::of::<Damaged>()).unwrap();
        registry.register(uri("core:damaged"), EventTypeInfo::of::<Healed>()).unwrap();
        assert_eq!(registry.type_of(&uri("core:damaged")), Some(EventTypeId::of::<Healed>()));
        assert!(registry.get(EventTypeId::of::<Damaged>()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replication_metadata_is_recorded() {
        let mut registry = EventTypeRegistry::default();
        registry
            .register(
                uri("core:damaged"),
                EventTypeInfo::of::<Damaged>().broadcast().skip_instigator(),
            )
            .unwrap();
        registry.register(uri("core:healed"), EventTypeInfo::of::<Healed>()).unwrap();

        let damaged = EventTypeId::of::<Damaged>();
        assert!(registry.is_network_replicable(damaged));
        assert_eq!(registry.replication_mode(damaged), ReplicationMode::Broadcast);
        assert!(registry.should_skip_instigator(damaged));
        assert!(!registry.is_network_replicable(EventTypeId::of::<Healed>()));
        assert_eq!(registry.network_events().count(), 1);
        assert_eq!(registry.uri_of(damaged), Some(&uri("core:damaged")));
    }
}
