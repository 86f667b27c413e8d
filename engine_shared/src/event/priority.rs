//! Handler priorities. Higher runs first.

use std::cmp::Ordering;

use super::HandlerInfo;

pub const CRITICAL: i32 = 200;
pub const HIGH: i32 = 150;
pub const NORMAL: i32 = 100;
pub const LOW: i32 = 50;
pub const TRIVIAL: i32 = 25;

/// Descending priority; equal priorities keep registration order.
pub fn compare(a: &HandlerInfo, b: &HandlerInfo) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| a.id().cmp(&b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventTypeId, HandlerId, HandlerOwner};

    #[derive(Debug)]
    struct Ping;
    impl crate::event::Event for Ping {}

    fn info(id: u64, priority: i32) -> HandlerInfo {
        HandlerInfo::from_fn::<Ping, _>(
            HandlerId(id),
            HandlerOwner::from_raw(1),
            "test",
            priority,
            Vec::new(),
            |_, _| Ok(()),
        )
    }

    #[test]
    fn higher_priority_sorts_first() {
        let mut handlers = vec![info(0, 10), info(1, 5), info(2, 20)];
        handlers.sort_by(compare);
        let order: Vec<i32> = handlers.iter().map(HandlerInfo::priority).collect();
        assert_eq!(order, vec![20, 10, 5]);
    }

    #[test]
    fn ties_keep_registration_order() {
        let mut handlers = vec![info(3, NORMAL), info(1, NORMAL), info(2, HIGH)];
        handlers.sort_by(compare);
        let ids: Vec<HandlerId> = handlers.iter().map(HandlerInfo::id).collect();
        assert_eq!(ids, vec![HandlerId(2), HandlerId(1), HandlerId(3)]);
        assert_eq!(handlers[0].event_type(), EventTypeId::of::<Ping>());
    }

    #[test]
    fn extreme_priorities_do_not_overflow() {
        let mut handlers = vec![info(0, i32::MIN), info(1, i32::MAX)];
        handlers.sort_by(compare);
        assert_eq!(handlers[0].priority(), i32::MAX);
    }
}
