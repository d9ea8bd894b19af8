//! Typed multi-subscriber event multiplexer.
//!
//! Listeners receive `&mut C`, the context that owns the hook. Because a
//! hook usually lives inside that same context, firing is split in two:
//! [`Hook::snapshot`] clones the listener list out, after which the caller
//! can release its borrow of the hook and run each listener against the
//! whole context.

use std::collections::HashMap;
use std::sync::Arc;

/// The fixed set of lifecycle events a hook can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// An entity is being removed from its manager.
    Remove,
    /// A window reached its terminal `Closed` state.
    Close,
    /// A window reconnected and every live entity must re-mirror itself.
    Restore,
}

pub type Listener<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

/// Handle returned by [`Hook::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: HookEvent,
    id: u64,
}

struct Entry<C: ?Sized> {
    id: u64,
    once: bool,
    listener: Listener<C>,
}

pub struct Hook<C: ?Sized> {
    listeners: HashMap<HookEvent, Vec<Entry<C>>>,
    next_id: u64,
}

impl<C: ?Sized> Hook<C> {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 0,
        }
    }

    /// Subscribe `listener` to `event`. Listeners run in registration order.
    pub fn on<F>(&mut self, event: HookEvent, listener: F) -> Subscription
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.subscribe(event, false, Arc::new(listener))
    }

    /// Subscribe a listener that is dropped after its first invocation.
    pub fn once<F>(&mut self, event: HookEvent, listener: F) -> Subscription
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.subscribe(event, true, Arc::new(listener))
    }

    fn subscribe(&mut self, event: HookEvent, once: bool, listener: Listener<C>) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners
            .entry(event)
            .or_default()
            .push(Entry { id, once, listener });
        Subscription { event, id }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn off(&mut self, subscription: Subscription) -> bool {
        let Some(entries) = self.listeners.get_mut(&subscription.event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != subscription.id);
        entries.len() < before
    }

    /// Clone out the current listeners for `event`, consuming `once` entries.
    pub fn snapshot(&mut self, event: HookEvent) -> Vec<Listener<C>> {
        let Some(entries) = self.listeners.get_mut(&event) else {
            return Vec::new();
        };
        let snapshot = entries.iter().map(|e| Arc::clone(&e.listener)).collect();
        entries.retain(|e| !e.once);
        snapshot
    }

    /// Fire `event` against a context that does not own this hook.
    pub fn call(&mut self, event: HookEvent, ctx: &mut C) {
        for listener in self.snapshot(event) {
            listener(ctx);
        }
    }

    pub fn len(&self, event: HookEvent) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }
}

impl<C: ?Sized> Default for Hook<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> std::fmt::Debug for Hook<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(event, entries)| (*event, entries.len()))
            .collect();
        f.debug_struct("Hook").field("listeners", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_run_in_registration_order() {
        let mut hook: Hook<Vec<&'static str>> = Hook::new();
        hook.on(HookEvent::Close, |log| log.push("first"));
        hook.on(HookEvent::Close, |log| log.push("second"));
        hook.on(HookEvent::Restore, |log| log.push("other"));

        let mut log = Vec::new();
        hook.call(HookEvent::Close, &mut log);
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn call_without_subscribers_is_noop() {
        let mut hook: Hook<u32> = Hook::new();
        let mut n = 0;
        hook.call(HookEvent::Remove, &mut n);
        assert_eq!(n, 0);
    }

    #[test]
    fn off_is_idempotent() {
        let mut hook: Hook<u32> = Hook::new();
        let sub = hook.on(HookEvent::Remove, |n| *n += 1);
        assert!(hook.off(sub));
        assert!(!hook.off(sub));

        let mut n = 0;
        hook.call(HookEvent::Remove, &mut n);
        assert_eq!(n, 0);
    }

    #[test]
    fn off_removes_only_the_given_subscription() {
        let mut hook: Hook<u32> = Hook::new();
        let a = hook.on(HookEvent::Remove, |n| *n += 1);
        hook.on(HookEvent::Remove, |n| *n += 10);
        hook.off(a);

        let mut n = 0;
        hook.call(HookEvent::Remove, &mut n);
        assert_eq!(n, 10);
    }

    #[test]
    fn once_fires_a_single_time() {
        let mut hook: Hook<u32> = Hook::new();
        hook.once(HookEvent::Restore, |n| *n += 1);
        hook.on(HookEvent::Restore, |n| *n += 100);

        let mut n = 0;
        hook.call(HookEvent::Restore, &mut n);
        hook.call(HookEvent::Restore, &mut n);
        assert_eq!(n, 201);
        assert_eq!(hook.len(HookEvent::Restore), 1);
    }
}
