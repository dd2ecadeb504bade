//! Synchronous observer lists keyed by event.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(usize);

type Slot<E> = Box<dyn FnMut(E)>;

/// Callbacks registered per event, invoked in registration order.
pub struct Hooks<E> {
    slots: Vec<(HookId, E, Slot<E>)>,
    next_id: usize,
}

impl<E: Copy + PartialEq> Hooks<E> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
        }
    }

    pub fn connect(&mut self, event: E, slot: impl FnMut(E) + 'static) -> HookId {
        self.next_id += 1;
        let id = HookId(self.next_id);
        self.slots.push((id, event, Box::new(slot)));
        id
    }

    /// Returns false if `id` was not connected.
    pub fn disconnect(&mut self, id: HookId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot_id, _, _)| *slot_id != id);
        self.slots.len() < before
    }

    pub fn emit(&mut self, event: E) {
        for (_, slot_event, slot) in self.slots.iter_mut() {
            if *slot_event == event {
                slot(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl<E: Copy + PartialEq> Default for Hooks<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for Hooks<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|(id, event, _)| (id, event)))
            .finish()
    }
}
