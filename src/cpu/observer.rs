//! Observer notifications for the execution engine.
//!
//! Observers see values after the fact and have no way back into the
//! machine, so tracing or UI code cannot change what a program does.

use super::execute::ComputerStatus;
use super::registers::Register;

/// Receives notifications from a [`Cpu`](super::Cpu).
///
/// Every method has an empty default body; implement only what you need.
pub trait Observer: Send {
    fn register_updated(&mut self, _reg: Register, _value: i16) {}

    fn memory_updated(&mut self, _addr: u16, _value: u8) {}

    /// An instruction word was fetched from `pc`.
    fn instruction_fetched(&mut self, _pc: u16, _word: u16) {}

    fn before_execution(&mut self, _word: u16) {}

    fn after_execution(&mut self, _word: u16) {}

    fn status_changed(&mut self, _from: ComputerStatus, _to: ComputerStatus) {}

    /// Text written to the console by the running program.
    fn console_printed(&mut self, _text: &str) {}

    fn computer_reset(&mut self) {}
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// Listener registry with synchronous, in-order dispatch.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(ListenerId, Box<dyn Observer>)>,
    next_id: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn Observer>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, observer));
        id
    }

    /// Remove a listener. Returns it if it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> Option<Box<dyn Observer>> {
        let pos = self.listeners.iter().position(|(lid, _)| *lid == id)?;
        Some(self.listeners.remove(pos).1)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call `f` on every listener in registration order.
    pub fn dispatch(&mut self, mut f: impl FnMut(&mut dyn Observer)) {
        for (_, listener) in self.listeners.iter_mut() {
            f(listener.as_mut());
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
