//! Keyboard input and the listener registry.
//!
//! Listeners are stored by [`ListenerId`] and called in registration order
//! until one reports [`InputResult::Handled`]. A listener captures whatever
//! shared handles it needs (reload triggers, a quit flag) instead of holding
//! a pointer back to the application.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Modifier keys held during a key event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub control: bool,
    pub alt: bool,
    pub shift: bool,
}

impl From<winit::keyboard::ModifiersState> for Modifiers {
    fn from(state: winit::keyboard::ModifiersState) -> Self {
        Self {
            control: state.control_key(),
            alt: state.alt_key(),
            shift: state.shift_key(),
        }
    }
}

/// A key press or release with the modifiers active at that moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyCode,
    pub pressed: bool,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// A press of `key` while exactly the Control modifier is held.
    pub fn is_ctrl_press(&self, key: KeyCode) -> bool {
        self.pressed && self.key == key && self.modifiers.control && !self.modifiers.alt
    }

    /// A press of `key` while exactly the Alt modifier is held.
    pub fn is_alt_press(&self, key: KeyCode) -> bool {
        self.pressed && self.key == key && self.modifiers.alt && !self.modifiers.control
    }
}

/// Whether a listener consumed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputResult {
    Ignored,
    Handled,
}

/// Identifier returned by [`Listeners::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u32);

type Listener<E> = Box<dyn FnMut(&E) -> InputResult>;

/// Ordered id → listener registry.
pub struct Listeners<E> {
    entries: Vec<(ListenerId, Listener<E>)>,
    next_id: u32,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` after all existing ones.
    pub fn add(&mut self, listener: impl FnMut(&E) -> InputResult + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// Unregisters a listener. Returns false if `id` is unknown.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Calls listeners in order until one handles `event`.
    pub fn dispatch(&mut self, event: &E) -> InputResult {
        for (_, listener) in &mut self.entries {
            if listener(event) == InputResult::Handled {
                return InputResult::Handled;
            }
        }
        InputResult::Ignored
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Keyboard state plus the key listeners.
#[derive(Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    modifiers: Modifiers,
    key_listeners: Listeners<KeyEvent>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry the application adds its shortcuts to.
    pub fn key_listeners(&mut self) -> &mut Listeners<KeyEvent> {
        &mut self.key_listeners
    }

    /// Updates the held modifiers.
    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        self.modifiers = modifiers;
    }

    /// Current modifiers.
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Records a key transition and dispatches it to the listeners.
    ///
    /// Key repeats (a press of an already held key) are dispatched too.
    pub fn handle_key(&mut self, key: KeyCode, pressed: bool) -> InputResult {
        if pressed {
            self.pressed_keys.insert(key);
        } else {
            self.pressed_keys.remove(&key);
        }

        let event = KeyEvent {
            key,
            pressed,
            modifiers: self.modifiers,
        };
        self.key_listeners.dispatch(&event)
    }

    /// Whether `key` is currently held.
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    /// Forgets held keys, e.g. after focus loss.
    pub fn release_all(&mut self) {
        self.pressed_keys.clear();
        self.modifiers = Modifiers::default();
    }
}
