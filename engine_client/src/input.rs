//! Keyboard input: edge-triggered key state into session [`InputEvent`]s.
//!
//! In a real engine this would sit on top of windowing/raw keyboard
//! sampling; this module only needs to know which abstract keys are
//! currently held and turn newly-pressed ones into events, once each, on
//! the frame they go down.

use std::collections::HashSet;

use crate::client::InputEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Enter,
    Escape,
}

/// Tracks which keys were held last poll so repeats of an already-held key
/// don't re-fire an event every frame.
#[derive(Default)]
pub struct InputState {
    held: HashSet<Key>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Given the keys currently held, returns the ones that just went down.
    pub fn poll(&mut self, held: &[Key]) -> Vec<InputEvent> {
        let held: HashSet<Key> = held.iter().copied().collect();
        let events = held
            .difference(&self.held)
            .map(|key| match key {
                Key::Up => InputEvent::Up,
                Key::Down => InputEvent::Down,
                Key::Enter => InputEvent::Enter,
                Key::Escape => InputEvent::Escape,
            })
            .collect();
        self.held = held;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_key_fires_once() {
        let mut input = InputState::new();
        assert_eq!(input.poll(&[Key::Up]), vec![InputEvent::Up]);
        assert_eq!(input.poll(&[Key::Up]), vec![]);
        assert_eq!(input.poll(&[]), vec![]);
        assert_eq!(input.poll(&[Key::Up]), vec![InputEvent::Up]);
    }
}
