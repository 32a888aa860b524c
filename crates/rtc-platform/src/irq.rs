use std::cell::RefCell;
use std::rc::Rc;

/// A single interrupt output wire driven by a device.
pub trait IrqLine {
    fn set_level(&mut self, level: bool);

    fn pulse(&mut self) {
        self.set_level(true);
        self.set_level(false);
    }
}

impl<L: IrqLine + ?Sized> IrqLine for Box<L> {
    fn set_level(&mut self, level: bool) {
        (**self).set_level(level);
    }

    fn pulse(&mut self) {
        (**self).pulse();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEvent {
    Raise,
    Lower,
}

#[derive(Debug, Default)]
struct LineState {
    asserted: bool,
    raises: u64,
    events: Vec<IrqEvent>,
}

/// Interrupt line that records every level transition. Clones observe the same wire.
///
/// Only real transitions are recorded: raising an already-asserted line is not a new edge.
#[derive(Debug, Default, Clone)]
pub struct RecordingIrqLine {
    state: Rc<RefCell<LineState>>,
}

impl RecordingIrqLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_asserted(&self) -> bool {
        self.state.borrow().asserted
    }

    /// Number of low-to-high transitions seen since creation.
    pub fn raise_count(&self) -> u64 {
        self.state.borrow().raises
    }

    pub fn take_events(&self) -> Vec<IrqEvent> {
        std::mem::take(&mut self.state.borrow_mut().events)
    }
}

impl IrqLine for RecordingIrqLine {
    fn set_level(&mut self, level: bool) {
        let mut state = self.state.borrow_mut();
        if state.asserted == level {
            return;
        }
        state.asserted = level;
        if level {
            state.raises += 1;
            state.events.push(IrqEvent::Raise);
        } else {
            state.events.push(IrqEvent::Lower);
        }
    }
}

/// Line that is not wired anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIrqLine;

impl IrqLine for NullIrqLine {
    fn set_level(&mut self, _level: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transitions_are_recorded() {
        let line = RecordingIrqLine::new();
        let mut wire = line.clone();
        wire.set_level(true);
        wire.set_level(true);
        wire.set_level(false);
        wire.pulse();

        assert_eq!(
            line.take_events(),
            vec![
                IrqEvent::Raise,
                IrqEvent::Lower,
                IrqEvent::Raise,
                IrqEvent::Lower
            ]
        );
        assert_eq!(line.raise_count(), 2);
        assert!(!line.is_asserted());
    }

    #[test]
    fn boxed_lines_forward_to_the_inner_line() {
        let line = RecordingIrqLine::new();
        let mut boxed: Box<dyn IrqLine> = Box::new(line.clone());
        boxed.set_level(true);
        assert!(line.is_asserted());
    }
}
