//! Turns per-pass note detections into note-on / note-off events.
//!
//! Positions are absolute sample indices supplied by the caller.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    On { note: u8, position: u64 },
    Off { note: u8, position: u64 },
}

pub struct NoteTracker {
    /// Samples a note may go without being re-detected before it is released.
    least_length: u64,
    active: Option<u8>,
    last_position: u64,
}

impl NoteTracker {
    pub fn new(least_length: u64) -> Self {
        Self { least_length, active: None, last_position: 0 }
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.last_position = 0;
    }

    pub fn active(&self) -> Option<u8> {
        self.active
    }

    pub fn track(&mut self, note: Option<u8>, position: u64, mut emit: impl FnMut(NoteEvent)) {
        if let Some(active) = self.active {
            if position.saturating_sub(self.last_position) > self.least_length {
                emit(NoteEvent::Off { note: active, position });
                self.active = None;
            }
        }

        let Some(note) = note else { return };
        match self.active {
            Some(active) if active == note => {
                self.last_position = position;
            }
            Some(active) => {
                emit(NoteEvent::Off { note: active, position });
                emit(NoteEvent::On { note, position });
                self.active = Some(note);
                self.last_position = position;
            }
            None => {
                emit(NoteEvent::On { note, position });
                self.active = Some(note);
                self.last_position = position;
            }
        }
    }
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new(3000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(tracker: &mut NoteTracker, note: Option<u8>, position: u64) -> Vec<NoteEvent> {
        let mut events = Vec::new();
        tracker.track(note, position, |e| events.push(e));
        events
    }

    #[test]
    fn test_note_on_then_sustain() {
        let mut tracker = NoteTracker::default();
        assert_eq!(track(&mut tracker, Some(57), 0), vec![NoteEvent::On { note: 57, position: 0 }]);
        assert!(track(&mut tracker, Some(57), 1024).is_empty());
        assert!(track(&mut tracker, None, 2048).is_empty());
        assert_eq!(tracker.active(), Some(57));
    }

    #[test]
    fn test_note_released_after_least_length() {
        let mut tracker = NoteTracker::new(3000);
        track(&mut tracker, Some(60), 1000);
        assert!(track(&mut tracker, None, 4000).is_empty());
        assert_eq!(track(&mut tracker, None, 4001), vec![NoteEvent::Off { note: 60, position: 4001 }]);
        assert_eq!(tracker.active(), None);
        assert!(track(&mut tracker, None, 9000).is_empty());
    }

    #[test]
    fn test_new_note_retriggers() {
        let mut tracker = NoteTracker::default();
        track(&mut tracker, Some(60), 0);
        assert_eq!(
            track(&mut tracker, Some(62), 512),
            vec![
                NoteEvent::Off { note: 60, position: 512 },
                NoteEvent::On { note: 62, position: 512 },
            ]
        );
        assert_eq!(tracker.active(), Some(62));
    }

    #[test]
    fn test_release_then_same_note_starts_again() {
        let mut tracker = NoteTracker::new(100);
        track(&mut tracker, Some(69), 0);
        assert_eq!(
            track(&mut tracker, Some(69), 500),
            vec![
                NoteEvent::Off { note: 69, position: 500 },
                NoteEvent::On { note: 69, position: 500 },
            ]
        );
    }
}
