//! Ordered play queue with a cursor.
//!
//! The live stream, when present, is the only `Live` entry and sits at index
//! 0.  All cursor moves are silent no-ops when they cannot apply; they return
//! the new index on success so callers know whether a track change happened.

use std::collections::HashSet;

use thiserror::Error;

use crate::track::Track;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("more than one live entry in queue")]
    MultipleLive,
    #[error("live entry must be at index 0, found at {0}")]
    LiveNotFirst(usize),
    #[error("duplicate track id: {0}")]
    DuplicateId(String),
    #[error("current index {index} out of range for queue of {len}")]
    CursorOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct Queue {
    tracks: Vec<Track>,
    current: Option<usize>,
    looping: bool,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            looping: true,
        }
    }
}

impl Queue {
    /// Build a queue, moving a lone live entry to the front.
    pub fn new(tracks: Vec<Track>, looping: bool) -> Result<Self, QueueError> {
        let tracks = normalize(tracks)?;
        let current = if tracks.is_empty() { None } else { Some(0) };
        Ok(Self {
            tracks,
            current,
            looping,
        })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    pub fn live_index(&self) -> Option<usize> {
        self.tracks.iter().position(Track::is_live)
    }

    pub fn has_live(&self) -> bool {
        self.live_index().is_some()
    }

    pub fn next(&mut self) -> Option<usize> {
        let current = self.current?;
        let next = if current + 1 < self.tracks.len() {
            current + 1
        } else if self.looping {
            0
        } else {
            return None;
        };
        self.current = Some(next);
        Some(next)
    }

    pub fn prev(&mut self) -> Option<usize> {
        let current = self.current?;
        let prev = if current > 0 {
            current - 1
        } else if self.looping {
            self.tracks.len() - 1
        } else {
            return None;
        };
        self.current = Some(prev);
        Some(prev)
    }

    pub fn jump_to(&mut self, index: usize) -> Option<usize> {
        if index >= self.tracks.len() {
            return None;
        }
        self.current = Some(index);
        Some(index)
    }

    pub fn jump_to_live(&mut self) -> Option<usize> {
        let idx = self.live_index()?;
        self.current = Some(idx);
        Some(idx)
    }

    /// Where to go when the current track finishes on its own.
    ///
    /// An on-demand track hands back to the live stream when there is one;
    /// otherwise the queue advances like `next()`.
    pub fn advance_after_end(&mut self) -> Option<usize> {
        let current_is_live = self.current()?.is_live();
        if !current_is_live && self.has_live() {
            return self.jump_to_live();
        }
        self.next()
    }

    // ── editing ───────────────────────────────────────────────────────────────

    /// Append a track.  A live track goes to the front instead.
    pub fn enqueue(&mut self, track: Track) -> Result<(), QueueError> {
        self.check_insert(&track)?;
        if track.is_live() {
            self.tracks.insert(0, track);
            self.current = Some(self.current.map_or(0, |c| c + 1));
        } else {
            self.tracks.push(track);
            self.current.get_or_insert(0);
        }
        Ok(())
    }

    /// Insert right after the current entry.
    pub fn enqueue_next(&mut self, track: Track) -> Result<(), QueueError> {
        if track.is_live() {
            return self.enqueue(track);
        }
        self.check_insert(&track)?;
        let pos = self.current.map_or(self.tracks.len(), |c| c + 1);
        self.tracks.insert(pos, track);
        self.current.get_or_insert(0);
        Ok(())
    }

    /// Remove an entry.  Returns the removed track, `None` when out of range.
    ///
    /// Removing the current entry leaves the cursor on whatever slid into its
    /// place (clamped to the end).
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }
        let removed = self.tracks.remove(index);
        self.current = match self.current {
            _ if self.tracks.is_empty() => None,
            Some(c) if index < c => Some(c - 1),
            Some(c) => Some(c.min(self.tracks.len() - 1)),
            None => None,
        };
        Some(removed)
    }

    /// Swap out every on-demand entry, keeping the live anchor.
    ///
    /// The cursor stays on the same track id when it survives the swap, else
    /// it lands on the live entry (or the first entry).
    pub fn replace_on_demand(&mut self, tracks: Vec<Track>) -> Result<(), QueueError> {
        if tracks.iter().any(Track::is_live) {
            return Err(QueueError::MultipleLive);
        }
        let current_id = self.current().map(|t| t.id.clone());
        let mut next: Vec<Track> = self.tracks.iter().filter(|t| t.is_live()).cloned().collect();
        next.extend(tracks);
        let next = normalize(next)?;

        self.current = current_id
            .and_then(|id| next.iter().position(|t| t.id == id))
            .or(if next.is_empty() { None } else { Some(0) });
        self.tracks = next;
        Ok(())
    }

    /// Verify the structural invariants.
    pub fn check_invariants(&self) -> Result<(), QueueError> {
        let mut lives = self.tracks.iter().enumerate().filter(|(_, t)| t.is_live());
        if let Some((idx, _)) = lives.next() {
            if idx != 0 {
                return Err(QueueError::LiveNotFirst(idx));
            }
        }
        if lives.next().is_some() {
            return Err(QueueError::MultipleLive);
        }
        match self.current {
            Some(index) if index >= self.tracks.len() => Err(QueueError::CursorOutOfRange {
                index,
                len: self.tracks.len(),
            }),
            None if !self.tracks.is_empty() => Err(QueueError::CursorOutOfRange {
                index: 0,
                len: self.tracks.len(),
            }),
            _ => Ok(()),
        }
    }

    fn check_insert(&self, track: &Track) -> Result<(), QueueError> {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return Err(QueueError::DuplicateId(track.id.clone()));
        }
        if track.is_live() && self.has_live() {
            return Err(QueueError::MultipleLive);
        }
        Ok(())
    }
}

fn normalize(mut tracks: Vec<Track>) -> Result<Vec<Track>, QueueError> {
    let mut seen = HashSet::new();
    for t in &tracks {
        if !seen.insert(t.id.as_str()) {
            return Err(QueueError::DuplicateId(t.id.clone()));
        }
    }
    let live: Vec<usize> = tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_live())
        .map(|(i, _)| i)
        .collect();
    match live.as_slice() {
        [] | [0] => {}
        [idx] => {
            let live = tracks.remove(*idx);
            tracks.insert(0, live);
        }
        _ => return Err(QueueError::MultipleLive),
    }
    Ok(tracks)
}
