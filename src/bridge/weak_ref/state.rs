//! Bookkeeping shared by a weak reference's two finalizers.
//!
//! Each pair starts with a reference count of two, one per side. Whichever
//! finalizer brings the count to zero releases the cell. When the holder goes
//! first while the target is still alive, cleanup is deferred to the target's
//! finalizer.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BothAlive,
    TargetGone,
    /// Holder collected, target still alive.
    HolderGone,
    BothGone,
}

/// What the caller must do with the shared cell after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The other side still holds a reference.
    Keep,
    /// Holder went first; the target finalizer will release the cell.
    Deferred,
    /// Last reference dropped; free the cell now.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("target finalized twice (phase {0:?})")]
    TargetTwice(Phase),
    #[error("holder finalized twice (phase {0:?})")]
    HolderTwice(Phase),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackState {
    phase: Phase,
    refs: u8,
    cleared: bool,
}

impl Default for CallbackState {
    fn default() -> Self {
        Self {
            phase: Phase::BothAlive,
            refs: 2,
            cleared: false,
        }
    }
}

impl CallbackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn refs(&self) -> u8 {
        self.refs
    }

    /// `true` once `get()` must answer `null`.
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Explicit `clear()` from script. Never releases the cell.
    pub fn clear(&mut self) {
        self.cleared = true;
    }

    pub fn on_target_finalized(&mut self) -> Result<Outcome, TransitionError> {
        let next = match self.phase {
            Phase::BothAlive => Phase::TargetGone,
            Phase::HolderGone => Phase::BothGone,
            phase => return Err(TransitionError::TargetTwice(phase)),
        };

        self.phase = next;
        self.cleared = true;
        Ok(self.release_one(Outcome::Keep))
    }

    pub fn on_holder_finalized(&mut self) -> Result<Outcome, TransitionError> {
        let next = match self.phase {
            Phase::BothAlive => Phase::HolderGone,
            Phase::TargetGone => Phase::BothGone,
            phase => return Err(TransitionError::HolderTwice(phase)),
        };

        self.phase = next;
        Ok(self.release_one(Outcome::Deferred))
    }

    fn release_one(&mut self, pending: Outcome) -> Outcome {
        self.refs -= 1;

        if self.refs == 0 { Outcome::Release } else { pending }
    }
}
