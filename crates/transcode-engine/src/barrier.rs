//! One-shot finalize barrier for the two sample-copy loops.
//!
//! Each loop flips its track's flag once it has drained. Setting a flag and
//! checking whether both are set happen in the same critical section, so
//! exactly one caller observes the transition into [`BarrierState::Finalized`].

use std::sync::{Mutex, PoisonError};

use videokit_common::track::TrackKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Neither,
    AudioDone,
    VideoDone,
    Finalized,
}

/// What the caller of [`CompletionBarrier::mark_done`] must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// This call completed the barrier; the caller finalizes.
    Run,
    /// The other track is still running, or finalize already ran.
    Skip,
}

#[derive(Debug)]
pub struct CompletionBarrier {
    state: Mutex<BarrierState>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState::Neither),
        }
    }

    /// Flag `track` as drained.
    ///
    /// Repeated flags for the same track are no-ops.
    pub fn mark_done(&self, track: TrackKind) -> Finalize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match (*state, track) {
            (BarrierState::Neither, TrackKind::Audio) => BarrierState::AudioDone,
            (BarrierState::Neither, TrackKind::Video) => BarrierState::VideoDone,
            (BarrierState::AudioDone, TrackKind::Video)
            | (BarrierState::VideoDone, TrackKind::Audio) => BarrierState::Finalized,
            (current, _) => current,
        };
        let fired = next == BarrierState::Finalized && *state != BarrierState::Finalized;
        *state = next;
        if fired {
            Finalize::Run
        } else {
            Finalize::Skip
        }
    }

    pub fn state(&self) -> BarrierState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_finalized(&self) -> bool {
        self.state() == BarrierState::Finalized
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn track_strategy() -> impl Strategy<Value = TrackKind> {
        prop_oneof![Just(TrackKind::Audio), Just(TrackKind::Video)]
    }

    #[test]
    fn test_sequential_transitions() {
        let barrier = CompletionBarrier::new();
        assert_eq!(barrier.mark_done(TrackKind::Video), Finalize::Skip);
        assert_eq!(barrier.state(), BarrierState::VideoDone);
        assert_eq!(barrier.mark_done(TrackKind::Video), Finalize::Skip);
        assert_eq!(barrier.mark_done(TrackKind::Audio), Finalize::Run);
        assert!(barrier.is_finalized());
        assert_eq!(barrier.mark_done(TrackKind::Audio), Finalize::Skip);
        assert_eq!(barrier.mark_done(TrackKind::Video), Finalize::Skip);
    }

    #[test]
    fn test_threads_racing_finalize_once() {
        for _ in 0..500 {
            let barrier = Arc::new(CompletionBarrier::new());
            let gate = Arc::new(Barrier::new(2));
            let fired = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = [TrackKind::Audio, TrackKind::Video]
                .into_iter()
                .map(|track| {
                    let barrier = Arc::clone(&barrier);
                    let gate = Arc::clone(&gate);
                    let fired = Arc::clone(&fired);
                    std::thread::spawn(move || {
                        gate.wait();
                        if barrier.mark_done(track) == Finalize::Run {
                            fired.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(fired.load(Ordering::SeqCst), 1);
            assert!(barrier.is_finalized());
        }
    }

    proptest! {
        #[test]
        fn prop_finalize_fires_once_when_both_seen(
            flags in proptest::collection::vec(track_strategy(), 0..12),
        ) {
            let barrier = CompletionBarrier::new();
            let mut seen_audio = false;
            let mut seen_video = false;
            let mut runs = 0;

            for track in flags {
                let both_before = seen_audio && seen_video;
                match track {
                    TrackKind::Audio => seen_audio = true,
                    TrackKind::Video => seen_video = true,
                }
                let outcome = barrier.mark_done(track);
                let completes_now = !both_before && seen_audio && seen_video;
                prop_assert_eq!(outcome == Finalize::Run, completes_now);
                if outcome == Finalize::Run {
                    runs += 1;
                }
            }

            let expected = usize::from(seen_audio && seen_video);
            prop_assert_eq!(runs, expected);
            prop_assert_eq!(barrier.is_finalized(), seen_audio && seen_video);
        }
    }
}
