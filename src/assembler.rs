//! View assembler: tracks a view's outstanding copy-group count and, once every
//! group has landed, runs the halo synthesizer's final in-view duplication pass and
//! hands the finished view back to the level pipeline's ordering front-end.
//!
//! A view with a single outstanding group is fast-pathed implicitly: `remaining`
//! starts at 1, so the first (and only) call to `finish_one` both records that group's
//! effect and observes the count reach zero in the same call — there is never a
//! separate bookkeeping step for a one-copy view.
//!
//! A reader failure part-way through a view's copy groups does not get surfaced
//! immediately: the error is recorded and the view is abandoned only once every
//! sibling group has also completed (successfully or not), at which point the
//! buffer is handed back for recycling rather than to the consumer.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::LoaderError;
use crate::halo::HaloSynthesizer;
use crate::view::View;

pub enum ViewOutcome<T> {
    Ready(View<T>),
    Failed(View<T>, LoaderError),
}

pub struct InFlightView<T> {
    view: Mutex<Option<View<T>>>,
    error: Mutex<Option<LoaderError>>,
    remaining: AtomicUsize,
}

impl<T> InFlightView<T> {
    pub fn new(view: View<T>, nb_outstanding_copies: usize) -> Self {
        Self {
            view: Mutex::new(Some(view)),
            error: Mutex::new(None),
            remaining: AtomicUsize::new(nb_outstanding_copies.max(1)),
        }
    }

    /// Locks the view for one copy group's writes. The guard's inner `Option` is
    /// `Some` until the last group takes it out in `finish_one`.
    pub fn view_mut(&self) -> MutexGuard<'_, Option<View<T>>> {
        self.view.lock()
    }

    /// Records that one copy group failed. Only the first error is kept — later ones
    /// are superseded, matching "the system continues processing ... a single reader
    /// error" (there is one error to report per abandoned view, not a list).
    pub fn note_error(&self, err: LoaderError) {
        let mut guard = self.error.lock();
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    /// Call once per copy group after its write (or failure) has been recorded.
    /// Returns `Some` exactly once, to whichever caller observes the outstanding count
    /// reach zero.
    pub fn finish_one(&self, halo: &dyn HaloSynthesizer<T>, full_shape: &[u64]) -> Option<ViewOutcome<T>> {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }

        let mut view = self
            .view
            .lock()
            .take()
            .expect("view present while outstanding count has not reached zero");

        if let Some(err) = self.error.lock().take() {
            return Some(ViewOutcome::Failed(view, err));
        }

        halo.fill_existing(&mut view, full_shape);
        Some(ViewOutcome::Ready(view))
    }
}
