//! Build progress reporting and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use strum_macros::Display;

use crate::error::BuildError;

/// Phase of a build, in execution order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum BuildStage {
    Spectra,
    PrecursorChromatogram,
    ProductChromatogram,
    Metadata,
}

/// Observer of a running build.
///
/// `is_cancelled` is polled between scans, between chromatogram buckets and
/// between refill rounds; returning `true` aborts the build with
/// [`BuildError::Cancelled`] and removes the partial file.
pub trait BuildProgress {
    fn report(&mut self, _stage: BuildStage, _done: u64, _total: u64) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Ignores progress, never cancels
#[derive(Copy, Clone, Debug, Default)]
pub struct NoProgress;

impl BuildProgress for NoProgress {}

/// Cancellation flag shareable with another thread
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl BuildProgress for CancellationToken {
    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

pub(crate) fn check_cancelled(progress: &dyn BuildProgress) -> Result<(), BuildError> {
    if progress.is_cancelled() {
        return Err(BuildError::Cancelled);
    }
    Ok(())
}
