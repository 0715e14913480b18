//! # Sync Status
//!
//! Loading/loaded/error/timeout bookkeeping shared by models, collections and
//! the console services built on top of them.

use crate::store::{RequestOutcome, StoreFailure};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    loaded: bool,
    loading: bool,
    synced: bool,
    timeout: bool,
    error: Option<StoreFailure>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a request as in flight and clears the previous failure state.
    pub fn begin_request(&mut self) {
        self.loading = true;
        self.timeout = false;
        self.error = None;
    }

    /// Records the terminal state of a request. `Aborted` only clears
    /// `loading`.
    pub fn apply(&mut self, outcome: &RequestOutcome) {
        self.loading = false;
        match outcome {
            RequestOutcome::Synced => {
                self.synced = true;
                self.loaded = true;
                self.timeout = false;
                self.error = None;
            }
            RequestOutcome::Success => {
                self.timeout = false;
                self.error = None;
            }
            RequestOutcome::Error(failure) => {
                self.timeout = false;
                self.error = Some(failure.clone());
            }
            RequestOutcome::Timeout => {
                self.timeout = true;
                self.error = None;
            }
            RequestOutcome::Aborted => {}
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn has_synced(&self) -> bool {
        self.synced
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&StoreFailure> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Operation;

    #[test]
    fn lifecycle_transitions() {
        let mut status = SyncStatus::new();
        status.begin_request();
        assert!(status.is_loading());

        status.apply(&RequestOutcome::Error(StoreFailure::new(Operation::Fetch, 500, "")));
        assert!(!status.is_loading());
        assert!(status.has_error());
        assert!(!status.is_loaded());

        status.begin_request();
        assert!(!status.has_error());
        status.apply(&RequestOutcome::Synced);
        assert!(status.is_loaded());
        assert!(status.has_synced());

        status.begin_request();
        status.apply(&RequestOutcome::Timeout);
        assert!(status.has_timeout());
        assert!(status.is_loaded(), "loaded survives a later timeout");
    }
}
