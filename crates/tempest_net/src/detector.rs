use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempest_traits::{TerminationCause, Terminate};
use tracing::{debug, info};

/// Cooperative stop signal for the flood loop. Set once, never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// One-shot observer of transport failure.
///
/// The first call to [`FailureDetector::observe`] records the cause, sets the
/// cancellation flag and requests termination of every registered context.
/// Later observations are dropped.
pub struct FailureDetector {
    cancel: CancellationFlag,
    cause: Mutex<Option<TerminationCause>>,
    teardown: Mutex<Vec<Arc<dyn Terminate>>>,
}

impl FailureDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancel: CancellationFlag::new(),
            cause: Mutex::new(None),
            teardown: Mutex::new(Vec::new()),
        })
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Registers a context to terminate on failure. If the detector already
    /// fired, termination is requested immediately.
    pub fn on_failure(&self, target: Arc<dyn Terminate>) {
        let mut teardown = self.teardown.lock();
        if self.has_fired() {
            drop(teardown);
            target.request_termination();
            return;
        }
        teardown.push(target);
    }

    /// Returns true only for the observation that actually triggered teardown.
    pub fn observe(&self, cause: TerminationCause) -> bool {
        {
            let mut slot = self.cause.lock();
            if let Some(first) = slot.as_ref() {
                debug!("Failure already handled ({:?}), ignoring {:?}", first, cause);
                return false;
            }
            info!("Transport failure detected: {:?}", cause);
            *slot = Some(cause);
        }

        self.cancel.set();

        let targets = std::mem::take(&mut *self.teardown.lock());
        for target in targets {
            target.request_termination();
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.cause.lock().is_some()
    }

    pub fn cause(&self) -> Option<TerminationCause> {
        self.cause.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTarget(AtomicUsize);

    impl Terminate for CountingTarget {
        fn request_termination(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn only_first_failure_is_acted_upon() {
        let detector = FailureDetector::new();
        let target = Arc::new(CountingTarget::default());
        detector.on_failure(target.clone());
        let cancel = detector.cancellation();

        assert!(!cancel.is_set());
        assert!(detector.observe(TerminationCause::PeerClosed));
        assert!(!detector.observe(TerminationCause::WriteFailed("broken pipe".into())));

        assert!(cancel.is_set());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
        assert_eq!(detector.cause(), Some(TerminationCause::PeerClosed));
    }

    #[test]
    fn late_registration_terminates_immediately() {
        let detector = FailureDetector::new();
        detector.observe(TerminationCause::ReadFailed("connection reset".into()));

        let target = Arc::new(CountingTarget::default());
        detector.on_failure(target.clone());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flag_is_shared_between_clones() {
        let detector = FailureDetector::new();
        let a = detector.cancellation();
        let b = a.clone();
        detector.observe(TerminationCause::PeerClosed);
        assert!(a.is_set() && b.is_set());
    }
}
