//! Per-request entry point tying the filter, transformer, and dispatcher together

use crate::mirror::dispatch::{dispatch, ReplaySink};
use crate::mirror::filter::should_mirror;
use crate::mirror::options::MirrorOptions;
use crate::mirror::transform::build_mirrored;
use crate::mirror::types::{ObservedRequest, SkipReason};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// What the pipeline did with one observed request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MirrorOutcome {
    Skipped(SkipReason),
    Dispatched,
    /// A stage panicked; the fault was contained
    Faulted(String),
}

/// Mirror pipeline invoked once per intercepted request
#[derive(Clone)]
pub struct MirrorPipeline {
    options: MirrorOptions,
    sink: Arc<dyn ReplaySink>,
}

impl MirrorPipeline {
    pub fn new(options: MirrorOptions, sink: Arc<dyn ReplaySink>) -> Self {
        Self { options, sink }
    }

    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    /// Mirror `req` if eligible; never fails and never touches `req`
    pub fn on_request(&self, req: &ObservedRequest) -> MirrorOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.run(req))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(url = %req.canonical_url(), "mirror pipeline fault contained: {message}");
                MirrorOutcome::Faulted(message)
            }
        }
    }

    fn run(&self, req: &ObservedRequest) -> MirrorOutcome {
        let options = self.options.snapshot();

        let target = match should_mirror(req, &options) {
            Ok(target) => target,
            Err(reason) => {
                debug!(%reason, "request not mirrored");
                return MirrorOutcome::Skipped(reason);
            }
        };

        let mirrored = build_mirrored(req, &target);
        dispatch(self.sink.as_ref(), mirrored);
        MirrorOutcome::Dispatched
    }
}

impl std::fmt::Debug for MirrorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorPipeline")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::dispatch::DispatchError;
    use crate::mirror::types::{MirroredRequest, ReplayOrigin, X_MIRRORED_FROM};
    use http::Method;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<MirroredRequest>>);

    impl ReplaySink for Recording {
        fn submit(&self, request: MirroredRequest) -> Result<(), DispatchError> {
            self.0.lock().push(request);
            Ok(())
        }
    }

    struct Panicking;

    impl ReplaySink for Panicking {
        fn submit(&self, _request: MirroredRequest) -> Result<(), DispatchError> {
            panic!("replay mechanism exploded");
        }
    }

    struct Failing;

    impl ReplaySink for Failing {
        fn submit(&self, _request: MirroredRequest) -> Result<(), DispatchError> {
            Err(DispatchError::Transport("connection refused".to_string()))
        }
    }

    fn pipeline(base: &str, pattern: &str) -> (MirrorPipeline, Arc<Recording>) {
        let sink = Arc::new(Recording::default());
        let pipeline = MirrorPipeline::new(MirrorOptions::new(base, pattern), sink.clone());
        (pipeline, sink)
    }

    fn api_request() -> ObservedRequest {
        ObservedRequest::from_url(Method::GET, "https://svc.internal/api/v1/items?id=5")
            .unwrap()
            .with_header("Cookie", "s=1")
    }

    #[test]
    fn test_end_to_end_mirror() {
        let (pipeline, sink) = pipeline("https://mirror.test", ".*api.*");
        let req = api_request();
        let before = req.clone();

        assert_eq!(pipeline.on_request(&req), MirrorOutcome::Dispatched);

        let sent = sink.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::GET);
        assert_eq!(sent[0].url(), "https://mirror.test/api/v1/items?id=5");
        assert!(!sent[0].headers.contains("cookie"));
        assert_eq!(
            sent[0].headers.get(X_MIRRORED_FROM),
            Some("https://svc.internal/api/v1/items?id=5")
        );
        assert_eq!(req, before);
    }

    #[test]
    fn test_skips_do_not_dispatch() {
        let (pipeline, sink) = pipeline("", ".*");

        assert_eq!(
            pipeline.on_request(&api_request()),
            MirrorOutcome::Skipped(SkipReason::Disabled)
        );
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_mirrored_copy_is_not_remirrored() {
        let (pipeline, sink) = pipeline("https://mirror.test", ".*");
        pipeline.on_request(&api_request());

        let copy = sink.0.lock()[0].clone();
        let url = copy.url();
        let replayed = ObservedRequest::from_url(copy.method.clone(), &url)
            .unwrap()
            .with_replay(ReplayOrigin::Request);
        let as_seen_again = ObservedRequest::from_url(copy.method, &url).unwrap();

        assert_eq!(
            pipeline.on_request(&replayed),
            MirrorOutcome::Skipped(SkipReason::Replay)
        );
        assert_eq!(
            pipeline.on_request(&as_seen_again),
            MirrorOutcome::Skipped(SkipReason::AlreadyMirrorBound)
        );
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn test_uses_options_current_at_call_time() {
        let (pipeline, sink) = pipeline("", ".*");
        assert!(matches!(
            pipeline.on_request(&api_request()),
            MirrorOutcome::Skipped(_)
        ));

        pipeline.options().set_mirror_base("http://mirror.test:9000/shadow");
        assert_eq!(pipeline.on_request(&api_request()), MirrorOutcome::Dispatched);
        assert_eq!(
            sink.0.lock()[0].url(),
            "http://mirror.test:9000/shadow/api/v1/items?id=5"
        );
    }

    #[test]
    fn test_dispatch_failure_is_absorbed() {
        let pipeline = MirrorPipeline::new(
            MirrorOptions::new("https://mirror.test", ".*"),
            Arc::new(Failing),
        );

        assert_eq!(pipeline.on_request(&api_request()), MirrorOutcome::Dispatched);
    }

    #[test]
    fn test_internal_fault_is_contained() {
        let pipeline = MirrorPipeline::new(
            MirrorOptions::new("https://mirror.test", ".*"),
            Arc::new(Panicking),
        );
        let req = api_request();
        let before = req.clone();

        assert_eq!(
            pipeline.on_request(&req),
            MirrorOutcome::Faulted("replay mechanism exploded".to_string())
        );
        assert_eq!(req, before);
    }

    #[test]
    fn test_concurrent_requests_with_config_writes() {
        let (pipeline, sink) = pipeline("https://mirror.test", ".*");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let pipeline = &pipeline;
                scope.spawn(move || {
                    for _ in 0..100 {
                        let outcome = pipeline.on_request(&api_request());
                        assert!(!matches!(outcome, MirrorOutcome::Faulted(_)));
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..50 {
                    let base = if i % 2 == 0 { "" } else { "https://mirror.test" };
                    pipeline.options().set_mirror_base(base);
                }
            });
        });

        assert!(sink.0.lock().len() <= 400);
    }
}
