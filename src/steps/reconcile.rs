//! Create-or-update reconciliation against the image store.
//!
//! [`TagReconciler::apply`] drives an image stream tag toward a desired
//! state: create it, and if it already exists copy the stored
//! `resourceVersion` onto the desired object and update, retrying on
//! conflict under a bounded [`RetryPolicy`]. Delays go through a [`Sleeper`]
//! so tests can count them instead of waiting.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::api::{CancellationToken, RunContext};
use crate::config::RetryConfig;
use crate::error::{Operation, Result, TagflowError};
use crate::store::{ImageStore, ImageStreamTag};

/// Blocks the calling step between retry attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested delays without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub steps: u32,
    /// Delay after the first failed attempt.
    pub initial: Duration,
    /// Growth factor applied per attempt.
    pub factor: f64,
    /// Upper bound on any single delay.
    pub cap: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            steps: config.steps.max(1),
            initial: Duration::from_millis(config.initial_delay_ms),
            factor: config.factor,
            cap: config.max_delay_ms.map(Duration::from_millis),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed`-th failed attempt (1-based).
    pub fn delay(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        let limit = self.cap.unwrap_or(Duration::MAX);
        // Clamp in f64 first: large factors overflow Duration.
        if !secs.is_finite() || secs >= limit.as_secs_f64() {
            return limit;
        }
        Duration::try_from_secs_f64(secs).map_or(limit, |delay| delay.min(limit))
    }
}

/// Run `attempt` until it succeeds, fails with a non-conflict error, or the
/// policy's attempt bound is reached.
///
/// Exhausting the bound turns the last conflict into
/// [`TagflowError::RetryExhausted`].
pub fn retry_on_conflict<T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempts = 0;
    loop {
        cancel.check()?;
        attempts += 1;
        match attempt() {
            Err(err) if err.is_conflict() => {
                if attempts >= policy.steps {
                    return Err(exhausted(err, attempts));
                }
                let delay = policy.delay(attempts);
                debug!("Conflict on attempt {}, retrying in {:?}", attempts, delay);
                sleeper.sleep(delay);
            }
            other => return other,
        }
    }
}

fn exhausted(err: TagflowError, attempts: u32) -> TagflowError {
    match err {
        TagflowError::Store {
            operation,
            target,
            source,
        } => TagflowError::RetryExhausted {
            operation,
            target,
            attempts,
            last: source,
        },
        other => other,
    }
}

/// Store access plus the retry policy shared by all steps of a run.
pub struct TagReconciler {
    store: Arc<dyn ImageStore>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for TagReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagReconciler")
            .field("policy", &self.policy)
            .finish()
    }
}

impl TagReconciler {
    /// Reconciler with the default policy and real sleeping.
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn store(&self) -> &dyn ImageStore {
        self.store.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Digest behind `namespace/stream:tag`.
    pub fn resolve_image(&self, namespace: &str, name: &str) -> Result<String> {
        let target = format!("{}/{}", namespace, name);
        let ist = self
            .store
            .get_tag(namespace, name)
            .map_err(|e| TagflowError::store(Operation::ResolveSource, &target, e))?;
        if ist.image.name.is_empty() {
            return Err(TagflowError::store(
                Operation::ResolveSource,
                target,
                crate::store::StoreError::NotFound {
                    kind: "image".to_string(),
                    name: name.to_string(),
                },
            ));
        }
        Ok(ist.image.name)
    }

    /// Current tag for a completion check; `None` when it does not exist.
    pub fn fetch_existing(&self, namespace: &str, name: &str) -> Result<Option<ImageStreamTag>> {
        match self.store.get_tag(namespace, name) {
            Ok(ist) => Ok(Some(ist)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(TagflowError::store(
                Operation::FetchForCompletion,
                format!("{}/{}", namespace, name),
                e,
            )),
        }
    }

    /// Make the store hold `desired`, creating or updating as needed.
    pub fn apply(&self, desired: &ImageStreamTag, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let target = desired.display_name();

        match self.store.create_tag(desired) {
            Ok(_) => {
                info!("Created {}", target);
                return Ok(());
            }
            Err(e) if e.is_already_exists() => {
                debug!("{} already exists, updating", target);
            }
            Err(e) => return Err(TagflowError::store(Operation::Create, target, e)),
        }

        retry_on_conflict(&self.policy, self.sleeper.as_ref(), cancel, || {
            let existing = self
                .store
                .get_tag(&desired.metadata.namespace, &desired.metadata.name)
                .map_err(|e| TagflowError::store(Operation::Update, &target, e))?;
            // Only the concurrency token is carried over; the rest of the
            // stored object is replaced by the desired state.
            let mut update = desired.clone();
            update.metadata.resource_version = existing.metadata.resource_version;
            self.store
                .update_tag(&update)
                .map_err(|e| TagflowError::store(Operation::Update, &target, e))?;
            Ok(())
        })?;
        info!("Updated {}", target);
        Ok(())
    }
}

/// Whether `actual` has the tag reference `desired` asks for.
///
/// Only the step-owned `tag` section is compared; metadata such as the
/// resource version and creation time belongs to the store.
pub fn tag_matches(actual: &ImageStreamTag, desired: &ImageStreamTag) -> bool {
    actual.tag == desired.tag
}

/// Write `desired` to the run's diagnostic output as pretty JSON.
pub fn render(context: &RunContext, desired: &ImageStreamTag) -> Result<()> {
    let json = serde_json::to_string_pretty(desired).map_err(|e| TagflowError::Render {
        target: desired.display_name(),
        message: e.to_string(),
    })?;
    context
        .diagnostics()
        .emit(&json)
        .map_err(|e| TagflowError::Render {
            target: desired.display_name(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObjectMeta, StoreError, StoreOp, TagReference};

    fn desired(digest: &str) -> ImageStreamTag {
        ImageStreamTag {
            metadata: ObjectMeta::new("ns", "stable:latest"),
            tag: Some(TagReference::image_stream_image("ns", "pipeline", digest)),
            ..Default::default()
        }
    }

    fn reconciler(store: Arc<MemoryStore>, sleeper: Arc<RecordingSleeper>) -> TagReconciler {
        TagReconciler::new(store).with_sleeper(sleeper)
    }

    #[test]
    fn default_policy_matches_client_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.steps, 5);
        assert_eq!(policy.initial, Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(4), Duration::from_millis(10));
    }

    #[test]
    fn delay_grows_by_factor_and_respects_cap() {
        let policy = RetryPolicy {
            steps: 5,
            initial: Duration::from_millis(10),
            factor: 2.0,
            cap: Some(Duration::from_millis(30)),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(20));
        assert_eq!(policy.delay(3), Duration::from_millis(30));
        assert_eq!(policy.delay(4), Duration::from_millis(30));
    }

    #[test]
    fn huge_growth_is_clamped_to_the_cap() {
        let config = crate::config::parse_config(
            "retry: { steps: 10, initial_delay_ms: 10, factor: 1000, max_delay_ms: 100 }\n",
            std::path::Path::new("pipeline.yml"),
        )
        .unwrap();
        crate::config::validate(&config).unwrap();

        let policy = RetryPolicy::from(&config.retry);
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(100));
        assert_eq!(policy.delay(9), Duration::from_millis(100));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(100));
    }

    #[test]
    fn huge_growth_without_cap_saturates() {
        let policy = RetryPolicy {
            steps: 10,
            initial: Duration::from_millis(10),
            factor: 1000.0,
            cap: None,
        };
        assert_eq!(policy.delay(9), Duration::MAX);
    }

    #[test]
    fn apply_creates_missing_tag() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(store.clone(), Arc::new(RecordingSleeper::new()));

        r.apply(&desired("sha256:aaa"), &CancellationToken::new())
            .unwrap();

        let calls = store.calls();
        assert_eq!(calls.create_tag, 1);
        assert_eq!(calls.update_tag, 0);
        assert_eq!(
            store.get_tag("ns", "stable:latest").unwrap().image.name,
            "sha256:aaa"
        );
    }

    #[test]
    fn apply_updates_existing_tag_with_its_token() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(store.clone(), Arc::new(RecordingSleeper::new()));
        let cancel = CancellationToken::new();

        r.apply(&desired("sha256:aaa"), &cancel).unwrap();
        r.apply(&desired("sha256:bbb"), &cancel).unwrap();

        let calls = store.calls();
        assert_eq!(calls.create_tag, 2);
        assert_eq!(calls.update_tag, 1);
        assert_eq!(
            store.get_tag("ns", "stable:latest").unwrap().image.name,
            "sha256:bbb"
        );
    }

    #[test]
    fn conflicts_below_the_bound_are_retried() {
        let store = Arc::new(MemoryStore::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let r = reconciler(store.clone(), sleeper.clone());
        let cancel = CancellationToken::new();
        r.apply(&desired("sha256:aaa"), &cancel).unwrap();

        store.inject_conflicts(4);
        r.apply(&desired("sha256:bbb"), &cancel).unwrap();

        assert_eq!(store.calls().update_tag, 5);
        assert_eq!(sleeper.delays().len(), 4);
        assert_eq!(
            store.get_tag("ns", "stable:latest").unwrap().image.name,
            "sha256:bbb"
        );
    }

    #[test]
    fn conflicts_past_the_bound_exhaust_retries() {
        let store = Arc::new(MemoryStore::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let r = reconciler(store.clone(), sleeper.clone());
        let cancel = CancellationToken::new();
        r.apply(&desired("sha256:aaa"), &cancel).unwrap();

        store.inject_conflicts(5);
        let err = r.apply(&desired("sha256:bbb"), &cancel).unwrap_err();

        match err {
            TagflowError::RetryExhausted {
                operation,
                attempts,
                last,
                ..
            } => {
                assert_eq!(operation, Operation::Update);
                assert_eq!(attempts, 5);
                assert!(last.is_conflict());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.calls().update_tag, 5);
        assert_eq!(sleeper.delays().len(), 4);
    }

    #[test]
    fn create_failure_is_fatal_and_tagged() {
        let store = Arc::new(MemoryStore::new());
        store.fail(StoreOp::CreateTag, "forbidden");
        let r = reconciler(store.clone(), Arc::new(RecordingSleeper::new()));

        let err = r
            .apply(&desired("sha256:aaa"), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.operation(), Some(Operation::Create));
        assert_eq!(store.calls().update_tag, 0);
    }

    #[test]
    fn update_failure_other_than_conflict_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let r = reconciler(store.clone(), sleeper.clone());
        let cancel = CancellationToken::new();
        r.apply(&desired("sha256:aaa"), &cancel).unwrap();

        store.fail(StoreOp::UpdateTag, "quota exceeded");
        let err = r.apply(&desired("sha256:bbb"), &cancel).unwrap_err();
        assert_eq!(err.operation(), Some(Operation::Update));
        assert!(!matches!(err, TagflowError::RetryExhausted { .. }));
        assert_eq!(store.calls().update_tag, 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(store.clone(), Arc::new(RecordingSleeper::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = r.apply(&desired("sha256:aaa"), &cancel).unwrap_err();
        assert!(matches!(err, TagflowError::Cancelled));
        assert_eq!(store.calls().writes(), 0);
    }

    /// Fires the token the first time a retry waits.
    struct CancellingSleeper(CancellationToken);

    impl Sleeper for CancellingSleeper {
        fn sleep(&self, _duration: Duration) {
            self.0.cancel();
        }
    }

    #[test]
    fn cancellation_during_backoff_stops_retrying() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let r = TagReconciler::new(store.clone())
            .with_sleeper(Arc::new(CancellingSleeper(cancel.clone())));
        r.apply(&desired("sha256:aaa"), &cancel).unwrap();

        store.inject_conflicts(5);
        let err = r.apply(&desired("sha256:bbb"), &cancel).unwrap_err();

        assert!(matches!(err, TagflowError::Cancelled));
        assert_eq!(store.calls().update_tag, 1);
        assert!(store.calls().update_tag < r.policy().steps as usize);
        assert_eq!(
            store.get_tag("ns", "stable:latest").unwrap().image.name,
            "sha256:aaa"
        );
    }

    #[test]
    fn fetch_existing_maps_not_found_to_none() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(store.clone(), Arc::new(RecordingSleeper::new()));
        assert!(r.fetch_existing("ns", "stable:latest").unwrap().is_none());

        store.fail(StoreOp::GetTag, "timeout");
        let err = r.fetch_existing("ns", "stable:latest").unwrap_err();
        assert_eq!(err.operation(), Some(Operation::FetchForCompletion));
    }

    #[test]
    fn resolve_image_reports_missing_source() {
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(store.clone(), Arc::new(RecordingSleeper::new()));
        let err = r.resolve_image("ns", "pipeline:src").unwrap_err();
        assert_eq!(err.operation(), Some(Operation::ResolveSource));

        store.tag_image("ns", "pipeline", "src", "sha256:aaa");
        assert_eq!(r.resolve_image("ns", "pipeline:src").unwrap(), "sha256:aaa");
    }

    #[test]
    fn tag_matches_ignores_bookkeeping() {
        let mut actual = desired("sha256:aaa");
        actual.metadata.resource_version = "42".into();
        actual.metadata.creation_timestamp = Some(chrono::Utc::now());
        actual.image.name = "sha256:aaa".into();
        assert!(tag_matches(&actual, &desired("sha256:aaa")));
        assert!(!tag_matches(&actual, &desired("sha256:bbb")));
    }

    #[test]
    fn render_writes_json_to_diagnostics() {
        let sink = crate::api::DiagnosticSink::buffer();
        let ctx = RunContext::new("ns", "1").with_diagnostics(sink.clone());
        render(&ctx, &desired("dry-fake")).unwrap();
        let out = sink.contents();
        assert!(out.contains("\"name\": \"stable:latest\""));
        assert!(out.contains("pipeline@dry-fake"));
    }

    #[test]
    fn store_error_source_is_preserved() {
        let err = TagflowError::store(
            Operation::Create,
            "ns/a:b",
            StoreError::Io("boom".into()),
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
