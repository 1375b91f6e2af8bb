//! Retry and reconciliation for non-idempotent external mutations.
//!
//! Creating a pull request may already have happened in an earlier,
//! partially failed run, and the network may fail between the remote
//! accepting a request and us seeing the answer. The policy here makes such
//! calls converge: a detected conflict ("already exists") is resolved by
//! locating and updating the existing object instead of retrying.
//!
//! The reactive conflict path is authoritative. The pre-check performed by
//! [`IdempotentPolicy::apply`] is only a fast path that skips the create call
//! when the object is visibly there already.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::config::RetrySettings;
use super::MutationError;

/// Why one attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Worth another try, unless it describes a conflict
    Retryable(String),
    /// Stop immediately
    Fatal(MutationError),
}

/// A non-idempotent external call and how to recognise a conflict.
pub struct RetryableMutation<'a> {
    /// Human-readable action name
    pub action: String,
    /// Total attempts, at least one
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    conflict_detector: Box<dyn Fn(&str) -> bool + Send + Sync + 'a>,
}

impl<'a> RetryableMutation<'a> {
    /// Three attempts, two seconds apart, never a conflict.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            conflict_detector: Box::new(|_| false),
        }
    }

    /// Set the attempt budget (clamped to at least one).
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay between attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the predicate recognising "already exists" failures.
    #[must_use]
    pub fn conflict_detector<F>(mut self, detector: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'a,
    {
        self.conflict_detector = Box::new(detector);
        self
    }

    /// Whether a failure message describes a conflict.
    pub fn is_conflict(&self, message: &str) -> bool {
        (self.conflict_detector)(message)
    }
}

/// How a retried mutation ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T> {
    /// An attempt succeeded.
    Completed { value: T, attempts: u32 },
    /// An attempt reported that the object already exists.
    Conflict { message: String, attempts: u32 },
}

/// Run `attempt` until it succeeds, reports a conflict, or the budget runs out.
///
/// The closure receives the 1-based attempt number. Fatal errors stop
/// immediately; retryable errors that match the conflict detector end the
/// loop with [`AttemptOutcome::Conflict`]; other retryable errors sleep
/// `retry_delay` and try again. Exhausting the budget yields
/// [`MutationError::Exhausted`] carrying the last error.
pub async fn retry_mutation<T, F, Fut>(
    mutation: &RetryableMutation<'_>,
    mut attempt: F,
) -> Result<AttemptOutcome<T>, MutationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let start = Instant::now();
    let mut last_error = String::new();

    for number in 1..=mutation.max_attempts {
        match attempt(number).await {
            Ok(value) => {
                tracing::debug!(
                    action = %mutation.action,
                    attempts = number,
                    elapsed = ?start.elapsed(),
                    "Mutation succeeded"
                );
                return Ok(AttemptOutcome::Completed { value, attempts: number });
            }
            Err(AttemptError::Fatal(err)) => {
                tracing::warn!(action = %mutation.action, error = %err, "Mutation failed fatally");
                return Err(err);
            }
            Err(AttemptError::Retryable(message)) => {
                if mutation.is_conflict(&message) {
                    tracing::info!(action = %mutation.action, "Mutation target already exists");
                    return Ok(AttemptOutcome::Conflict { message, attempts: number });
                }
                tracing::warn!(
                    action = %mutation.action,
                    attempt = number,
                    max_attempts = mutation.max_attempts,
                    error = %message,
                    "Mutation attempt failed"
                );
                last_error = message;
                if number < mutation.max_attempts {
                    tokio::time::sleep(mutation.retry_delay).await;
                }
            }
        }
    }

    Err(MutationError::Exhausted {
        action: mutation.action.clone(),
        attempts: mutation.max_attempts,
        last_error,
    })
}

/// A remote object whose creation can be reconciled with existing state.
#[async_trait]
pub trait Reconcilable: Send + Sync {
    /// The remote object.
    type Output: Send;

    /// Action name used in logs and errors.
    fn action(&self) -> String;

    /// Look for an existing object with the same identity.
    ///
    /// Errors mean "unknown" and are not fatal.
    async fn find_existing(&self) -> anyhow::Result<Option<Self::Output>>;

    /// Try to create the object once.
    async fn create(&self) -> Result<Self::Output, AttemptError>;

    /// Whether a failure message says the object already exists.
    fn is_conflict(&self, message: &str) -> bool;

    /// Bring an existing object in line with what `create` would have made.
    async fn reconcile(&self, existing: Self::Output) -> Result<Self::Output, MutationError>;

    /// Recover the existing object from a conflict message when lookup fails.
    fn existing_from_conflict(&self, _message: &str) -> Option<Self::Output> {
        None
    }
}

/// Result of an idempotent mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled<T> {
    /// The created or reconciled object
    pub value: T,
    /// Whether the object existed before this call
    pub already_exists: bool,
    /// Create attempts made (zero when the pre-check found the object)
    pub attempts: u32,
}

/// Applies retry plus existing-state reconciliation to a [`Reconcilable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotentPolicy {
    /// Total create attempts
    pub max_attempts: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for IdempotentPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, retry_delay: Duration::from_secs(2) }
    }
}

impl From<&RetrySettings> for IdempotentPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_millis(settings.delay_ms),
        }
    }
}

impl IdempotentPolicy {
    /// Create or reconcile the object described by `target`.
    pub async fn apply<M>(&self, target: &M) -> Result<Reconciled<M::Output>, MutationError>
    where
        M: Reconcilable,
    {
        let action = target.action();

        match target.find_existing().await {
            Ok(Some(existing)) => {
                tracing::info!(action = %action, "Found existing object before create");
                let value = target.reconcile(existing).await?;
                return Ok(Reconciled { value, already_exists: true, attempts: 0 });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(action = %action, error = %e, "Existence pre-check inconclusive");
            }
        }

        let mutation = RetryableMutation::new(action.clone())
            .max_attempts(self.max_attempts)
            .retry_delay(self.retry_delay)
            .conflict_detector(|message| target.is_conflict(message));

        match retry_mutation(&mutation, |_| target.create()).await? {
            AttemptOutcome::Completed { value, attempts } => {
                Ok(Reconciled { value, already_exists: false, attempts })
            }
            AttemptOutcome::Conflict { message, attempts } => {
                let existing = match target.find_existing().await {
                    Ok(Some(existing)) => Some(existing),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(action = %action, error = %e, "Lookup after conflict failed");
                        None
                    }
                };
                let existing = existing.or_else(|| target.existing_from_conflict(&message));

                match existing {
                    Some(existing) => {
                        let value = target.reconcile(existing).await?;
                        Ok(Reconciled { value, already_exists: true, attempts })
                    }
                    None => Err(MutationError::Exhausted {
                        action,
                        attempts,
                        last_error: format!(
                            "remote reported an existing object that could not be located: {message}"
                        ),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    fn quick(action: &str) -> RetryableMutation<'static> {
        RetryableMutation::new(action).max_attempts(3).retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let outcome = retry_mutation(&quick("create"), |_| async { Ok::<_, AttemptError>(7) })
            .await
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::Completed { value: 7, attempts: 1 });
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = retry_mutation(&quick("create"), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(AttemptError::Retryable("502 Bad Gateway".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, AttemptOutcome::Completed { value: "done", attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_surfaces_last_error() {
        let err = retry_mutation(&quick("create"), |n| async move {
            Err::<(), _>(AttemptError::Retryable(format!("failure {n}")))
        })
        .await
        .unwrap_err();

        assert_eq!(
            err,
            MutationError::Exhausted {
                action: "create".into(),
                attempts: 3,
                last_error: "failure 3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_conflict_stops_retrying() {
        let calls = AtomicU32::new(0);
        let mutation = quick("create").conflict_detector(|msg| msg.contains("already exists"));
        let outcome = retry_mutation(&mutation, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AttemptError::Retryable("object already exists".into())) }
        })
        .await
        .unwrap();

        assert!(matches!(outcome, AttemptOutcome::Conflict { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_mutation(&quick("create"), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AttemptError::Fatal(MutationError::PreconditionFailed("no commits".into()))) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, MutationError::PreconditionFailed("no commits".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_attempts_clamped() {
        assert_eq!(RetryableMutation::new("x").max_attempts(0).max_attempts, 1);
    }

    /// In-memory remote store keyed by name.
    struct Store {
        objects: Mutex<Vec<String>>,
        creates: AtomicU32,
        precheck_works: bool,
    }

    struct CreateObject<'a> {
        store: &'a Store,
        name: String,
    }

    #[async_trait]
    impl<'a> Reconcilable for CreateObject<'a> {
        type Output = String;

        fn action(&self) -> String {
            format!("create {}", self.name)
        }

        async fn find_existing(&self) -> anyhow::Result<Option<String>> {
            if !self.store.precheck_works {
                anyhow::bail!("lookup unavailable");
            }
            Ok(self.store.objects.lock().iter().find(|o| **o == self.name).cloned())
        }

        async fn create(&self) -> Result<String, AttemptError> {
            self.store.creates.fetch_add(1, Ordering::SeqCst);
            let mut objects = self.store.objects.lock();
            if objects.contains(&self.name) {
                return Err(AttemptError::Retryable(format!("{} already exists", self.name)));
            }
            objects.push(self.name.clone());
            Ok(self.name.clone())
        }

        fn is_conflict(&self, message: &str) -> bool {
            message.contains("already exists")
        }

        async fn reconcile(&self, existing: String) -> Result<String, MutationError> {
            Ok(existing)
        }

        fn existing_from_conflict(&self, message: &str) -> Option<String> {
            message.strip_suffix(" already exists").map(String::from)
        }
    }

    fn policy() -> IdempotentPolicy {
        IdempotentPolicy { max_attempts: 3, retry_delay: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn test_applying_twice_creates_one_object() {
        let store =
            Store { objects: Mutex::new(Vec::new()), creates: AtomicU32::new(0), precheck_works: true };
        let target = CreateObject { store: &store, name: "feature/x".into() };

        let first = policy().apply(&target).await.unwrap();
        let second = policy().apply(&target).await.unwrap();

        assert!(!first.already_exists);
        assert!(second.already_exists);
        assert_eq!(second.attempts, 0);
        assert_eq!(store.objects.lock().len(), 1);
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflict_path_when_precheck_unavailable() {
        let store = Store {
            objects: Mutex::new(vec!["feature/x".into()]),
            creates: AtomicU32::new(0),
            precheck_works: false,
        };
        let target = CreateObject { store: &store, name: "feature/x".into() };

        let outcome = policy().apply(&target).await.unwrap();
        assert!(outcome.already_exists);
        assert_eq!(outcome.value, "feature/x");
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(store.objects.lock().len(), 1);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = RetrySettings { max_attempts: 0, delay_ms: 250 };
        let policy = IdempotentPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.retry_delay, Duration::from_millis(250));
    }
}
