//! Parallel operation runner.
//!
//! Fans out independent async operations and joins them. There is no
//! cancellation: a failing member does not stop its siblings, and the
//! runner only returns once every operation has settled.

use std::fmt::Display;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};

/// One operation handed to [`run_parallel`].
pub type Operation<'a, T, E> = BoxFuture<'a, Result<T, E>>;

/// Run every operation concurrently and collect their results.
///
/// Results are returned in input order regardless of completion order.
/// If any operation fails, the error of the first failing operation (by
/// input position) is returned, but only after all operations have
/// completed.
pub async fn run_parallel<'a, T, E>(
    operations: Vec<Operation<'a, T, E>>,
    label: &str,
) -> Result<Vec<T>, E>
where
    E: Display,
{
    let count = operations.len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let start = Instant::now();
    tracing::debug!(label, count, "Starting parallel operations");

    let settled = join_all(operations).await;

    let mut results = Vec::with_capacity(count);
    let mut first_error = None;
    for (index, outcome) in settled.into_iter().enumerate() {
        match outcome {
            Ok(value) => results.push(value),
            Err(e) => {
                tracing::warn!(label, index, error = %e, "Parallel operation failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    tracing::debug!(label, count, elapsed = ?start.elapsed(), "Parallel operations settled");

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let ops: Vec<Operation<'_, u32, String>> = vec![
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(1)
            }
            .boxed(),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(2)
            }
            .boxed(),
            async { Ok(3) }.boxed(),
        ];

        let results = run_parallel(ops, "ordering").await.unwrap();
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_waits_for_siblings() {
        let a_done = Arc::new(AtomicBool::new(false));
        let c_done = Arc::new(AtomicBool::new(false));

        let a = a_done.clone();
        let c = c_done.clone();
        let ops: Vec<Operation<'_, &str, String>> = vec![
            async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                a.store(true, Ordering::SeqCst);
                Ok("a")
            }
            .boxed(),
            async { Err("b exploded".to_string()) }.boxed(),
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                c.store(true, Ordering::SeqCst);
                Ok("c")
            }
            .boxed(),
        ];

        let err = run_parallel(ops, "settle").await.unwrap_err();
        assert_eq!(err, "b exploded");
        assert!(a_done.load(Ordering::SeqCst));
        assert!(c_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_first_error_by_position() {
        let ops: Vec<Operation<'_, (), String>> = vec![
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err("first".to_string())
            }
            .boxed(),
            async { Err("second".to_string()) }.boxed(),
        ];

        assert_eq!(run_parallel(ops, "errors").await.unwrap_err(), "first");
    }

    #[tokio::test]
    async fn test_runs_concurrently() {
        let ops: Vec<Operation<'_, (), String>> = (0..4)
            .map(|_| {
                async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                }
                .boxed()
            })
            .collect();

        let start = Instant::now();
        run_parallel(ops, "concurrency").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_empty() {
        let ops: Vec<Operation<'_, (), String>> = Vec::new();
        assert!(run_parallel(ops, "empty").await.unwrap().is_empty());
    }
}
