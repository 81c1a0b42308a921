use std::future::Future;

use tokio::task::JoinSet;

use crate::error::StoreError;

/// Run `f` over `items` with at most `limit` futures in flight,
/// returning results in input order. Used for mutation-blob fetches,
/// where the store call dominates and ordering must match the listing.
pub async fn bounded_map<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> Result<Vec<R>, StoreError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, StoreError>> + Send + 'static,
{
    let limit = limit.max(1);
    let total = items.len();
    let mut results: Vec<Option<R>> = Vec::with_capacity(total);
    results.resize_with(total, || None);

    let mut set: JoinSet<(usize, Result<R, StoreError>)> = JoinSet::new();
    let mut pending = items.into_iter().enumerate();
    let mut first_err: Option<StoreError> = None;

    loop {
        while first_err.is_none() && set.len() < limit {
            match pending.next() {
                Some((index, item)) => {
                    let fut = f(item);
                    set.spawn(async move { (index, fut.await) });
                }
                None => break,
            }
        }
        match set.join_next().await {
            Some(Ok((index, Ok(value)))) => results[index] = Some(value),
            Some(Ok((_, Err(err)))) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
            Some(Err(join_err)) => {
                if first_err.is_none() {
                    first_err = Some(StoreError::Other(join_err.to_string()));
                }
            }
            None => break,
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }
    // Every slot is filled once all tasks joined cleanly.
    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn preserves_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let results = bounded_map(items, 4, |n| async move {
            // Later items finish first.
            tokio::time::sleep(std::time::Duration::from_millis(20 - n)).await;
            Ok(n * 2)
        })
        .await
        .unwrap();
        assert_eq!(results, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn respects_the_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..32).collect();
        let (in_flight2, peak2) = (in_flight.clone(), peak.clone());
        bounded_map(items, 5, move |_| {
            let in_flight = in_flight2.clone();
            let peak = peak2.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn first_error_wins() {
        let items: Vec<u32> = (0..8).collect();
        let result = bounded_map(items, 2, |n| async move {
            if n == 3 {
                Err(StoreError::Other("boom".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert!(result.is_err());
    }
}
