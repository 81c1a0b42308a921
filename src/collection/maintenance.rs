use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::{compact, vacuum, Inner};
use crate::config::{AutoPolicy, MaintenancePolicy};
use crate::error::Error;
use crate::hooks::MaintenanceOp;
use crate::store::list_all;

/// Post-write dispatch. Fire-and-forget: the write path never awaits
/// maintenance, and an abandoned task costs nothing — durability is
/// already carried by the mutation blob.
pub(crate) fn schedule_after_write(inner: Arc<Inner>) {
    if inner.options.auto_compact.is_disabled() && inner.options.auto_vacuum.is_disabled() {
        return;
    }
    tokio::spawn(async move {
        run_post_write(inner).await;
    });
}

async fn run_post_write(inner: Arc<Inner>) {
    let compacted = if should_fire(&inner, &inner.options.auto_compact).await {
        run_with_retries(&inner, MaintenanceOp::Compact).await
    } else {
        false
    };

    let fire_vacuum = match &inner.options.auto_vacuum {
        MaintenancePolicy::Disabled => false,
        MaintenancePolicy::Always => true,
        MaintenancePolicy::Auto(policy) => {
            let direct = roll(policy.probability) && threshold_met(&inner, policy).await;
            let chained = compacted && roll(policy.after_compact_probability);
            direct || chained
        }
    };
    if fire_vacuum {
        run_with_retries(&inner, MaintenanceOp::Vacuum).await;
    }
}

async fn should_fire(inner: &Inner, policy: &MaintenancePolicy) -> bool {
    match policy {
        MaintenancePolicy::Disabled => false,
        MaintenancePolicy::Always => true,
        MaintenancePolicy::Auto(policy) => {
            roll(policy.probability) && threshold_met(inner, policy).await
        }
    }
}

async fn threshold_met(inner: &Inner, policy: &AutoPolicy) -> bool {
    if policy.mutation_threshold == 0 {
        return true;
    }
    match list_all(inner.store.as_ref(), &inner.keys.mutation_prefix).await {
        Ok(keys) => keys.len() >= policy.mutation_threshold,
        Err(err) => {
            tracing::warn!(collection = %inner.name, error = %err, "mutation count for maintenance trigger failed");
            false
        }
    }
}

fn roll(probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    rand::thread_rng().gen::<f64>() < probability
}

fn retry_budget(policy: &MaintenancePolicy) -> (u32, u64) {
    match policy {
        MaintenancePolicy::Auto(p) => (p.max_retries, p.retry_delay_ms.max(1)),
        _ => (0, 1),
    }
}

/// Run one maintenance operation in the background, retrying transient
/// trouble with jittered backoff. Lock contention means another process
/// is already doing the work — skipped silently, not an error.
async fn run_with_retries(inner: &Arc<Inner>, op: MaintenanceOp) -> bool {
    let policy = match op {
        MaintenanceOp::Compact => &inner.options.auto_compact,
        MaintenanceOp::Vacuum => &inner.options.auto_vacuum,
    };
    let (max_retries, base_delay_ms) = retry_budget(policy);

    let mut attempt: u32 = 0;
    loop {
        let result = match op {
            MaintenanceOp::Compact => compact::run(inner).await.map(|_| ()),
            MaintenanceOp::Vacuum => vacuum::run(inner).await.map(|_| ()),
        };
        match result {
            Ok(()) => return true,
            Err(Error::LockActive) => {
                tracing::debug!(collection = %inner.name, %op, "maintenance skipped, lock is busy");
                return false;
            }
            Err(err) => {
                if attempt >= max_retries {
                    let attempts = attempt + 1;
                    tracing::warn!(
                        collection = %inner.name,
                        %op,
                        attempts,
                        error = %err,
                        "maintenance gave up"
                    );
                    inner.hooks.error(&inner.name, &err);
                    inner
                        .hooks
                        .maintenance_failure(&inner.name, op, &err, attempts);
                    return false;
                }
                let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                let delay = rand::thread_rng().gen_range(0..=exp);
                tracing::warn!(
                    collection = %inner.name,
                    %op,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %err,
                    "maintenance failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}
