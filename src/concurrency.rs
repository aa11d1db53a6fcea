use crate::error::{Error, Result};

/// Attempts after which retries are logged at warn level.
const NOISY_RETRY_THRESHOLD: u64 = 10;

/// Run `f` until it completes without a write conflict.
///
/// Any other error is returned as-is. Retries are unbounded; the storage
/// engine is expected to make progress.
pub fn write_conflict_retry<T>(op_name: &str, ns: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt: u64 = 0;
    loop {
        match f() {
            Err(Error::WriteConflict) => {
                attempt += 1;
                log_write_conflict(op_name, ns, attempt);
            }
            other => return other,
        }
    }
}

/// Like [`write_conflict_retry`], for reads that accumulate into `acc`.
/// `acc` is cleared before every attempt so a partial read never leaks.
pub fn write_conflict_retry_into<T>(
    op_name: &str,
    ns: &str,
    acc: &mut Vec<T>,
    mut f: impl FnMut(&mut Vec<T>) -> Result<()>,
) -> Result<()> {
    write_conflict_retry(op_name, ns, || {
        acc.clear();
        f(acc)
    })
}

fn log_write_conflict(op_name: &str, ns: &str, attempt: u64) {
    if attempt < NOISY_RETRY_THRESHOLD {
        tracing::debug!(op = op_name, ns, attempt, "write conflict; retrying");
        return;
    }
    if attempt.is_power_of_two() {
        tracing::warn!(op = op_name, ns, attempt, "still retrying after write conflicts");
    }
}
