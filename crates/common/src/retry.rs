use std::time::Duration;

/// Retry a function with exponential backoff.
///
/// Delays are `base_delay_ms * 2^attempt`, capped at `max_delay_ms`.
/// Returns the last error once `max_retries` attempts have failed.
pub fn retry_with_backoff<F, T, E>(
    mut f: F,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let max_retries = max_retries.max(1);
    let mut attempt = 0;
    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < max_retries => {
                let delay_ms = base_delay_ms
                    .saturating_mul(2_u64.saturating_pow(attempt))
                    .min(max_delay_ms);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms,
                    error = %e,
                    "Operation failed, retrying"
                );
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    operation = operation_name,
                    attempts = max_retries,
                    error = %e,
                    "Operation failed, giving up"
                );
                return Err(e);
            }
        }
    }
}
