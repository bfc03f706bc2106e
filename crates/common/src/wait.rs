use std::time::Duration;

/// Poll `connect` until it succeeds or `should_stop` returns true.
///
/// Used by a consumer process waiting for the producer to create shared memory.
/// Returns `None` when stopped before the resource appeared.
pub fn wait_for_resource<F, S, T, E>(
    mut connect: F,
    should_stop: S,
    poll_interval: Duration,
    resource_name: &str,
) -> Option<T>
where
    F: FnMut() -> Result<T, E>,
    S: Fn() -> bool,
    E: std::fmt::Display,
{
    let mut logged = false;
    loop {
        match connect() {
            Ok(resource) => {
                tracing::info!(resource = resource_name, "Resource connected");
                return Some(resource);
            }
            Err(e) => {
                if should_stop() {
                    tracing::info!(resource = resource_name, "Stopped while waiting for resource");
                    return None;
                }
                if !logged {
                    tracing::info!(resource = resource_name, error = %e, "Waiting for resource");
                    logged = true;
                } else {
                    tracing::debug!(resource = resource_name, error = %e, "Still waiting");
                }
                std::thread::sleep(poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_returns_resource_once_available() {
        let attempts = Cell::new(0);
        let result = wait_for_resource(
            || {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 { Err("missing") } else { Ok(42) }
            },
            || false,
            Duration::from_millis(1),
            "exchange",
        );
        assert_eq!(result, Some(42));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_stop_ends_the_wait() {
        let attempts = Cell::new(0);
        let result: Option<()> = wait_for_resource(
            || {
                attempts.set(attempts.get() + 1);
                Err("missing")
            },
            || attempts.get() >= 2,
            Duration::from_millis(1),
            "exchange",
        );
        assert!(result.is_none());
        assert_eq!(attempts.get(), 2);
    }
}
