use std::thread;
use std::time::Duration;

/// Run `op` up to `max_attempts` times, sleeping between attempts.
///
/// The delay function receives the attempt number that just failed
/// (starting at 1), so callers can implement fixed delays or backoff.
/// The final error is returned unchanged once the attempts are
/// exhausted. A `max_attempts` of zero is treated as one attempt.
///
/// # Arguments
/// * `max_attempts` - Total number of attempts, including the first
/// * `delay` - Maps the failed attempt number to the sleep before the next try
/// * `op` - The fallible operation to run
///
/// # Returns
/// * `Result<T, E>` - The first success, or the last error
pub fn with_retries<T, E, F, D>(max_attempts: usize, delay: D, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    D: Fn(usize) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(_) => thread::sleep(delay(attempt)),
        }
    }
}
