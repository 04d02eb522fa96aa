//! Startup check for the concurrency primitives the pool relies on.

use std::{sync::OnceLock, thread};

use fast_async_common::{Error, Result};

/// Verifies that the host can spawn and join threads.
///
/// The probe runs once per process; later calls return the cached outcome. A failure
/// is reported as [`ErrorKind::UnsupportedEnvironment`](fast_async_common::ErrorKind)
/// and is fatal for the global pool.
pub fn check_environment() -> Result<()> {
    static CHECKED: OnceLock<Result<()>> = OnceLock::new();
    CHECKED.get_or_init(probe_threads).clone()
}

fn probe_threads() -> Result<()> {
    let probe = thread::Builder::new()
        .name("fast-async-probe".to_string())
        .spawn(|| ())
        .map_err(|e| Error::unsupported_environment(format!("cannot spawn threads: {e}")))?;
    probe
        .join()
        .map_err(|_| Error::unsupported_environment("probe thread did not complete"))?;
    log::debug!("thread support verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_check_environment_is_stable() {
        super::check_environment().unwrap();
        super::check_environment().unwrap();
    }
}
