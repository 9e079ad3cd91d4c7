use std::io::{self, ErrorKind, Read};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Byte source that retries transient read failures before giving up.
///
/// Only `Interrupted`, `WouldBlock` and `TimedOut` are retried; any other
/// error, or a transient one that persists past `max_retries`, is returned.
pub struct RetryingReader<R> {
    inner: R,
    max_retries: u32,
    backoff: Duration,
    retries_used: u64,
}

impl<R: Read> RetryingReader<R> {
    pub fn new(inner: R, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
            retries_used: 0,
        }
    }

    /// Total retries spent over the reader's lifetime
    pub fn retries_used(&self) -> u64 {
        self.retries_used
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

impl<R: Read> Read for RetryingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut attempt = 0;
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if is_transient(e.kind()) && attempt < self.max_retries => {
                    attempt += 1;
                    self.retries_used += 1;
                    warn!(attempt, error = %e, "transient read failure, retrying");
                    thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails with the given kind a fixed number of times, then reads normally.
    struct Flaky {
        data: io::Cursor<Vec<u8>>,
        failures_left: u32,
        kind: ErrorKind,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(io::Error::new(self.kind, "flaky"));
            }
            self.data.read(buf)
        }
    }

    fn flaky(failures: u32, kind: ErrorKind) -> Flaky {
        Flaky {
            data: io::Cursor::new(b"date,aqi\n".to_vec()),
            failures_left: failures,
            kind,
        }
    }

    #[test]
    fn test_recovers_within_budget() {
        let mut reader = RetryingReader::new(flaky(2, ErrorKind::TimedOut), 3, Duration::ZERO);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "date,aqi\n");
        assert_eq!(reader.retries_used(), 2);
    }

    #[test]
    fn test_escalates_after_budget() {
        let mut reader = RetryingReader::new(flaky(5, ErrorKind::TimedOut), 3, Duration::ZERO);
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut reader =
            RetryingReader::new(flaky(1, ErrorKind::PermissionDenied), 3, Duration::ZERO);
        let mut buf = [0u8; 8];
        assert!(reader.read(&mut buf).is_err());
        assert_eq!(reader.retries_used(), 0);
    }
}
