//! Expiration Encoding
//!
//! memcached takes expirations as a single u32:
//! - `0` means the item never expires
//! - values up to 30 days are relative seconds
//! - anything larger is an absolute unix timestamp

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Largest expiration the server treats as relative.
pub const MAX_RELATIVE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpirationError {
    #[error("absolute expiration is before the unix epoch")]
    BeforeEpoch,

    #[error("absolute expiration {0} does not fit in 32 bits")]
    OutOfRange(u64),
}

/// When a stored item should expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    #[default]
    Never,
    /// Relative to now. Zero and [`Expiration::INFINITE`] mean never.
    In(Duration),
    /// Absolute point in time.
    At(SystemTime),
}

impl Expiration {
    /// The "practically infinite" duration.
    pub const INFINITE: Duration = Duration::MAX;

    pub fn seconds(secs: u64) -> Self {
        Expiration::In(Duration::from_secs(secs))
    }

    /// Encodes against the current wall clock.
    pub fn encode(&self) -> Result<u32, ExpirationError> {
        self.encode_at(SystemTime::now())
    }

    pub fn encode_at(&self, now: SystemTime) -> Result<u32, ExpirationError> {
        match *self {
            Expiration::Never => Ok(0),
            Expiration::In(duration) if duration.is_zero() || duration >= Self::INFINITE => Ok(0),
            Expiration::In(duration) if duration <= MAX_RELATIVE => {
                // Round up so sub-second durations do not turn into "never".
                let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
                Ok(secs as u32)
            }
            Expiration::In(duration) => {
                // Too far out to be represented at all: treat as never.
                let absolute = match now.checked_add(duration) {
                    Some(at) => at,
                    None => return Ok(0),
                };
                match unix_seconds(absolute) {
                    Ok(secs) => Ok(secs),
                    Err(ExpirationError::OutOfRange(_)) => Ok(0),
                    Err(e) => Err(e),
                }
            }
            Expiration::At(at) => unix_seconds(at),
        }
    }
}

impl From<Duration> for Expiration {
    fn from(duration: Duration) -> Self {
        Expiration::In(duration)
    }
}

impl From<SystemTime> for Expiration {
    fn from(at: SystemTime) -> Self {
        Expiration::At(at)
    }
}

fn unix_seconds(at: SystemTime) -> Result<u32, ExpirationError> {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ExpirationError::BeforeEpoch)?
        .as_secs();
    let secs = u32::try_from(secs).map_err(|_| ExpirationError::OutOfRange(secs))?;
    // 0 would mean "never"; the epoch itself is long past.
    Ok(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_never_and_zero() {
        assert_eq!(Expiration::Never.encode_at(now()), Ok(0));
        assert_eq!(Expiration::In(Duration::ZERO).encode_at(now()), Ok(0));
        assert_eq!(Expiration::In(Expiration::INFINITE).encode_at(now()), Ok(0));
    }

    #[test]
    fn test_relative_seconds() {
        assert_eq!(Expiration::seconds(300).encode_at(now()), Ok(300));
        assert_eq!(
            Expiration::In(Duration::from_millis(1500)).encode_at(now()),
            Ok(2)
        );
        assert_eq!(
            Expiration::In(MAX_RELATIVE).encode_at(now()),
            Ok(MAX_RELATIVE.as_secs() as u32)
        );
    }

    #[test]
    fn test_long_duration_becomes_absolute() {
        let duration = MAX_RELATIVE + Duration::from_secs(1);
        assert_eq!(
            Expiration::In(duration).encode_at(now()),
            Ok(1_700_000_000 + duration.as_secs() as u32)
        );
    }

    #[test]
    fn test_unrepresentable_duration_never_expires() {
        let duration = Duration::from_secs(u64::from(u32::MAX) * 2);
        assert_eq!(Expiration::In(duration).encode_at(now()), Ok(0));
    }

    #[test]
    fn test_absolute() {
        let at = now() + Duration::from_secs(60);
        assert_eq!(Expiration::At(at).encode_at(now()), Ok(1_700_000_060));
        assert_eq!(Expiration::At(UNIX_EPOCH).encode_at(now()), Ok(1));
    }

    #[test]
    fn test_absolute_rejections() {
        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(
            Expiration::At(before).encode_at(now()),
            Err(ExpirationError::BeforeEpoch)
        );
        let far = UNIX_EPOCH + Duration::from_secs(u64::from(u32::MAX) + 1);
        assert!(matches!(
            Expiration::At(far).encode_at(now()),
            Err(ExpirationError::OutOfRange(_))
        ));
    }
}
