use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How the delay grows between bootstrap retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * attempt`
    #[default]
    Linear,
    /// `base * 2^attempt`
    Exponential,
}

impl FromStr for Backoff {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Backoff::Linear),
            "exponential" | "exp" => Ok(Backoff::Exponential),
            other => Err(anyhow::anyhow!("unknown backoff `{other}`")),
        }
    }
}

/// Bounded retry schedule for the editor bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    /// Whether another retry may be scheduled after `retries` have already run.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_attempts
    }

    /// Delay before the 1-based retry `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        }
    }

    /// Every delay the policy can produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|a| self.delay_for(a)).collect()
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn millis_u64(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(super::millis_u64(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: Backoff) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff,
        }
    }

    #[test]
    fn linear_schedule_grows_by_base() {
        let delays: Vec<u128> = policy(Backoff::Linear)
            .schedule()
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000]);
    }

    #[test]
    fn exponential_schedule_doubles() {
        let delays: Vec<u128> = policy(Backoff::Exponential)
            .schedule()
            .iter()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000]);
    }

    #[test]
    fn stops_at_max_attempts() {
        let p = policy(Backoff::Linear);
        assert!(p.should_retry(0));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
        assert!(!p.should_retry(7));
    }

    #[test]
    fn huge_exponents_saturate() {
        let p = policy(Backoff::Exponential);
        assert_eq!(p.delay_for(64), Duration::from_millis(1000).saturating_mul(u32::MAX));
    }

    #[test]
    fn millis_saturate_instead_of_truncating() {
        assert_eq!(millis_u64(Duration::from_millis(1500)), 1500);
        assert_eq!(millis_u64(Duration::MAX), u64::MAX);
        let json = serde_json::to_value(RetryPolicy {
            base_delay: Duration::MAX,
            ..RetryPolicy::default()
        })
        .unwrap();
        assert_eq!(json["baseDelay"], u64::MAX);
    }

    #[test]
    fn parses_backoff_names() {
        assert_eq!("Linear".parse::<Backoff>().unwrap(), Backoff::Linear);
        assert_eq!("exp".parse::<Backoff>().unwrap(), Backoff::Exponential);
        assert!("fibonacci".parse::<Backoff>().is_err());
    }

    #[test]
    fn serializes_delay_as_millis() {
        let json = serde_json::to_value(policy(Backoff::Linear)).unwrap();
        assert_eq!(json["baseDelay"], 1000);
        assert_eq!(json["backoff"], "linear");
        assert_eq!(json["maxAttempts"], 3);
    }
}
