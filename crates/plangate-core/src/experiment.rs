use crate::config::{ConfigError, ExperimentConfig};
use crate::types::Arm;

const BUCKETS: u64 = 10_000;
const DOMAIN: &[u8] = b"plangate.experiment.unlock_arm.v1";

/// Deterministic experiment arm assignment.
///
/// The arm is a pure function of `(subject_id, content_id)` and the configured
/// ratio, so retries and reconnects always land on the same arm without a
/// prior lookup.
#[derive(Debug, Clone)]
pub struct ExperimentAssigner {
    email_threshold: u64,
}

impl ExperimentAssigner {
    pub fn new(config: ExperimentConfig) -> Result<Self, ConfigError> {
        let ratio = config.email_gate_ratio;
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::InvalidRatio(ratio));
        }
        Ok(Self {
            email_threshold: (ratio * BUCKETS as f64).round() as u64,
        })
    }

    /// Anonymous callers (`subject_id == None`) share one arm per content item.
    pub fn assign(&self, subject_id: Option<&str>, content_id: &str) -> Arm {
        if bucket(subject_id, content_id) < self.email_threshold {
            Arm::EmailGate
        } else {
            Arm::PaymentGate
        }
    }
}

fn bucket(subject_id: Option<&str>, content_id: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);
    match subject_id {
        Some(subject) => {
            hasher.update(&[1]);
            hasher.update(&(subject.len() as u64).to_be_bytes());
            hasher.update(subject.as_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
    hasher.update(&(content_id.len() as u64).to_be_bytes());
    hasher.update(content_id.as_bytes());

    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(prefix) % BUCKETS
}
