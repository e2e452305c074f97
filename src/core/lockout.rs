//! PIN gate for administrative actions with a strike-based timed lockout.
//! State lives only in memory; a restart starts from zero strikes.

use hmac::{Hmac, Mac};
use rand::{thread_rng, Rng};
use sha2::Sha256;
use crate::common::config::LockoutConfig;
use crate::common::{AccessError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_PIN: &str = "1234";
pub const SALT_LEN: usize = 16;

/// Stored form of the administrator PIN.
#[derive(Clone)]
pub enum PinCredential {
    Plaintext(String),
    SaltedHmac { salt: Vec<u8>, digest: Vec<u8> },
}

impl PinCredential {
    /// Prefers the salted hash when configured, then a plaintext PIN, then
    /// the factory default.
    pub fn from_config(config: &LockoutConfig) -> Result<Self> {
        if let (Some(hash), Some(salt)) = (&config.pin_hash, &config.pin_salt) {
            return Ok(Self::SaltedHmac {
                salt: decode_hex("pin_salt", salt)?,
                digest: decode_hex("pin_hash", hash)?,
            });
        }
        match &config.pin {
            Some(pin) => Ok(Self::Plaintext(pin.clone())),
            None => {
                tracing::warn!("No PIN configured, falling back to the default PIN");
                Ok(Self::Plaintext(DEFAULT_PIN.to_string()))
            }
        }
    }

    pub fn verify(&self, pin: &str) -> bool {
        match self {
            Self::Plaintext(expected) => expected == pin,
            Self::SaltedHmac { salt, digest } => match HmacSha256::new_from_slice(salt) {
                Ok(mut mac) => {
                    mac.update(pin.as_bytes());
                    mac.verify_slice(digest).is_ok()
                }
                Err(_) => false,
            },
        }
    }
}

impl std::fmt::Debug for PinCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plaintext(_) => f.write_str("PinCredential::Plaintext(..)"),
            Self::SaltedHmac { .. } => f.write_str("PinCredential::SaltedHmac(..)"),
        }
    }
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    thread_rng().fill(&mut salt[..]);
    salt
}

/// HMAC-SHA256 of `pin` keyed by `salt`.
pub fn hash_pin(pin: &str, salt: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(salt)
        .map_err(|e| AccessError::Config(format!("Invalid PIN salt: {}", e)))?;
    mac.update(pin.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim())
        .map_err(|e| AccessError::Config(format!("Invalid hex in lockout.{}: {}", field, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutState {
    Idle { attempts: u32 },
    Locked { remaining_secs: u32 },
    Granted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Granted,
    /// Wrong PIN; `attempts` strikes so far.
    Denied { attempts: u32 },
    /// Wrong PIN that hit the strike limit.
    LockedOut { remaining_secs: u32 },
    /// Submitted while locked; not evaluated.
    Ignored { remaining_secs: u32 },
}

pub struct Lockout {
    credential: PinCredential,
    max_attempts: u32,
    duration_secs: u32,
    state: LockoutState,
}

impl Lockout {
    pub fn new(credential: PinCredential, max_attempts: u32, duration_secs: u32) -> Self {
        Self {
            credential,
            max_attempts,
            duration_secs,
            state: LockoutState::Idle { attempts: 0 },
        }
    }

    pub fn from_config(config: &LockoutConfig) -> Result<Self> {
        Ok(Self::new(
            PinCredential::from_config(config)?,
            config.max_attempts,
            config.duration_secs,
        ))
    }

    pub fn state(&self) -> LockoutState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, LockoutState::Locked { .. })
    }

    pub fn is_granted(&self) -> bool {
        self.state == LockoutState::Granted
    }

    /// Ends a granted session so the next action asks for the PIN again.
    /// Strikes and a running lockout are kept.
    pub fn relock(&mut self) {
        if self.state == LockoutState::Granted {
            self.state = LockoutState::Idle { attempts: 0 };
        }
    }

    pub fn submit(&mut self, pin: &str) -> SubmitOutcome {
        match self.state {
            LockoutState::Granted => SubmitOutcome::Granted,
            LockoutState::Locked { remaining_secs } => SubmitOutcome::Ignored { remaining_secs },
            LockoutState::Idle { attempts } => {
                if self.credential.verify(pin) {
                    tracing::info!("PIN accepted");
                    self.state = LockoutState::Granted;
                    return SubmitOutcome::Granted;
                }

                let attempts = attempts + 1;
                if attempts >= self.max_attempts {
                    tracing::warn!("Too many wrong PINs, locked for {}s", self.duration_secs);
                    self.state = LockoutState::Locked { remaining_secs: self.duration_secs };
                    SubmitOutcome::LockedOut { remaining_secs: self.duration_secs }
                } else {
                    tracing::warn!("Wrong PIN ({}/{})", attempts, self.max_attempts);
                    self.state = LockoutState::Idle { attempts };
                    SubmitOutcome::Denied { attempts }
                }
            }
        }
    }

    /// One-second countdown step. Returns the seconds left while still locked.
    pub fn tick(&mut self) -> Option<u32> {
        let LockoutState::Locked { remaining_secs } = self.state else {
            return None;
        };
        let remaining = remaining_secs.saturating_sub(1);
        if remaining == 0 {
            tracing::info!("Lockout expired");
            self.state = LockoutState::Idle { attempts: 0 };
            None
        } else {
            self.state = LockoutState::Locked { remaining_secs: remaining };
            Some(remaining)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockout() -> Lockout {
        Lockout::new(PinCredential::Plaintext("1234".into()), 2, 30)
    }

    #[test]
    fn two_wrong_pins_lock_then_countdown_unlocks() {
        let mut lock = lockout();
        assert_eq!(lock.submit("0000"), SubmitOutcome::Denied { attempts: 1 });
        assert_eq!(lock.submit("1111"), SubmitOutcome::LockedOut { remaining_secs: 30 });
        assert_eq!(lock.state(), LockoutState::Locked { remaining_secs: 30 });

        for expected in (1..30).rev() {
            assert_eq!(lock.tick(), Some(expected));
        }
        assert_eq!(lock.tick(), None);
        assert_eq!(lock.state(), LockoutState::Idle { attempts: 0 });
    }

    #[test]
    fn correct_pin_after_one_strike_grants() {
        let mut lock = lockout();
        lock.submit("9999");
        assert_eq!(lock.submit("1234"), SubmitOutcome::Granted);
        assert!(lock.is_granted());
        assert_eq!(lock.tick(), None);
    }

    #[test]
    fn submissions_while_locked_are_not_evaluated() {
        let mut lock = lockout();
        lock.submit("0");
        lock.submit("0");
        lock.tick();

        assert_eq!(lock.submit("1234"), SubmitOutcome::Ignored { remaining_secs: 29 });
        assert_eq!(lock.submit("0000"), SubmitOutcome::Ignored { remaining_secs: 29 });
        assert_eq!(lock.state(), LockoutState::Locked { remaining_secs: 29 });
    }

    #[test]
    fn relock_requires_the_pin_again() {
        let mut lock = lockout();
        assert_eq!(lock.submit("1234"), SubmitOutcome::Granted);
        lock.relock();
        assert_eq!(lock.state(), LockoutState::Idle { attempts: 0 });
        assert_eq!(lock.submit("0000"), SubmitOutcome::Denied { attempts: 1 });

        lock.submit("0000");
        lock.relock();
        assert!(lock.is_locked());
    }

    #[test]
    fn salted_credential_round_trips() {
        let salt = generate_salt();
        let digest = hash_pin("4321", &salt).unwrap();
        let config = LockoutConfig {
            pin_hash: Some(hex::encode(&digest)),
            pin_salt: Some(hex::encode(salt)),
            ..LockoutConfig::default()
        };

        let credential = PinCredential::from_config(&config).unwrap();
        assert!(credential.verify("4321"));
        assert!(!credential.verify("1234"));
    }

    #[test]
    fn default_pin_when_unconfigured() {
        let credential = PinCredential::from_config(&LockoutConfig::default()).unwrap();
        assert!(credential.verify(DEFAULT_PIN));
    }

    #[test]
    fn bad_hex_is_a_config_error() {
        for (hash, salt) in [("abc", "00ff"), ("zz", "00ff"), ("00ff", "0g")] {
            let config = LockoutConfig {
                pin_hash: Some(hash.into()),
                pin_salt: Some(salt.into()),
                ..LockoutConfig::default()
            };
            let err = PinCredential::from_config(&config).unwrap_err();
            assert!(matches!(err, AccessError::Config(_)), "{} / {}", hash, salt);
        }
        assert_eq!(decode_hex("pin_hash", " 0aff\n").unwrap(), vec![0x0a, 0xff]);
    }
}
