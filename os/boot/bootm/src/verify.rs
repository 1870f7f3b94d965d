//! # Payload Verification
//!
//! Content hashes and the policy deciding what a mismatch means.

use crate::descriptor::VerifyPolicy;
use crate::error::BootError;
use log::{debug, warn};
use sha2::{Digest, Sha256, Sha512};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Compares the digest of `data` with the leading bytes of `expected`.
    ///
    /// # Errors
    /// A description of the mismatch.
    pub fn check(self, data: &[u8], expected: &[u8]) -> Result<(), String> {
        let Some(expected) = expected.get(..self.digest_len()) else {
            return Err(format!("stored {self:?} digest is truncated"));
        };
        let actual = self.digest(data);
        if actual == expected {
            Ok(())
        } else {
            Err(format!(
                "{self:?} mismatch: expected {}, got {}",
                hex::encode(expected),
                hex::encode(&actual)
            ))
        }
    }
}

/// Runs `check` as `policy` demands.
///
/// Under [`VerifyPolicy::Enforce`] a failed check aborts unless `force` is
/// set; [`VerifyPolicy::Warn`] only logs; [`VerifyPolicy::Skip`] never runs
/// the check.
///
/// # Errors
/// [`BootError::VerificationFailed`] for an enforced, unforced mismatch.
pub fn apply(
    policy: VerifyPolicy,
    force: bool,
    component: &str,
    check: impl FnOnce() -> Result<(), String>,
) -> Result<(), BootError> {
    if policy == VerifyPolicy::Skip {
        debug!("{component}: verification skipped");
        return Ok(());
    }

    match check() {
        Ok(()) => {
            debug!("{component}: verified");
            Ok(())
        }
        Err(reason) if policy == VerifyPolicy::Warn => {
            warn!("{component}: {reason}, continuing");
            Ok(())
        }
        Err(reason) if force => {
            warn!("{component}: {reason}, accepted because forced");
            Ok(())
        }
        Err(reason) => Err(BootError::VerificationFailed {
            component: component.to_owned(),
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_digest() {
        let digest = HashAlgorithm::Sha256.digest(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn check_uses_digest_prefix() {
        let mut stored = HashAlgorithm::Sha256.digest(b"payload");
        stored.resize(64, 0xFF);
        assert!(HashAlgorithm::Sha256.check(b"payload", &stored).is_ok());
        assert!(HashAlgorithm::Sha256.check(b"tampered", &stored).is_err());
        assert!(HashAlgorithm::Sha512.check(b"payload", &stored[..32]).is_err());
    }

    #[test]
    fn policies() {
        let fail = || Err::<(), _>("mismatch".to_owned());

        assert!(matches!(
            apply(VerifyPolicy::Enforce, false, "slot 0", fail),
            Err(BootError::VerificationFailed { .. })
        ));
        assert!(apply(VerifyPolicy::Enforce, true, "slot 0", fail).is_ok());
        assert!(apply(VerifyPolicy::Warn, false, "slot 0", fail).is_ok());
        assert!(apply(VerifyPolicy::Skip, false, "slot 0", || unreachable!()).is_ok());
    }
}
