//! Recovery code generation and verification helpers.
//!
//! Codes are shown to the user once and stored as Argon2id hashes keyed with a
//! server-side pepper. Each code can complete exactly one challenge.

use anyhow::{anyhow, Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice};

pub const RECOVERY_CODE_COUNT: usize = 8;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;
const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Hashes and checks recovery codes with a fixed pepper and Argon2 cost.
pub struct RecoveryHasher {
    pepper: SecretSlice<u8>,
    params: argon2::Params,
}

impl RecoveryHasher {
    #[must_use]
    pub fn new(pepper: SecretSlice<u8>) -> Self {
        Self {
            pepper,
            params: argon2::Params::default(),
        }
    }

    /// Override the Argon2 cost parameters.
    #[must_use]
    pub fn with_params(mut self, params: argon2::Params) -> Self {
        self.params = params;
        self
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            self.pepper.expose_secret(),
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        )
        .map_err(|_| anyhow!("failed to initialize Argon2id"))
    }

    /// Generate a batch of display-formatted codes and their hashes.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn generate(&self) -> Result<RecoveryCodeBatch> {
        let mut rng = OsRng;
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_code(&mut rng)?;
            code_hashes.push(self.hash(&code)?);
            codes.push(code);
        }
        Ok(RecoveryCodeBatch { codes, code_hashes })
    }

    /// Hash a code after normalizing it.
    ///
    /// # Errors
    /// Returns an error if the code is malformed or hashing fails.
    pub fn hash(&self, code: &str) -> Result<String> {
        let normalized = normalize_recovery_code(code)?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(normalized.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash recovery code"))?
            .to_string();
        Ok(hash)
    }

    /// Check a user-supplied code against a stored hash. Malformed input never matches.
    ///
    /// # Errors
    /// Returns an error if the stored hash cannot be parsed.
    pub fn verify(&self, code: &str, stored_hash: &str) -> Result<bool> {
        let Ok(normalized) = normalize_recovery_code(code) else {
            return Ok(false);
        };
        let parsed =
            PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid recovery code hash"))?;
        Ok(self
            .argon2()?
            .verify_password(normalized.as_bytes(), &parsed)
            .is_ok())
    }
}

/// A freshly generated batch. Plaintext codes leave the process exactly once.
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

/// Normalize a recovery code for verification.
///
/// # Errors
/// Returns an error for the wrong length or characters outside the alphabet.
pub fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow!("invalid recovery code characters"));
    }

    Ok(normalized)
}

/// Format a normalized recovery code as `XXXX-XXXX-XXXX`.
///
/// # Errors
/// Returns an error if the input is not a normalized code.
pub fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(RECOVERY_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % RECOVERY_CODE_ALPHABET.len();
        if let Some(&char_byte) = RECOVERY_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_recovery_code(&normalized)
}
