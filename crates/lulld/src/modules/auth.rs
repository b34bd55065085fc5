//! The `Auth` module: password hashing and verification.
//!
//! Hashes are PBKDF2-HMAC-SHA256 with a random 16 byte salt, encoded as
//! `pbkdf2-sha256$<rounds>$<salt-hex>$<hash-hex>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use lull_config::Settings;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::dispatch::DispatchError;
use crate::registry::{CallContext, MethodEntry, Module, ModuleError};

const SCHEME: &str = "pbkdf2-sha256";
const DEFAULT_ROUNDS: u32 = 100_000;
const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;

/// Password hashing module.
#[derive(Debug)]
pub struct AuthModule {
    rounds: AtomicU32,
}

impl Default for AuthModule {
    fn default() -> Self {
        Self::with_rounds(DEFAULT_ROUNDS)
    }
}

impl AuthModule {
    /// Creates the module with the default round count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the module with an explicit round count.
    #[must_use]
    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            rounds: AtomicU32::new(rounds.max(1)),
        }
    }

    /// Hashes `password` with a fresh salt.
    #[must_use]
    pub fn generate(&self, password: &str) -> String {
        let rounds = self.rounds.load(Ordering::Relaxed);
        let salt = rand::random::<[u8; SALT_BYTES]>();
        let hash = derive(password, &salt, rounds);
        format!("{SCHEME}${rounds}${}${}", hex::encode(salt), hex::encode(hash))
    }

    /// Checks `password` against an encoded hash. Malformed hashes never
    /// validate.
    #[must_use]
    pub fn validate(&self, password: &str, encoded: &str) -> bool {
        let Some((rounds, salt, expected)) = decode(encoded) else {
            return false;
        };
        let actual = derive(password, &salt, rounds);
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; HASH_BYTES] {
    let mut out = [0_u8; HASH_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

fn decode(encoded: &str) -> Option<(u32, Vec<u8>, Vec<u8>)> {
    let mut parts = encoded.split('$');
    let (scheme, rounds, salt, hash, rest) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?, parts.next());
    if scheme != SCHEME || rest.is_some() {
        return None;
    }
    let rounds = rounds.parse::<u32>().ok().filter(|rounds| *rounds > 0)?;
    let salt = hex::decode(salt).ok()?;
    let hash = hex::decode(hash).ok().filter(|hash| hash.len() == HASH_BYTES)?;
    Some((rounds, salt, hash))
}

impl Module for AuthModule {
    fn name(&self) -> &'static str {
        "Auth"
    }

    fn setup(&self, settings: &Settings) -> Result<(), ModuleError> {
        let rounds = settings.integer_or("auth", "rounds", i64::from(DEFAULT_ROUNDS))?;
        let rounds = u32::try_from(rounds)
            .ok()
            .filter(|rounds| *rounds > 0)
            .ok_or_else(|| format!("[auth] rounds must be a positive 32-bit integer, got {rounds}"))?;
        self.rounds.store(rounds, Ordering::Relaxed);
        Ok(())
    }

    fn methods(self: Arc<Self>) -> Vec<MethodEntry> {
        let generate = Arc::clone(&self);
        let validate = self;
        vec![
            MethodEntry::unary("GeneratePassword", move |_: &CallContext, password: String| {
                Ok::<_, DispatchError>(generate.generate(&password))
            }),
            MethodEntry::binary(
                "ValidatePassword",
                move |_: &CallContext, password: String, hash: String| {
                    Ok::<_, DispatchError>(validate.validate(&password, &hash))
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn auth() -> AuthModule {
        AuthModule::with_rounds(2)
    }

    #[rstest]
    fn generated_hashes_validate(auth: AuthModule) {
        let hash = auth.generate("hunter2");
        assert!(hash.starts_with("pbkdf2-sha256$2$"));
        assert!(auth.validate("hunter2", &hash));
        assert!(!auth.validate("hunter3", &hash));
    }

    #[rstest]
    fn salts_differ_between_hashes(auth: AuthModule) {
        assert_ne!(auth.generate("same"), auth.generate("same"));
    }

    #[rstest]
    fn validation_uses_the_encoded_round_count(auth: AuthModule) {
        let hash = AuthModule::with_rounds(3).generate("pw");
        assert!(auth.validate("pw", &hash));
    }

    #[rstest]
    #[case("")]
    #[case("plain")]
    #[case("md5$1$00$00")]
    #[case("pbkdf2-sha256$0$00$00")]
    #[case("pbkdf2-sha256$2$zz$00")]
    #[case("pbkdf2-sha256$2$00$00")]
    #[case("pbkdf2-sha256$2$00$0000000000000000000000000000000000000000000000000000000000000000$x")]
    fn malformed_hashes_never_validate(auth: AuthModule, #[case] hash: &str) {
        assert!(!auth.validate("pw", hash));
    }

    #[rstest]
    fn setup_reads_the_round_count(auth: AuthModule) {
        let mut settings = Settings::new();
        settings.set("auth", "rounds", 7_i64);
        auth.setup(&settings).expect("setup");
        assert!(auth.generate("pw").starts_with("pbkdf2-sha256$7$"));
    }

    #[rstest]
    #[case(0)]
    #[case(-4)]
    fn setup_rejects_non_positive_rounds(auth: AuthModule, #[case] rounds: i64) {
        let mut settings = Settings::new();
        settings.set("auth", "rounds", rounds);
        assert!(auth.setup(&settings).is_err());
    }
}
