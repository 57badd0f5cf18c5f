//! MySQL authentication plugins.
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password / sha256_password
//!
//! Scramble (fast auth):
//! ```text
//! SHA256(password) XOR SHA256(SHA256(SHA256(password)) + seed)
//! ```
//!
//! Full auth sends the password in clear over a secure stream, or encrypted
//! with the server's RSA public key otherwise.

use mywire_core::Error;
use mywire_core::error::{ConnectionError, ConnectionErrorKind};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Bytes exchanged inside auth-more-data (0x01) packets.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Scramble matched the server cache; an OK follows
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Cache miss; client must send the full password
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Empty-password result of [`native_password_scramble`].
pub const NATIVE_EMPTY_SENTINEL: [u8; 1] = [0];
/// Empty-password result of [`sha256_scramble`].
pub const SHA256_EMPTY_SENTINEL: [u8; 1] = [1];

/// An authentication plugin named by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    Sha256Password,
    ClearPassword,
    Other(String),
}

impl AuthPlugin {
    /// An empty name (pre-plugin-auth servers) means native password.
    pub fn from_name(name: &str) -> Self {
        match name {
            "" | plugins::MYSQL_NATIVE_PASSWORD => AuthPlugin::NativePassword,
            plugins::CACHING_SHA2_PASSWORD => AuthPlugin::CachingSha2Password,
            plugins::SHA256_PASSWORD => AuthPlugin::Sha256Password,
            plugins::MYSQL_CLEAR_PASSWORD => AuthPlugin::ClearPassword,
            other => AuthPlugin::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
            AuthPlugin::Sha256Password => plugins::SHA256_PASSWORD,
            AuthPlugin::ClearPassword => plugins::MYSQL_CLEAR_PASSWORD,
            AuthPlugin::Other(name) => name,
        }
    }

    /// Auth data sent in the handshake response or an auth-switch reply.
    ///
    /// Empty passwords send an empty response for the hashing plugins.
    pub fn initial_response(&self, password: &str, seed: &[u8], secure: bool) -> Result<Vec<u8>, Error> {
        match self {
            AuthPlugin::NativePassword if password.is_empty() => Ok(Vec::new()),
            AuthPlugin::NativePassword => Ok(native_password_scramble(password, seed)),
            AuthPlugin::CachingSha2Password if password.is_empty() => Ok(Vec::new()),
            AuthPlugin::CachingSha2Password => Ok(sha256_scramble(password, seed)),
            AuthPlugin::Sha256Password if password.is_empty() => Ok(Vec::new()),
            AuthPlugin::Sha256Password if secure => Ok(nul_terminated(password)),
            // Ask for the public key; the PEM comes back as auth-more-data.
            AuthPlugin::Sha256Password => Ok(vec![0x01]),
            AuthPlugin::ClearPassword if secure => Ok(nul_terminated(password)),
            AuthPlugin::ClearPassword => Err(auth_error(
                "mysql_clear_password requires a secure stream",
                None,
            )),
            AuthPlugin::Other(name) => Err(auth_error(
                format!("unsupported authentication plugin '{name}'"),
                None,
            )),
        }
    }
}

/// XOR `source ++ 0x00` against `pattern` repeated to the same length.
///
/// The output is always one byte longer than `source`.
pub fn xor_with_pattern(source: &[u8], pattern: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len() + 1);
    out.extend_from_slice(source);
    out.push(0);
    if !pattern.is_empty() {
        for (byte, key) in out.iter_mut().zip(pattern.iter().cycle()) {
            *byte ^= key;
        }
    }
    out
}

/// The 20-byte scramble is sent with a trailing NUL by most servers.
fn scramble_seed(seed: &[u8]) -> &[u8] {
    match seed {
        [head @ .., 0] if head.len() == 20 => head,
        _ => seed,
    }
}

/// `mysql_native_password` scramble; [`NATIVE_EMPTY_SENTINEL`] for an empty password.
pub fn native_password_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return NATIVE_EMPTY_SENTINEL.to_vec();
    }
    let seed = scramble_seed(seed);
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// SHA-256 scramble; [`SHA256_EMPTY_SENTINEL`] for an empty password.
pub fn sha256_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return SHA256_EMPTY_SENTINEL.to_vec();
    }
    let seed = scramble_seed(seed);
    let hash = Sha256::digest(password.as_bytes());
    let hash_hash = Sha256::digest(hash);
    let mut hasher = Sha256::new();
    hasher.update(hash_hash);
    hasher.update(seed);
    let scramble = hasher.finalize();

    hash.iter().zip(scramble.iter()).map(|(a, b)| a ^ b).collect()
}

/// Encrypt `password ++ 0x00`, XORed with the seed, under the server's
/// RSA public key (OAEP with SHA-1).
pub fn rsa_encrypt_password(password: &str, seed: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>, Error> {
    let seed = scramble_seed(seed);
    if seed.is_empty() {
        return Err(auth_error("server sent an empty scramble", None));
    }
    let plain = xor_with_pattern(password.as_bytes(), seed);

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_error("public key is not valid UTF-8 PEM", Some(Box::new(e))))?;
    let key = RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .map_err(|e| auth_error("failed to parse RSA public key", Some(Box::new(e))))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| auth_error("RSA encryption failed", Some(Box::new(e))))
}

fn nul_terminated(password: &str) -> Vec<u8> {
    let mut out = password.as_bytes().to_vec();
    out.push(0);
    out
}

pub(crate) fn auth_error(
    message: impl Into<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: message.into(),
        server_code: None,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 20] = [
        0x3d, 0x4c, 0x5e, 0x2f, 0x1a, 0x0b, 0x7c, 0x8d, 0x9e, 0xaf, 0x10, 0x21, 0x32, 0x43, 0x54,
        0x65, 0x76, 0x87, 0x98, 0xa9,
    ];

    #[test]
    fn test_native_password_sentinel() {
        assert_eq!(native_password_scramble("", &SEED), vec![0]);
        assert_eq!(sha256_scramble("", &SEED), vec![1]);
    }

    #[test]
    fn test_native_password_known_vector() {
        // Scramble for "password" against the sequence 1..=20.
        let seed: Vec<u8> = (1..=20).collect();
        let got = native_password_scramble("password", &seed);
        let stage1 = Sha1::digest(b"password");
        let stage2 = Sha1::digest(stage1);
        let mut h = Sha1::new();
        h.update(&seed);
        h.update(stage2);
        let expected: Vec<u8> = stage1.iter().zip(h.finalize().iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(got, expected);
        assert_eq!(got.len(), 20);
    }

    #[test]
    fn test_scramble_is_deterministic() {
        assert_eq!(
            native_password_scramble("secret", &SEED),
            native_password_scramble("secret", &SEED)
        );
        assert_ne!(
            native_password_scramble("secret", &SEED),
            native_password_scramble("other", &SEED)
        );
        let mut other_seed = SEED;
        other_seed[0] ^= 1;
        assert_ne!(
            sha256_scramble("secret", &SEED),
            sha256_scramble("secret", &other_seed)
        );
        assert_eq!(sha256_scramble("secret", &SEED).len(), 32);
    }

    #[test]
    fn test_trailing_nul_seed_is_ignored() {
        let mut seed = SEED.to_vec();
        seed.push(0);
        assert_eq!(
            sha256_scramble("secret", &seed),
            sha256_scramble("secret", &SEED)
        );
        assert_eq!(
            native_password_scramble("secret", &seed),
            native_password_scramble("secret", &SEED)
        );
    }

    #[test]
    fn test_xor_with_pattern() {
        let out = xor_with_pattern(b"test", &[1, 2, 3]);
        assert_eq!(out.len(), 5);
        assert_eq!(out, vec![b't' ^ 1, b'e' ^ 2, b's' ^ 3, b't' ^ 1, 2]);
        assert_eq!(xor_with_pattern(b"", &[7]), vec![7]);
    }

    #[test]
    fn test_xor_single_byte_pattern_is_involution() {
        let source = b"hunter2".to_vec();
        let once = xor_with_pattern(&source, &[0x5a]);
        let twice = xor_with_pattern(&once[..once.len() - 1], &[0x5a]);
        assert_eq!(&twice[..source.len()], &source[..]);
    }

    #[test]
    fn test_initial_response() {
        let native = AuthPlugin::from_name("");
        assert_eq!(native, AuthPlugin::NativePassword);
        assert!(native.initial_response("", &SEED, false).unwrap().is_empty());
        assert_eq!(native.initial_response("pw", &SEED, false).unwrap().len(), 20);

        let clear = AuthPlugin::from_name("mysql_clear_password");
        assert!(clear.initial_response("pw", &SEED, false).is_err());
        assert_eq!(clear.initial_response("pw", &SEED, true).unwrap(), b"pw\0");

        let sha = AuthPlugin::from_name("sha256_password");
        assert_eq!(sha.initial_response("pw", &SEED, false).unwrap(), vec![0x01]);

        let other = AuthPlugin::from_name("auth_gssapi_client");
        assert_eq!(other.name(), "auth_gssapi_client");
        assert!(matches!(
            other.initial_response("pw", &SEED, false),
            Err(Error::Connection(_))
        ));
    }

    #[test]
    fn test_rsa_rejects_bad_pem() {
        assert!(rsa_encrypt_password("pw", &SEED, b"not a key").is_err());
    }
}
