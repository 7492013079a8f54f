//! Rotating authentication/encryption keys for session cookies.
//!
//! A [`KeyChain`] is an ordered list of [`KeyPair`]s. The first pair seals new cookie values;
//! every pair is tried, in declared order, when opening an incoming one. Rotating keys means
//! putting the new pair in front of the old ones and dropping old pairs once every cookie sealed
//! under them has expired.
//!
//! A sealed value has the form `{expires_at}.{body}.{tag}` where `expires_at` is a unix
//! timestamp, `body` is the (optionally AES-GCM encrypted) value and `tag` is an HMAC-SHA256
//! over the cookie name, expiry and body. Both `body` and `tag` are URL-safe base64 without
//! padding.

use std::{fmt, sync::Arc};

use aes_gcm::{
    Aes128Gcm, Aes256Gcm, AesGcm,
    aead::{
        Aead, AeadCore, KeyInit, Nonce, OsRng, consts::U12, generic_array::typenum::Unsigned,
    },
    aes::Aes192,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes192Gcm = AesGcm<Aes192, U12>;

#[derive(Clone)]
enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self> {
        let cipher = match key.len() {
            16 => <Aes128Gcm as KeyInit>::new_from_slice(key).map(Cipher::Aes128),
            24 => <Aes192Gcm as KeyInit>::new_from_slice(key).map(Cipher::Aes192),
            32 => <Aes256Gcm as KeyInit>::new_from_slice(key).map(Cipher::Aes256),
            len => {
                return Err(Error::InvalidKey(format!(
                    "encryption key must be 16, 24 or 32 bytes, got {len}"
                )));
            }
        };
        cipher.map_err(|err| Error::InvalidKey(err.to_string()))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            Cipher::Aes128(cipher) => encrypt_with(cipher, plaintext),
            Cipher::Aes192(cipher) => encrypt_with(cipher, plaintext),
            Cipher::Aes256(cipher) => encrypt_with(cipher, plaintext),
        }
    }

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        match self {
            Cipher::Aes128(cipher) => decrypt_with(cipher, data),
            Cipher::Aes192(cipher) => decrypt_with(cipher, data),
            Cipher::Aes256(cipher) => decrypt_with(cipher, data),
        }
    }
}

// Output is `nonce || ciphertext`.
fn encrypt_with<C: Aead + AeadCore>(cipher: &C, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Encryption)?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_with<C: Aead + AeadCore>(cipher: &C, data: &[u8]) -> Option<Vec<u8>> {
    let nonce_len = C::NonceSize::USIZE;
    if data.len() < nonce_len {
        return None;
    }
    let (nonce, ciphertext) = data.split_at(nonce_len);
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .ok()
}

/// An authentication key plus an optional encryption key.
///
/// The authentication key should be 32 or 64 bytes. The encryption key, when present, must be
/// 16, 24 or 32 bytes and selects AES-128, AES-192 or AES-256 (GCM).
#[derive(Clone)]
pub struct KeyPair {
    mac: HmacSha256,
    cipher: Option<Cipher>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn new(authentication: &[u8], encryption: Option<&[u8]>) -> Result<Self> {
        if authentication.is_empty() {
            return Err(Error::InvalidKey(
                "authentication key must not be empty".into(),
            ));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(authentication)
            .map_err(|err| Error::InvalidKey(err.to_string()))?;

        Ok(Self {
            mac,
            cipher: encryption.map(Cipher::new).transpose()?,
        })
    }

    /// Generate a random pair: a 64-byte authentication key and, if `encrypted`, a 32-byte
    /// AES-256 key.
    pub fn generate(encrypted: bool) -> Self {
        let key = <HmacSha256 as KeyInit>::generate_key(&mut OsRng);
        let mac = <HmacSha256 as KeyInit>::new(&key);
        let cipher = encrypted
            .then(|| Cipher::Aes256(Aes256Gcm::new(&Aes256Gcm::generate_key(&mut OsRng))));

        Self { mac, cipher }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn mac(&self, name: &str, expires_at: &str, body: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(expires_at.as_bytes());
        mac.update(b"|");
        mac.update(body.as_bytes());
        mac
    }
}

/// An ordered, immutable list of key pairs.
#[derive(Debug, Clone)]
pub struct KeyChain {
    pairs: Arc<[KeyPair]>,
}

impl From<KeyPair> for KeyChain {
    fn from(pair: KeyPair) -> Self {
        Self {
            pairs: Arc::from([pair]),
        }
    }
}

impl KeyChain {
    /// Build a chain from pairs ordered newest first.
    pub fn new(pairs: impl IntoIterator<Item = KeyPair>) -> Result<Self> {
        let pairs: Arc<[KeyPair]> = pairs.into_iter().collect();
        if pairs.is_empty() {
            return Err(Error::InvalidKey("at least one key pair is required".into()));
        }
        Ok(Self { pairs })
    }

    /// Build a chain from a flat list of alternating authentication and encryption keys.
    ///
    /// The encryption key of the last pair may be omitted; an empty encryption key means the
    /// pair does not encrypt.
    pub fn from_pairs(keys: &[&[u8]]) -> Result<Self> {
        let pairs = keys
            .chunks(2)
            .map(|chunk| {
                let encryption = chunk.get(1).copied().filter(|key| !key.is_empty());
                KeyPair::new(chunk[0], encryption)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(pairs)
    }

    /// Sign, and encrypt if the first pair has an encryption key, `value` for the cookie `name`.
    /// The sealed value stops opening once `max_age` has elapsed.
    pub fn seal(&self, name: &str, value: &str, max_age: Duration) -> Result<String> {
        let pair = &self.pairs[0];
        let expires_at = (OffsetDateTime::now_utc() + max_age)
            .unix_timestamp()
            .to_string();

        let body = match &pair.cipher {
            Some(cipher) => cipher.encrypt(value.as_bytes())?,
            None => value.as_bytes().to_vec(),
        };
        let body = URL_SAFE_NO_PAD.encode(body);
        let tag =
            URL_SAFE_NO_PAD.encode(pair.mac(name, &expires_at, &body).finalize().into_bytes());

        Ok(format!("{expires_at}.{body}.{tag}"))
    }

    /// Verify, and decrypt if needed, a value produced by [`KeyChain::seal`].
    pub fn open(&self, name: &str, sealed: &str) -> Result<String> {
        let mut parts = sealed.splitn(3, '.');
        let (Some(expires_at), Some(body), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidSignature);
        };
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| Error::InvalidSignature)?;

        let pair = self
            .pairs
            .iter()
            .find(|pair| pair.mac(name, expires_at, body).verify_slice(&tag).is_ok())
            .ok_or(Error::InvalidSignature)?;

        let expires_at: i64 = expires_at.parse().map_err(|_| Error::InvalidSignature)?;
        if expires_at < OffsetDateTime::now_utc().unix_timestamp() {
            return Err(Error::Expired);
        }

        let body = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| Error::InvalidSignature)?;
        let plaintext = match &pair.cipher {
            Some(cipher) => cipher.decrypt(&body).ok_or(Error::InvalidSignature)?,
            None => body,
        };

        String::from_utf8(plaintext).map_err(|_| Error::InvalidSignature)
    }
}
