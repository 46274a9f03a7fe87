//! Key material for the download credential: AES-256-GCM for the stored
//! blob and HMAC-SHA256 for download tickets.
//!
//! The key file holds 64 random bytes, the first half for sealing and the
//! second half for signing. It is created with mode 0600 on first start
//! and read back on every later start.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::info;

use crate::error::{SoftwareError, SoftwareResult};

const SEAL_KEY_LEN: usize = 32;
pub const KEY_FILE_LEN: usize = SEAL_KEY_LEN * 2;

pub struct CredentialCipher {
    seal: LessSafeKey,
    sign: hmac::Key,
    rng: SystemRandom,
}

impl CredentialCipher {
    pub fn load_or_create(path: &Path) -> SoftwareResult<Self> {
        let rng = SystemRandom::new();
        match fs::read(path) {
            Ok(material) => Self::from_material(&material, rng),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut material = [0u8; KEY_FILE_LEN];
                rng.fill(&mut material)
                    .map_err(|_| SoftwareError::Crypto("system random source failed".into()))?;
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                create_private(path)?.write_all(&material)?;
                info!(path = %path.display(), "software key file created");
                Self::from_material(&material, rng)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn from_material(material: &[u8], rng: SystemRandom) -> SoftwareResult<Self> {
        if material.len() != KEY_FILE_LEN {
            return Err(SoftwareError::Crypto(format!(
                "key file holds {} bytes, expected {KEY_FILE_LEN}",
                material.len()
            )));
        }
        let (seal, sign) = material.split_at(SEAL_KEY_LEN);
        let seal = UnboundKey::new(&AES_256_GCM, seal)
            .map_err(|_| SoftwareError::Crypto("invalid sealing key".into()))?;
        Ok(Self {
            seal: LessSafeKey::new(seal),
            sign: hmac::Key::new(hmac::HMAC_SHA256, sign),
            rng,
        })
    }

    /// `base64(nonce || ciphertext || tag)`.
    pub fn seal(&self, plaintext: &[u8]) -> SoftwareResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| SoftwareError::Crypto("system random source failed".into()))?;
        let mut in_out = plaintext.to_vec();
        self.seal
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| SoftwareError::Crypto("sealing failed".into()))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&in_out);
        Ok(STANDARD.encode(out))
    }

    pub fn open(&self, sealed: &str) -> SoftwareResult<Vec<u8>> {
        let mut raw = STANDARD
            .decode(sealed)
            .map_err(|e| SoftwareError::Crypto(format!("sealed blob is not base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(SoftwareError::Crypto("sealed blob too short".into()));
        }
        let (nonce, rest) = raw.split_at_mut(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| SoftwareError::Crypto("bad nonce".into()))?;
        let plain = self
            .seal
            .open_in_place(nonce, Aad::empty(), rest)
            .map_err(|_| SoftwareError::Crypto("sealed blob failed authentication".into()))?;
        Ok(plain.to_vec())
    }

    /// Hex HMAC-SHA256 of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        hex::encode(hmac::sign(&self.sign, data).as_ref())
    }

    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        match hex::decode(signature) {
            Ok(tag) => hmac::verify(&self.sign, data, &tag).is_ok(),
            Err(_) => false,
        }
    }
}

fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
