//! RSA key material for local actors

use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::signature::SignatureError;

/// PEM-encoded RSA keypair (PKCS#8 private, SPKI public)
#[derive(Clone)]
pub struct Keypair {
    pub private_key_pem: String,
    pub public_key_pem: String,
}

/// Generate a new RSA keypair
///
/// Key generation is CPU bound; async callers should run it on a blocking
/// thread.
pub fn generate_keypair(bits: usize) -> Result<Keypair, SignatureError> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?
        .to_string();
    let public_key_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

    Ok(Keypair {
        private_key_pem,
        public_key_pem,
    })
}
