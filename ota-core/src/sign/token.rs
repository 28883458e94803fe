//! `header.payload.signature` tokens over the metadata payload. Each segment
//! is padded base64url; the signature is a DER `ECDSA-Sig-Value`.

use crate::error::{OtaError, Result};
use crate::sign::payload::{PayloadEntry, SignOptions, build_payload};
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, crypto};
use p256::ecdsa::Signature;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tracing::info;

pub const ALGORITHM: &str = "ES256";

/// Signs a `header.payload` signing input.
pub trait Signer {
    fn algorithm(&self) -> &'static str;
    /// Returns the raw signature bytes (DER for ES256).
    fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>>;
}

/// ECDSA P-256 / SHA-256 with a PKCS#8 PEM private key.
pub struct Es256Signer {
    key: EncodingKey,
}

impl Es256Signer {
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(pem).map_err(|e| OtaError::Sign(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let pem = fs::read(path).map_err(|e| OtaError::at(path, e))?;
        Self::from_pem(&pem)
    }
}

impl Signer for Es256Signer {
    fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>> {
        let jws = crypto::sign(signing_input, &self.key, Algorithm::ES256)
            .map_err(|e| OtaError::Sign(e.to_string()))?;
        let raw = URL_SAFE_NO_PAD
            .decode(jws)
            .map_err(|e| OtaError::Sign(e.to_string()))?;
        let sig = Signature::from_slice(&raw).map_err(|e| OtaError::Sign(e.to_string()))?;
        Ok(sig.to_der().as_bytes().to_vec())
    }
}

pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Accepts segments with or without trailing padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| OtaError::Sign(format!("bad base64 segment: {e}")))
}

fn decode_json(segment: &str) -> Result<Value> {
    let raw = decode_segment(segment)?;
    serde_json::from_slice(&raw).map_err(|e| OtaError::Sign(format!("bad JSON segment: {e}")))
}

/// DER or fixed-width `r || s`, re-encoded in the form `jsonwebtoken` checks.
fn jws_signature(segment: &str) -> Result<String> {
    let raw = decode_segment(segment)?;
    let sig = if raw.len() == 64 {
        Signature::from_slice(&raw)
    } else {
        Signature::from_der(&raw)
    }
    .map_err(|e| OtaError::Sign(format!("bad signature: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(sig.to_bytes()))
}

/// Sign `payload` and return the complete token.
pub fn assemble(payload: &[PayloadEntry], signer: &dyn Signer) -> Result<String> {
    let header = json!({ "alg": signer.algorithm() });
    let header = encode_segment(header.to_string().as_bytes());
    let body = serde_json::to_vec(payload).map_err(|e| OtaError::Sign(e.to_string()))?;
    let body = encode_segment(&body);
    let signing_input = format!("{header}.{body}");
    let signature = encode_segment(&signer.sign(signing_input.as_bytes())?);
    Ok(format!("{signing_input}.{signature}"))
}

/// Build the payload from the files named in `opts`, sign it and write the
/// token to `output`.
pub fn sign_metadata(opts: &SignOptions, signer: &dyn Signer, output: &Path) -> Result<String> {
    let payload = build_payload(opts)?;
    let token = assemble(&payload, signer)?;
    fs::write(output, &token).map_err(|e| OtaError::at(output, e))?;
    info!(entries = payload.len(), "token written to {}", output.display());
    Ok(token)
}

/// Check the token's ES256 signature against a PEM public key and return
/// the decoded payload.
pub fn verify_token(token: &str, public_key_pem: &[u8]) -> Result<Vec<PayloadEntry>> {
    let token = token.trim();
    let mut parts = token.split('.');
    let (Some(header), Some(body), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(OtaError::Sign("token must have three segments".into()));
    };

    let alg = decode_json(header)?;
    if alg.get("alg").and_then(Value::as_str) != Some(ALGORITHM) {
        return Err(OtaError::Sign(format!("unsupported header {alg}")));
    }

    let key = DecodingKey::from_ec_pem(public_key_pem).map_err(|e| OtaError::Sign(e.to_string()))?;
    let signing_input = format!("{header}.{body}");
    let ok = crypto::verify(
        &jws_signature(signature)?,
        signing_input.as_bytes(),
        &key,
        Algorithm::ES256,
    )
    .map_err(|e| OtaError::Sign(e.to_string()))?;
    if !ok {
        return Err(OtaError::Sign("signature does not match".into()));
    }

    let payload = decode_json(body)?;
    payload
        .as_array()
        .ok_or_else(|| OtaError::Sign("payload is not an array".into()))?
        .iter()
        .map(PayloadEntry::from_value)
        .collect()
}
