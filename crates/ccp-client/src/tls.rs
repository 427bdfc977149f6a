//! Client identity and server trust for the mutual-TLS session.
//!
//! Certificates and plain keys are parsed with `rustls-pki-types`; keys
//! labelled `ENCRYPTED PRIVATE KEY` are decrypted with `pkcs8` before being
//! handed to reqwest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ccp_core::config::{ClientConfig, ConfigError, VerifyPolicy};
use ccp_core::SecretString;
use pkcs8::EncryptedPrivateKeyInfo;
use pkcs8::der::pem::{self, LineEnding};
use reqwest::{Certificate, ClientBuilder, Identity};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, warn};
use zeroize::Zeroizing;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Where server certificates are anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustAnchors {
    /// Platform trust store.
    System { verify_hostname: bool },
    /// Only the certificates loaded from `source`.
    Custom { source: PathBuf, certificates: usize },
}

/// Resolved TLS material, built once per session.
#[derive(Clone)]
pub struct TlsBundle {
    timeout: Duration,
    identity: Identity,
    trust: TrustAnchors,
    roots: Vec<Certificate>,
}

impl std::fmt::Debug for TlsBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsBundle")
            .field("timeout", &self.timeout)
            .field("trust", &self.trust)
            .finish_non_exhaustive()
    }
}

impl TlsBundle {
    /// Validate `config` and load its certificate material.
    ///
    /// Checks run in order: mandatory fields, cert and key presence on disk,
    /// verify policy, then identity parsing.
    pub fn build(config: &ClientConfig) -> Result<Self, ConfigError> {
        let required = config.required()?;
        ensure_exists("cert", required.cert)?;
        if let Some(key) = &config.key {
            ensure_exists("key", key)?;
        }

        let (trust, roots) = resolve_trust(&config.effective_verify())?;
        let identity = load_identity(
            required.cert,
            config.key.as_deref(),
            config.passphrase.as_ref(),
        )?;

        debug!(
            "TLS material loaded for {} (trust: {trust:?})",
            required.host
        );
        Ok(Self {
            timeout: config.timeout,
            identity,
            trust,
            roots,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn trust(&self) -> &TrustAnchors {
        &self.trust
    }

    /// Install identity, trust policy and timeout on a client builder.
    pub fn apply(&self, builder: ClientBuilder) -> ClientBuilder {
        let mut builder = builder
            .use_rustls_tls()
            .timeout(self.timeout)
            .identity(self.identity.clone());

        match &self.trust {
            TrustAnchors::System { verify_hostname } => {
                builder = builder.danger_accept_invalid_hostnames(!verify_hostname);
            }
            TrustAnchors::Custom { .. } => {
                builder = builder.tls_built_in_root_certs(false);
                for root in &self.roots {
                    builder = builder.add_root_certificate(root.clone());
                }
            }
        }
        builder
    }
}

fn ensure_exists(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::FileNotFound {
            field,
            path: path.to_path_buf(),
        })
    }
}

fn tls_error(context: &str, path: &Path, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::Tls(format!("{context} {}: {err}", path.display()))
}

// ---------------------------------------------------------------------------
// Trust
// ---------------------------------------------------------------------------

fn resolve_trust(policy: &VerifyPolicy) -> Result<(TrustAnchors, Vec<Certificate>), ConfigError> {
    let path = match policy {
        VerifyPolicy::Disabled => {
            return Ok((TrustAnchors::System { verify_hostname: false }, Vec::new()));
        }
        VerifyPolicy::SystemTrust => {
            return Ok((TrustAnchors::System { verify_hostname: true }, Vec::new()));
        }
        VerifyPolicy::CaPath(path) => path,
    };

    ensure_exists("verify", path)?;
    let roots = if path.is_dir() {
        ca_directory(path)?
    } else {
        let pem = std::fs::read(path).map_err(|e| tls_error("cannot read CA file", path, e))?;
        let roots = parse_certificates(&pem).map_err(|e| tls_error("invalid CA file", path, e))?;
        if roots.is_empty() {
            return Err(tls_error("no certificates in CA file", path, "empty bundle"));
        }
        roots
    };

    let trust = TrustAnchors::Custom {
        source: path.clone(),
        certificates: roots.len(),
    };
    Ok((trust, roots))
}

/// Every certificate in every regular file directly under `dir`. Files that
/// are unreadable or hold no certificate are skipped.
fn ca_directory(dir: &Path) -> Result<Vec<Certificate>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| tls_error("cannot list CA directory", dir, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut roots = Vec::new();
    for file in &files {
        let parsed = std::fs::read(file)
            .map_err(|e| e.to_string())
            .and_then(|pem| parse_certificates(&pem));
        match parsed {
            Ok(certs) if !certs.is_empty() => roots.extend(certs),
            Ok(_) => debug!("no certificates in {}, skipping", file.display()),
            Err(e) => warn!("skipping CA file {}: {e}", file.display()),
        }
    }

    if roots.is_empty() {
        return Err(tls_error(
            "no CA certificates found under",
            dir,
            "directory holds no PEM certificates",
        ));
    }
    Ok(roots)
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<Certificate>, String> {
    certificate_ders(pem)
        .map_err(|e| format!("malformed PEM: {e}"))?
        .iter()
        .map(|der| {
            Certificate::from_der(der.as_ref()).map_err(|e| format!("invalid certificate: {e}"))
        })
        .collect()
}

fn certificate_ders(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, rustls_pki_types::pem::Error> {
    CertificateDer::pem_slice_iter(pem).collect()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

fn load_identity(
    cert: &Path,
    key: Option<&Path>,
    passphrase: Option<&SecretString>,
) -> Result<Identity, ConfigError> {
    let cert_pem = Zeroizing::new(
        std::fs::read(cert).map_err(|e| tls_error("cannot read client certificate", cert, e))?,
    );
    let chain = certificate_ders(&cert_pem)
        .map_err(|e| tls_error("invalid client certificate", cert, e))?;
    if chain.is_empty() {
        return Err(tls_error(
            "no certificate in",
            cert,
            "expected a PEM CERTIFICATE block",
        ));
    }

    let (key_source, key_path) = match key {
        Some(path) => (
            Zeroizing::new(
                std::fs::read(path).map_err(|e| tls_error("cannot read private key", path, e))?,
            ),
            path,
        ),
        None => (cert_pem.clone(), cert),
    };
    let (label, key_der) = private_key(&key_source, key_path, passphrase)?;

    let mut bundle = Zeroizing::new(String::new());
    for der in &chain {
        let block = pem::encode_string("CERTIFICATE", LineEnding::LF, der.as_ref())
            .map_err(|e| tls_error("cannot encode certificate from", cert, e))?;
        bundle.push_str(&block);
    }
    let key_block = Zeroizing::new(
        pem::encode_string(label, LineEnding::LF, &key_der)
            .map_err(|e| tls_error("cannot encode private key from", key_path, e))?,
    );
    bundle.push_str(&key_block);

    Identity::from_pem(bundle.as_bytes())
        .map_err(|e| tls_error("cannot load client identity from", cert, e))
}

/// The private key in `source` as (PEM label, DER), decrypting it first when
/// it is an encrypted PKCS#8 document.
fn private_key(
    source: &[u8],
    origin: &Path,
    passphrase: Option<&SecretString>,
) -> Result<(&'static str, Zeroizing<Vec<u8>>), ConfigError> {
    if let Some(block) = find_pem_block(source, ENCRYPTED_KEY_LABEL) {
        let passphrase = passphrase.ok_or_else(|| {
            tls_error(
                "encrypted private key in",
                origin,
                "no passphrase configured",
            )
        })?;
        let (_, der) =
            pem::decode_vec(block).map_err(|e| tls_error("malformed encrypted key in", origin, e))?;
        let der = Zeroizing::new(der);
        let info = EncryptedPrivateKeyInfo::try_from(der.as_slice())
            .map_err(|e| tls_error("malformed encrypted key in", origin, e))?;
        let decrypted = info.decrypt(passphrase.expose()).map_err(|_| {
            tls_error(
                "cannot decrypt private key in",
                origin,
                "wrong passphrase or unsupported cipher",
            )
        })?;
        return Ok(("PRIVATE KEY", Zeroizing::new(decrypted.as_bytes().to_vec())));
    }

    let key = PrivateKeyDer::from_pem_slice(source)
        .map_err(|e| tls_error("no usable private key in", origin, e))?;
    let label = match &key {
        PrivateKeyDer::Pkcs1(_) => "RSA PRIVATE KEY",
        PrivateKeyDer::Sec1(_) => "EC PRIVATE KEY",
        PrivateKeyDer::Pkcs8(_) => "PRIVATE KEY",
        _ => {
            return Err(tls_error(
                "unsupported private key format in",
                origin,
                "expected PKCS#1, SEC1 or PKCS#8",
            ));
        }
    };
    Ok((label, Zeroizing::new(key.secret_der().to_vec())))
}

fn find_pem_block<'a>(source: &'a [u8], label: &str) -> Option<&'a [u8]> {
    let text = std::str::from_utf8(source).ok()?;
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = text.find(&begin)?;
    let stop = start + text[start..].find(&end)? + end.len();
    Some(&source[start..stop])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
