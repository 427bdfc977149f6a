//! On-disk certificate fixtures shared by the unit tests.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use ccp_core::{ClientConfig, VerifyPolicy};
use pkcs8::der::pem::LineEnding;
use pkcs8::{PrivateKeyInfo, pkcs5::pbes2};
use rcgen::{
    BasicConstraints, CertificateParams, CertifiedKey, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType, generate_simple_self_signed,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

pub(crate) const HOST: &str = "ccp.test";
pub(crate) const APPID: &str = "App1";

pub(crate) struct CertFixture {
    pub dir: TempDir,
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Certificate followed by its key in one file.
    pub combined: PathBuf,
    key_der: Vec<u8>,
}

impl CertFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(vec![HOST.to_string()]).unwrap();

        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();

        let cert_path = dir.path().join("client.crt");
        let key_path = dir.path().join("client.key");
        let combined = dir.path().join("client.pem");
        std::fs::write(&cert_path, &cert_pem).unwrap();
        std::fs::write(&key_path, &key_pem).unwrap();
        std::fs::write(&combined, format!("{cert_pem}{key_pem}")).unwrap();

        Self {
            dir,
            cert: cert_path,
            key: key_path,
            combined,
            key_der: key_pair.serialize_der(),
        }
    }

    /// Write the key as a PBES2-encrypted PKCS#8 PEM.
    pub fn encrypted_key(&self, passphrase: &str) -> PathBuf {
        let info = PrivateKeyInfo::try_from(self.key_der.as_slice()).unwrap();
        let params =
            pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, b"ccp-test-salt-00", &[7u8; 16])
                .unwrap();
        let encrypted = info.encrypt_with_params(params, passphrase).unwrap();
        let pem = encrypted
            .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
            .unwrap();

        let path = self.dir.path().join("client.enc.key");
        std::fs::write(&path, pem.as_bytes()).unwrap();
        path
    }

    /// Write a fresh self-signed certificate under `name` inside the
    /// fixture directory (or one of its subdirectories).
    pub fn ca_cert(&self, name: &str) -> PathBuf {
        let CertifiedKey { cert, .. } =
            generate_simple_self_signed(vec!["ca.ccp.test".to_string()]).unwrap();
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, cert.pem()).unwrap();
        path
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(HOST, APPID, self.cert.clone()).with_key(self.key.clone())
    }
}

/// A private CA that signs both a `127.0.0.1` server certificate and a
/// client certificate, with the CA written into its own trust directory.
pub(crate) struct ChainFixture {
    _dir: TempDir,
    pub trust_dir: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub client_der: CertificateDer<'static>,
    ca_der: CertificateDer<'static>,
    server_der: CertificateDer<'static>,
    server_key: Vec<u8>,
}

impl ChainFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "CCP Test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params = CertificateParams::default();
        server_params
            .distinguished_name
            .push(DnType::CommonName, "ccp.test");
        server_params.subject_alt_names = vec![SanType::IpAddress(IpAddr::from([127, 0, 0, 1]))];
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server = server_params.signed_by(&server_key, &ca, &ca_key).unwrap();

        let client_key = KeyPair::generate().unwrap();
        let mut client_params = CertificateParams::default();
        client_params.distinguished_name.push(DnType::CommonName, APPID);
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client = client_params.signed_by(&client_key, &ca, &ca_key).unwrap();

        // The trust directory also holds an unrelated certificate and a
        // file with no certificate in it.
        let trust_dir = dir.path().join("trust");
        std::fs::create_dir_all(&trust_dir).unwrap();
        std::fs::write(trust_dir.join("ccp-ca.pem"), ca.pem()).unwrap();
        let CertifiedKey { cert: other, .. } =
            generate_simple_self_signed(vec!["other.ccp.test".to_string()]).unwrap();
        std::fs::write(trust_dir.join("other.pem"), other.pem()).unwrap();
        std::fs::write(trust_dir.join("README"), "trusted issuers\n").unwrap();

        let cert = dir.path().join("client.crt");
        let key = dir.path().join("client.key");
        std::fs::write(&cert, client.pem()).unwrap();
        std::fs::write(&key, client_key.serialize_pem()).unwrap();

        Self {
            _dir: dir,
            trust_dir,
            cert,
            key,
            client_der: client.der().clone(),
            ca_der: ca.der().clone(),
            server_der: server.der().clone(),
            server_key: server_key.serialize_der(),
        }
    }

    pub fn config(&self, verify: VerifyPolicy) -> ClientConfig {
        ClientConfig::new(HOST, APPID, self.cert.clone())
            .with_key(self.key.clone())
            .with_verify(verify)
    }

    /// Server side of the handshake. Client certificates must chain to the CA.
    pub fn acceptor(&self) -> TlsAcceptor {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .unwrap();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![self.server_der.clone(), self.ca_der.clone()], key)
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}

/// What a one-shot TLS server saw from its only client.
#[derive(Debug)]
pub(crate) struct Handshake {
    pub peer: Option<CertificateDer<'static>>,
    pub request: String,
}

/// Accept one TLS connection on `listener`, answer any request with a 200
/// carrying `body` as JSON, and report the client certificate it presented.
pub(crate) async fn serve_once(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    body: &'static str,
) -> std::io::Result<Handshake> {
    let (tcp, _) = listener.accept().await?;
    let mut tls = acceptor.accept(tcp).await?;
    let peer = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|cert| cert.clone().into_owned());

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tls.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    tls.write_all(response.as_bytes()).await?;
    tls.shutdown().await?;

    Ok(Handshake {
        peer,
        request: String::from_utf8_lossy(&request).into_owned(),
    })
}
