//! Certificate inspection over a live TLS handshake
//!
//! Chain verification is switched off on purpose: the point of this
//! operation is to report on certificates that are expired, self-signed or
//! issued for the wrong name, and a verifying client would refuse to
//! complete the handshake with exactly those servers. Handshake signatures
//! are still checked so the peer must own the key it presents.

use chrono::{DateTime, SecondsFormat, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout_at;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{PipelineError, PipelineResult};
use crate::records::CertificateRecord;
use crate::registry::Operation;
use crate::runner::Deadline;
use crate::validation::TlsCertificateParams;

const OP: Operation = Operation::TlsCertificate;

/// Accepts any certificate chain but still verifies handshake signatures.
#[derive(Debug)]
struct InspectOnly(Arc<CryptoProvider>);

impl ServerCertVerifier for InspectOnly {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn connector() -> PipelineResult<TlsConnector> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| PipelineError::failure(OP, format!("TLS setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InspectOnly(provider)))
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connect, complete a handshake and describe the leaf certificate.
pub async fn inspect(
    params: &TlsCertificateParams,
    deadline: Deadline,
    cancel: CancellationToken,
) -> PipelineResult<CertificateRecord> {
    let host = params.host.as_str();
    let server_name = ServerName::try_from(params.server_name.as_str().to_string())
        .map_err(|e| PipelineError::failure(OP, format!("invalid server name: {e}")))?;
    let connector = connector()?;

    let handshake = async {
        let tcp = TcpStream::connect((host, params.port))
            .await
            .map_err(|e| PipelineError::failure(OP, format!("connect to {host}:{} failed: {e}", params.port)))?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| PipelineError::failure(OP, format!("TLS handshake failed: {e}")))
    };

    let stream = tokio::select! {
        r = timeout_at(deadline.expires_at(), handshake) => r.map_err(|_| PipelineError::ExecutionTimeout {
            operation: OP,
            after: deadline.timeout(),
        })??,
        _ = cancel.cancelled() => return Err(PipelineError::failure(OP, "run was cancelled")),
    };

    let (_, conn) = stream.get_ref();
    let chain = conn
        .peer_certificates()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PipelineError::parse(OP, "server presented no certificate"))?;
    let protocol = conn
        .protocol_version()
        .map(|v| format!("{v:?}"))
        .unwrap_or_default();
    let cipher = conn
        .negotiated_cipher_suite()
        .map(|s| format!("{:?}", s.suite()))
        .unwrap_or_default();
    debug!(host, %protocol, %cipher, chain = chain.len(), "handshake complete");

    describe(host, params.port, chain, protocol, cipher, Utc::now())
}

/// Build the record from a DER chain, leaf first.
pub fn describe(
    host: &str,
    port: u16,
    chain: &[CertificateDer<'_>],
    protocol: String,
    cipher_suite: String,
    now: DateTime<Utc>,
) -> PipelineResult<CertificateRecord> {
    let leaf = chain
        .first()
        .ok_or_else(|| PipelineError::parse(OP, "empty certificate chain"))?;
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| PipelineError::parse(OP, format!("malformed certificate: {e}")))?;

    let not_before = timestamp(cert.validity().not_before.timestamp())?;
    let not_after = timestamp(cert.validity().not_after.timestamp())?;

    let subject_alt_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                GeneralName::IPAddress(bytes) => ip_from_bytes(bytes),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let subject = cert.subject().to_string();
    let issuer = cert.issuer().to_string();
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let serial_number = cert.raw_serial_as_string();
    let signature_algorithm = signature_name(&cert.signature_algorithm.algorithm.to_id_string());
    Ok(CertificateRecord {
        host: host.to_string(),
        port,
        common_name,
        self_signed: subject == issuer,
        subject,
        issuer,
        subject_alt_names,
        serial_number,
        valid_from: not_before.to_rfc3339_opts(SecondsFormat::Secs, true),
        valid_to: not_after.to_rfc3339_opts(SecondsFormat::Secs, true),
        days_remaining: (not_after - now).num_days(),
        expired: now > not_after,
        not_yet_valid: now < not_before,
        fingerprint_sha256: fingerprint(leaf.as_ref()),
        signature_algorithm,
        protocol,
        cipher_suite,
        chain_length: chain.len(),
    })
}

fn timestamp(secs: i64) -> PipelineResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PipelineError::parse(OP, format!("validity timestamp {secs} out of range")))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(|b| std::net::Ipv4Addr::from(b).to_string()),
        16 => <[u8; 16]>::try_from(bytes).ok().map(|b| std::net::Ipv6Addr::from(b).to_string()),
        _ => None,
    }
}

/// Upper-case hex SHA-256 of the DER encoding, colon separated.
pub fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn signature_name(oid: &str) -> String {
    let name = match oid {
        "1.2.840.113549.1.1.5" => "sha1WithRSAEncryption",
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption",
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption",
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption",
        "1.2.840.113549.1.1.10" => "rsassaPss",
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
        "1.2.840.10045.4.3.4" => "ecdsa-with-SHA512",
        "1.3.101.112" => "ED25519",
        other => other,
    };
    name.to_string()
}
