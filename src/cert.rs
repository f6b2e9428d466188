//! CertInspector — PEM/X.509 field extraction and
//! hostname verification.
//!
//! Grounded on
//! `examples/other_examples/ee62903e_agentgateway-agentgateway__crates-agentgateway-src-control-caclient.rs.rs`'s
//! `parse_cert`/`identity`/`expiration` helpers (PEM → `rustls_pemfile::Item`
//! → `x509_parser::parse_x509_certificate`), the only pack example that
//! extracts CN/validity/serial out of a certificate; `x509-parser` is
//! pulled in from there since this crate's base dependency tree has no
//! field-extraction code of its own.

use std::sync::{Arc, RwLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchors;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::Item;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::ConfigError;

/// Bound on CN length.
const MAX_CN_LEN: usize = 256;

pub struct CertInspector;

impl CertInspector {
    /// Subject CN, bounded length.
    pub fn extract_cn(pem: &[u8]) -> Result<String, ConfigError> {
        let der = first_cert_der(pem)?;
        Self::extract_cn_der(&der)
    }

    pub(crate) fn extract_cn_der(der: &CertificateDer<'_>) -> Result<String, ConfigError> {
        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| ConfigError::BadCertificate(e.to_string()))?;
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .ok_or_else(|| ConfigError::BadCertificate("certificate has no subject CN".into()))?;
        if cn.len() > MAX_CN_LEN {
            return Err(ConfigError::BadCertificate(format!(
                "CN exceeds {MAX_CN_LEN} bytes"
            )));
        }
        Ok(cn.to_string())
    }

    /// `(notBefore, notAfter, serial)` as date strings and a decimal
    /// serial number. A zero serial is treated as an error — this
    /// reproduces a known upstream quirk (legitimate but unusual
    /// certificates with a zero serial are rejected); see DESIGN.md Open
    /// Question 3. Not "fixed" here for compatibility.
    pub fn extract_validity_and_serial(pem: &[u8]) -> Result<(String, String, u128), ConfigError> {
        let der = first_cert_der(pem)?;
        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| ConfigError::BadCertificate(e.to_string()))?;

        let serial = cert.tbs_certificate.raw_serial_as_string();
        let serial_value = u128::from_str_radix(&serial.replace(':', ""), 16)
            .map_err(|e| ConfigError::BadCertificate(format!("unparseable serial: {e}")))?;
        if serial_value == 0 {
            // quirk: reproduces the upstream behavior of rejecting a
            // zero serial, deliberately not "fixed" — see DESIGN.md OQ3.
            return Err(ConfigError::BadCertificate("certificate has zero serial".into()));
        }

        let not_before = render_time(cert.validity().not_before.to_datetime());
        let not_after = render_time(cert.validity().not_after.to_datetime());

        Ok((not_before, not_after, serial_value))
    }

    /// Compares `peer_name` against the process-wide `expected_hostname`
    /// per RFC 6125 §6.4 with one-level wildcard support:
    /// - case-insensitive exact match, or
    /// - `peer_name` begins with `*.` and the suffix from that dot onward
    ///   case-insensitively equals the suffix of `expected_hostname` from
    ///   its first dot.
    ///
    /// A peer of just `*` or `*.` (length ≤ 2) is never a match.
    /// `expected_hostname == None` ⇒ always `false`.
    pub fn verify_host(peer_name: &str, expected_hostname: Option<&str>) -> bool {
        let Some(expected) = expected_hostname else {
            return false;
        };

        if peer_name.len() <= 2 {
            return false;
        }

        if let Some(peer_suffix) = peer_name.strip_prefix("*.") {
            let Some(dot) = expected.find('.') else {
                return false;
            };
            let expected_suffix = &expected[dot + 1..];
            return peer_suffix.eq_ignore_ascii_case(expected_suffix);
        }

        peer_name.eq_ignore_ascii_case(expected)
    }
}

fn render_time(dt: x509_parser::time::OffsetDateTime) -> String {
    let naive = chrono::DateTime::<chrono::Utc>::from_timestamp(dt.unix_timestamp(), 0)
        .unwrap_or_default();
    naive.format("%b %e %H:%M:%S %Y GMT").to_string()
}

fn first_cert_der(pem: &[u8]) -> Result<CertificateDer<'static>, ConfigError> {
    let mut reader = std::io::BufReader::new(pem);
    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| ConfigError::BadCertificate(e.to_string()))?
        {
            Some(Item::X509Certificate(der)) => return Ok(der),
            Some(_) => continue,
            None => return Err(ConfigError::BadCertificate("no certificate in PEM".into())),
        }
    }
}

/// Replaces rustls's default verifier (which keys hostname checks off the
/// connection's SNI/endpoint name) with one keyed off a process-wide
/// `expected_hostname`, because cluster-bus connections address peers by
/// IP rather than hostname.
pub struct HostVerifier {
    roots: RootCertStore,
    expected_hostname: Arc<RwLock<Option<String>>>,
}

impl HostVerifier {
    pub fn new(roots: RootCertStore, expected_hostname: Arc<RwLock<Option<String>>>) -> Self {
        Self {
            roots,
            expected_hostname,
        }
    }
}

impl std::fmt::Debug for HostVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for HostVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let parsed = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchors(&parsed, &self.roots, intermediates, now)?;

        let cn = CertInspector::extract_cn_der(end_entity)
            .map_err(|e| rustls::Error::General(e.to_string()))?;

        let expected = self.expected_hostname.read().expect("lock poisoned");
        if CertInspector::verify_host(&cn, expected.as_deref()) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "certificate CN {cn:?} does not match expected hostname {:?}",
                expected.as_deref()
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CERT: &str = include_str!("../testdata/test_cert.pem");

    #[test]
    fn extracts_cn() {
        let cn = CertInspector::extract_cn(TEST_CERT.as_bytes()).unwrap();
        assert_eq!(cn, "redis-7.example.com");
    }

    #[test]
    fn extracts_validity_and_nonzero_serial() {
        let (not_before, not_after, serial) =
            CertInspector::extract_validity_and_serial(TEST_CERT.as_bytes()).unwrap();
        assert!(!not_before.is_empty());
        assert!(!not_after.is_empty());
        assert_ne!(serial, 0);
    }

    #[test]
    fn cn_round_trips_through_verify_host() {
        let cn = CertInspector::extract_cn(TEST_CERT.as_bytes()).unwrap();
        assert!(CertInspector::verify_host(&cn, Some(&cn)));
    }

    #[test]
    fn wildcard_matches_one_level_suffix() {
        assert!(CertInspector::verify_host(
            "*.example.com",
            Some("redis-7.example.com")
        ));
        assert!(!CertInspector::verify_host(
            "*.other.com",
            Some("redis-7.example.com")
        ));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(CertInspector::verify_host(
            "redis-7.example.com",
            Some("redis-7.EXAMPLE.com")
        ));
    }

    #[test]
    fn bare_wildcard_never_matches() {
        assert!(!CertInspector::verify_host("*", Some("example.com")));
        assert!(!CertInspector::verify_host("*.", Some("example.com")));
    }

    #[test]
    fn null_expected_hostname_never_matches() {
        assert!(!CertInspector::verify_host("example.com", None));
    }
}
