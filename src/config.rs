//! ConfigBuilder — builds immutable server/client TLS configurations from
//! PEM material, DH params, cipher preferences, and trust roots.
//!
//! Grounded on `runtime/async/tls.rs`'s `TlsServerConfig`/`TlsClientConfig`
//! (cert/key loading via `rustls_pemfile`, session cache sizing); extended
//! here with the CA-directory trust store and cipher-preference/
//! performance-mode mapping an HTTP-client config builder never needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ServerSessionMemoryCache;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore, ServerConfig as RustlsServerConfig};

use crate::cert::HostVerifier;
use crate::error::ConfigError;

/// `low-latency ↔ 0`, `high-throughput ↔ 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceMode {
    LowLatency,
    HighThroughput,
}

impl PerformanceMode {
    pub fn as_int(self) -> i32 {
        match self {
            PerformanceMode::LowLatency => 0,
            PerformanceMode::HighThroughput => 1,
        }
    }
}

impl FromStr for PerformanceMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low-latency" => Ok(PerformanceMode::LowLatency),
            "high-throughput" => Ok(PerformanceMode::HighThroughput),
            _ => Err(()),
        }
    }
}

/// Recognized `cipher_prefs` presets. Anything unrecognized falls back to
/// the engine's default suite list with a WARNING (DESIGN.md Open
/// Question 5) — the opaque string itself is still stored for
/// observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CipherPreset {
    Modern,
    Compat,
    Default,
}

fn resolve_cipher_prefs(raw: &str) -> CipherPreset {
    match raw {
        "modern" => CipherPreset::Modern,
        "compat" => CipherPreset::Compat,
        "" => CipherPreset::Default,
        other => {
            log::warn!("unrecognized cipher_prefs {other:?}, falling back to engine default");
            CipherPreset::Default
        }
    }
}

fn suites_for(preset: CipherPreset) -> Vec<rustls::SupportedCipherSuite> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    match preset {
        // "modern": TLS 1.3 only, no resumption-unfriendly CBC suites.
        CipherPreset::Modern => provider
            .cipher_suites
            .iter()
            .filter(|cs| cs.version().max_version == rustls::ProtocolVersion::TLSv1_3)
            .cloned()
            .collect(),
        // "compat" / default: the provider's full default list.
        CipherPreset::Compat | CipherPreset::Default => provider.cipher_suites.clone(),
    }
}

/// Configuration options recognized by the core. The external config
/// loader is expected to populate this; the core only consumes it.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub enable_ssl: bool,
    pub certificate_file: Option<PathBuf>,
    pub private_key_file: Option<PathBuf>,
    pub dh_params_file: Option<PathBuf>,
    pub root_ca_certs_path: Option<PathBuf>,
    pub cipher_prefs: String,
    pub ssl_performance_mode: Option<PerformanceMode>,
}

impl Default for PerformanceMode {
    fn default() -> Self {
        PerformanceMode::HighThroughput
    }
}

/// Immutable, built server-side TLS configuration. Carries the metadata
/// (`created_at`, `certificate_file`/`private_key_file` paths) that
/// [`crate::rotate::CertRotator`] needs without re-reading the files.
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) inner: Arc<RustlsServerConfig>,
    pub certificate_file: Option<PathBuf>,
    pub private_key_file: Option<PathBuf>,
}

/// Immutable, built client-side TLS configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) inner: Arc<RustlsClientConfig>,
}

/// Builds [`ServerConfig`]/[`ClientConfig`] from PEM material. Any failure
/// frees the partially built config and returns `Err` — in safe Rust this
/// is simply "never construct the value", there is nothing to explicitly
/// free.
pub struct ConfigBuilder;

impl ConfigBuilder {
    pub fn build_server(
        cert_pem: &[u8],
        key_pem: &[u8],
        dh_pem: Option<&[u8]>,
        ciphers: &str,
        performance_mode: PerformanceMode,
    ) -> Result<ServerConfig, ConfigError> {
        let certs = load_certs(cert_pem)?;
        let key = load_key(key_pem)?;

        if dh_pem.is_some() {
            // rustls has no finite-field DHE/DH-params concept (ECDHE/X25519
            // only); accept the parameter for call-site compatibility and
            // move on. See DESIGN.md Open Question 4.
            log::info!("dh_params_file provided but not applicable to this TLS engine, ignoring");
        }

        let preset = resolve_cipher_prefs(ciphers);
        let provider = Arc::new(rustls::crypto::CryptoProvider {
            cipher_suites: suites_for(preset),
            ..rustls::crypto::aws_lc_rs::default_provider()
        });

        let mut inner = RustlsServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::BadCipherPrefs(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConfigError::BadCertificate(e.to_string()))?;

        match performance_mode {
            PerformanceMode::LowLatency => {
                inner.send_tls13_tickets = 0;
            }
            PerformanceMode::HighThroughput => {
                inner.send_tls13_tickets = 2;
                inner.session_storage = ServerSessionMemoryCache::new(256);
            }
        }

        Ok(ServerConfig {
            inner: Arc::new(inner),
            certificate_file: None,
            private_key_file: None,
        })
    }

    /// Client configs attach the CA directory as trust root, additionally
    /// add the local certificate PEM into the trust store (to accept peer
    /// intermediates), install the host-verify callback, and set cipher
    /// preferences.
    pub fn build_client(
        ciphers: &str,
        cert_pem_for_trust: &[u8],
        ca_dir: Option<&Path>,
        expected_hostname: Arc<std::sync::RwLock<Option<String>>>,
    ) -> Result<ClientConfig, ConfigError> {
        let mut roots = RootCertStore::empty();

        if let Some(dir) = ca_dir {
            let entries = fs::read_dir(dir)
                .map_err(|e| ConfigError::MissingTrustRoot(format!("{}: {e}", dir.display())))?;
            for entry in entries {
                let entry = entry.map_err(|e| ConfigError::MissingTrustRoot(e.to_string()))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                    continue;
                }
                let pem = fs::read(&path)
                    .map_err(|e| ConfigError::MissingTrustRoot(format!("{}: {e}", path.display())))?;
                for cert in load_certs(&pem)? {
                    roots
                        .add(cert)
                        .map_err(|e| ConfigError::MissingTrustRoot(e.to_string()))?;
                }
            }
        }

        for cert in load_certs(cert_pem_for_trust)? {
            roots
                .add(cert)
                .map_err(|e| ConfigError::MissingTrustRoot(e.to_string()))?;
        }

        let preset = resolve_cipher_prefs(ciphers);
        let provider = Arc::new(rustls::crypto::CryptoProvider {
            cipher_suites: suites_for(preset),
            ..rustls::crypto::aws_lc_rs::default_provider()
        });

        let builder = RustlsClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::BadCipherPrefs(e.to_string()))?;

        // The default verifier keys off SNI/endpoint name; cluster-bus
        // connections address peers by IP, so we install our own
        // process-wide-expected-CN verifier instead.
        let verifier = Arc::new(HostVerifier::new(roots, expected_hostname));
        let inner = builder
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(ClientConfig {
            inner: Arc::new(inner),
        })
    }
}

fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let mut reader = std::io::BufReader::new(pem);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::BadCertificate(e.to_string()))
}

fn load_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let mut reader = std::io::BufReader::new(pem);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConfigError::BadKey(e.to_string()))?
        .ok_or_else(|| ConfigError::BadKey("no private key found in PEM".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CERT: &str = include_str!("../testdata/test_cert.pem");
    const TEST_KEY: &str = include_str!("../testdata/test_key.pem");

    #[test]
    fn build_server_succeeds_with_valid_material() {
        let cfg = ConfigBuilder::build_server(
            TEST_CERT.as_bytes(),
            TEST_KEY.as_bytes(),
            None,
            "",
            PerformanceMode::HighThroughput,
        );
        assert!(cfg.is_ok());
    }

    #[test]
    fn build_server_rejects_garbage_cert() {
        let err = ConfigBuilder::build_server(
            b"not a pem",
            TEST_KEY.as_bytes(),
            None,
            "",
            PerformanceMode::HighThroughput,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadCertificate(_)));
    }

    #[test]
    fn unrecognized_cipher_prefs_falls_back_to_default() {
        assert_eq!(resolve_cipher_prefs("bogus"), CipherPreset::Default);
        assert_eq!(resolve_cipher_prefs("modern"), CipherPreset::Modern);
        assert_eq!(resolve_cipher_prefs(""), CipherPreset::Default);
    }

    #[test]
    fn dh_params_are_accepted_but_ignored() {
        let cfg = ConfigBuilder::build_server(
            TEST_CERT.as_bytes(),
            TEST_KEY.as_bytes(),
            Some(b"dummy dh params"),
            "",
            PerformanceMode::HighThroughput,
        );
        assert!(cfg.is_ok());
    }
}
