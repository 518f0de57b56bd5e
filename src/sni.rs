//! The synchronous handshake-time entry point.
//!
//! TLS server implementations invoke a certificate resolver from inside a
//! synchronous callback. [`SniResolver::on_sni`] bridges that callback into
//! the async [`Manager`] with `block_in_place` + `Handle::current().block_on`,
//! which (unlike a bare `futures_executor::block_on`) keeps the Tokio
//! reactor available to the cache's file I/O and the ACME client's finalize
//! deadline while the calling worker thread is parked.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::crypto::CryptoProvider;
use rustls_pki_types::CertificateDer;

use crate::manager::Manager;

/// The on-disk paths of a resolved certificate and its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCertificatePaths {
  pub certificate_path: PathBuf,
  pub private_key_path: PathBuf,
}

pub struct SniResolver {
  manager: Manager,
}

impl SniResolver {
  pub fn new(manager: Manager) -> Self {
    Self { manager }
  }

  /// Resolves `server_name` to on-disk certificate and key paths, blocking
  /// the caller until provisioning completes on a cold miss. Returns `None`
  /// for an empty server name, or if the resulting certificate was never
  /// persisted to disk (no `work_dir` was configured).
  pub fn on_sni(&self, server_name: &str) -> Option<ResolvedCertificatePaths> {
    if server_name.is_empty() {
      return None;
    }

    let certificate = tokio::task::block_in_place(|| {
      tokio::runtime::Handle::current().block_on(self.manager.certificate_for(server_name, None, Utc::now()))
    })
    .ok()?;

    Some(ResolvedCertificatePaths {
      certificate_path: certificate.certificate_path?,
      private_key_path: certificate.private_key_path?,
    })
  }

  /// Resolves `server_name` directly to a signed [`CertifiedKey`], for
  /// callers wiring this resolver into `rustls::ServerConfig` via
  /// [`RustlsCertResolver`] rather than re-reading the persisted files.
  fn certified_key_for(&self, server_name: &str, crypto_provider: &CryptoProvider) -> Option<Arc<CertifiedKey>> {
    let certificate = tokio::task::block_in_place(|| {
      tokio::runtime::Handle::current().block_on(self.manager.certificate_for(server_name, None, Utc::now()))
    })
    .ok()?;

    let der_chain = rustls_pemfile::certs(&mut certificate.cert_pem.as_bytes())
      .collect::<Result<Vec<CertificateDer<'static>>, _>>()
      .ok()?;
    let der_key = rustls_pemfile::private_key(&mut certificate.key_pem.as_bytes()).ok()??;
    let signing_key = crypto_provider.key_provider.load_private_key(der_key).ok()?;

    Some(Arc::new(CertifiedKey::new(der_chain, signing_key)))
  }
}

/// Adapts a [`SniResolver`] to rustls's handshake-time certificate hook.
///
/// This is the shape a TLS server actually plugs into `ServerConfig`: rustls
/// calls [`ResolvesServerCert::resolve`] synchronously from inside the
/// handshake, which is exactly the contract `SniResolver::on_sni` exists to
/// satisfy, skipping the intermediate round-trip through the persisted
/// `.crt`/`.key` files.
pub struct RustlsCertResolver {
  resolver: SniResolver,
  crypto_provider: Arc<CryptoProvider>,
}

impl RustlsCertResolver {
  pub fn new(resolver: SniResolver, crypto_provider: Arc<CryptoProvider>) -> Self {
    Self { resolver, crypto_provider }
  }
}

impl std::fmt::Debug for RustlsCertResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RustlsCertResolver").finish_non_exhaustive()
  }
}

impl ResolvesServerCert for RustlsCertResolver {
  fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
    let server_name = client_hello.server_name()?;
    self.resolver.certified_key_for(server_name, &self.crypto_provider)
  }
}
