//! Automatic ACME certificate provisioning, caching, and renewal for TLS
//! servers that delegate certificate selection to a handshake-time SNI hook.
//!
//! The crate is organized leaf-first, mirroring the component design:
//! [`policy_check`] and [`terms_of_service`] are the pluggable predicates,
//! [`configuration`] validates and resolves the tunables that drive them,
//! [`managed_certificate`] and [`renewal_policy`] define what a certificate
//! is and when it goes stale, [`manager`] orchestrates all of the above
//! against an [`acme_client`] and a [`cache`], and [`sni`] is the thin
//! synchronous adapter a TLS server actually calls.

pub mod acme_client;
pub mod cache;
pub mod configuration;
pub mod error;
pub mod identifier_policy;
pub mod logging;
pub mod managed_certificate;
pub mod manager;
pub mod policy_check;
pub mod renewal_policy;
pub mod sni;
pub mod terms_of_service;

pub use acme_client::{AcmeClient, InstantAcmeClient, ProvisionRequest, ProvisionedCertificate};
pub use cache::Cache;
pub use configuration::{default_cache_dir, Configuration, ConfigurationBuilder, ExternalAccountBinding};
pub use error::{CertificateError, ConfigurationError, ProvisionError};
pub use identifier_policy::IdentifierPolicy;
pub use logging::ErrorLogger;
pub use managed_certificate::ManagedCertificate;
pub use manager::Manager;
pub use policy_check::PolicyCheck;
pub use renewal_policy::needs_renewal;
pub use sni::{ResolvedCertificatePaths, RustlsCertResolver, SniResolver};
pub use terms_of_service::TosAcceptor;
