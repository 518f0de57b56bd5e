//! The lifecycle orchestrator.
//!
//! Combines the identifier policy, the renewal policy, an in-memory map, a
//! disk cache, and an ACME client behind one entry point,
//! [`Manager::certificate_for`]. Per-name single-flight keeps concurrent TLS
//! handshakes for the same name from racing each other into the ACME server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::acme_client::{AcmeClient, ProvisionRequest};
use crate::cache::Cache;
use crate::configuration::Configuration;
use crate::error::ProvisionError;
use crate::logging::ErrorLogger;
use crate::managed_certificate::ManagedCertificate;
use crate::renewal_policy::needs_renewal;
use crate::terms_of_service::terms_of_service_agreed;

/// Finalize deadline passed through to the ACME collaborator, per §5's hard
/// 90-second bound.
const FINALIZE_DEADLINE: Duration = Duration::from_secs(90);

/// The cache value format for a provisioned certificate: the full chain PEM
/// and its private key PEM, round-tripped losslessly.
#[derive(Debug, Serialize, Deserialize)]
struct CertificateBundle {
  cert_pem: String,
  key_pem: String,
}

pub struct Manager {
  configuration: Configuration,
  managed_certificates: RwLock<HashMap<String, ManagedCertificate>>,
  inflight: Mutex<HashMap<String, Arc<Notify>>>,
  cache: Cache,
  acme_client: Arc<dyn AcmeClient>,
  logger: ErrorLogger,
}

impl Manager {
  pub fn new(configuration: Configuration, cache: Cache, acme_client: Arc<dyn AcmeClient>, logger: ErrorLogger) -> Self {
    Self {
      configuration,
      managed_certificates: RwLock::new(HashMap::new()),
      inflight: Mutex::new(HashMap::new()),
      cache,
      acme_client,
      logger,
    }
  }

  /// Builds a Manager wired the way a caller actually wants in production:
  /// the disk cache is derived from `configuration.cache_dir` rather than
  /// handed in separately, so the two can never disagree.
  pub fn from_configuration(configuration: Configuration, acme_client: Arc<dyn AcmeClient>, logger: ErrorLogger) -> Self {
    let cache = match &configuration.cache_dir {
      Some(dir) => Cache::file(dir.clone()),
      None => Cache::memory(),
    };
    Self::new(configuration, cache, acme_client, logger)
  }

  /// Resolves a certificate for `common_name`, provisioning one on demand.
  /// Never returns an error for denied or unprovisionable identifiers;
  /// those degrade to the fallback identifier per §4.6.
  pub async fn certificate_for(
    &self,
    common_name: &str,
    extra_identifiers: Option<Vec<String>>,
    now: DateTime<Utc>,
  ) -> Result<ManagedCertificate, ProvisionError> {
    let consolidated = consolidate(common_name, extra_identifiers.unwrap_or_default());
    let (common_name, identifiers) = self.apply_fallback_if_denied(common_name, consolidated);

    if let Some(cert) = self.memory_lookup(&common_name, now).await {
      return Ok(cert);
    }
    if let Some(cert) = self.disk_lookup(&common_name, now).await {
      return Ok(cert);
    }

    self.provision_single_flight(&common_name, identifiers, now).await
  }

  /// Spawns the background renewal sweep, ticking every
  /// `configuration.check_every_seconds` and eagerly refreshing any
  /// in-memory certificate [`renewal_policy::needs_renewal`] flags as
  /// stale. Mirrors a periodic certificate-maintenance loop; a single
  /// provisioning failure is logged and the sweep continues rather than
  /// aborting the loop for every other managed name.
  pub fn spawn_renewal_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(self.configuration.check_every_seconds);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        self.renewal_sweep_once(Utc::now()).await;
      }
    })
  }

  async fn renewal_sweep_once(&self, now: DateTime<Utc>) {
    let names: Vec<String> = self.managed_certificates.read().await.keys().cloned().collect();
    for name in names {
      let stale = match self.managed_certificates.read().await.get(&name) {
        Some(cert) => !self.is_fresh(cert, now),
        None => continue,
      };
      if !stale {
        continue;
      }
      if let Err(err) = self.certificate_for(&name, None, now).await {
        self.logger.log(&format!("background renewal of '{name}' failed: {err}")).await;
      }
    }
  }

  /// Substitutes the fallback identifier, and clears extra identifiers, if
  /// every consolidated identifier is denied by the aggregate policy. The
  /// swap happens once; the fallback itself is assumed allowed (enforced at
  /// `Configuration` construction).
  fn apply_fallback_if_denied(&self, common_name: &str, consolidated: Vec<String>) -> (String, Vec<String>) {
    if consolidated.iter().all(|id| self.configuration.identifier_policy.deny(id)) {
      (self.configuration.fallback_identifier.clone(), Vec::new())
    } else {
      (common_name.to_string(), consolidated)
    }
  }

  async fn memory_lookup(&self, common_name: &str, now: DateTime<Utc>) -> Option<ManagedCertificate> {
    let cached = self.managed_certificates.read().await.get(common_name).cloned()?;
    if self.is_fresh(&cached, now) {
      Some(cached)
    } else {
      None
    }
  }

  /// Fetches a cached bundle for `common_name`; fresh hits are published to
  /// memory and returned, stale or malformed entries are treated as absent.
  async fn disk_lookup(&self, common_name: &str, now: DateTime<Utc>) -> Option<ManagedCertificate> {
    let bytes = self.cache.get(common_name).await?;
    let bundle: CertificateBundle = serde_json::from_slice(&bytes).ok()?;
    let cert = ManagedCertificate::new(Some(&self.configuration.work_dir), bundle.cert_pem, bundle.key_pem).ok()?;
    if self.is_fresh(&cert, now) {
      self.publish(common_name, cert.clone()).await;
      Some(cert)
    } else {
      None
    }
  }

  fn is_fresh(&self, cert: &ManagedCertificate, now: DateTime<Utc>) -> bool {
    !needs_renewal(
      cert,
      now,
      self.configuration.renew_before_seconds,
      self.configuration.renew_before_fraction,
    )
  }

  async fn publish(&self, common_name: &str, cert: ManagedCertificate) {
    self.managed_certificates.write().await.insert(common_name.to_string(), cert.clone());
    let bundle = CertificateBundle {
      cert_pem: cert.cert_pem,
      key_pem: cert.key_pem,
    };
    match serde_json::to_vec(&bundle) {
      Ok(bytes) => self.cache.set(common_name, bytes, &self.logger).await,
      Err(err) => self.logger.log(&format!("failed to serialize certificate bundle for {common_name}: {err}")).await,
    }
  }

  /// Ensures at most one `provision_or_fallback` call is in flight per
  /// `common_name`: the first caller does the work and notifies the rest on
  /// completion, who then re-check the now-published memory entry.
  async fn provision_single_flight(
    &self,
    common_name: &str,
    identifiers: Vec<String>,
    now: DateTime<Utc>,
  ) -> Result<ManagedCertificate, ProvisionError> {
    loop {
      let existing = {
        let mut inflight = self.inflight.lock().await;
        match inflight.get(common_name) {
          Some(notify) => Some(notify.clone()),
          None => {
            inflight.insert(common_name.to_string(), Arc::new(Notify::new()));
            None
          }
        }
      };

      let Some(notify) = existing else {
        let result = self.provision_or_fallback(common_name, identifiers.clone()).await;
        if let Ok(cert) = &result {
          self.publish(common_name, cert.clone()).await;
        }
        if let Some(notify) = self.inflight.lock().await.remove(common_name) {
          notify.notify_waiters();
        }
        return result;
      };

      notify.notified().await;
      if let Some(cert) = self.memory_lookup(common_name, now).await {
        return Ok(cert);
      }
      // the owner's attempt failed for everyone; fall through and retry.
    }
  }

  /// Attempts `provision(name, ids)`; on any failure, retries exactly once
  /// against the fallback identifier with no extra identifiers. The second
  /// attempt's failure propagates.
  async fn provision_or_fallback(&self, name: &str, identifiers: Vec<String>) -> Result<ManagedCertificate, ProvisionError> {
    match self.provision(name, identifiers).await {
      Ok(cert) => Ok(cert),
      Err(err) => {
        self.logger.log(&format!("provisioning '{name}' failed, retrying as fallback: {err}")).await;
        self.provision(&self.configuration.fallback_identifier, Vec::new()).await
      }
    }
  }

  /// Runs the ACME happy path: account key lifecycle, registration, order,
  /// authorize, finalize, download.
  async fn provision(&self, name: &str, extra_identifiers: Vec<String>) -> Result<ManagedCertificate, ProvisionError> {
    let identifiers = consolidate(name, extra_identifiers);

    let account_cache_key = self.account_cache_key();
    let cached_account = self.cache.get(&account_cache_key).await;

    let tos_url = self
      .acme_client
      .fetch_terms_of_service(&self.configuration.directory_url)
      .await
      .map_err(ProvisionError::Acme)?;
    let terms_of_service_agreed = terms_of_service_agreed(&self.configuration.tos_acceptors, tos_url.as_deref());

    let request = ProvisionRequest {
      directory_url: self.configuration.directory_url.clone(),
      identifiers,
      contact: self.configuration.contact.clone(),
      external_account_binding: self.configuration.external_account_binding.clone(),
      terms_of_service_agreed,
      cached_account,
      finalize_deadline: FINALIZE_DEADLINE,
    };

    let provisioned = self.acme_client.provision(request).await.map_err(ProvisionError::Acme)?;

    self.cache.set(&account_cache_key, provisioned.account_to_cache, &self.logger).await;

    ManagedCertificate::new(Some(&self.configuration.work_dir), provisioned.cert_pem, provisioned.key_pem)
      .map_err(|err| ProvisionError::Acme(anyhow::anyhow!(err)))
  }

  /// `"{contact or 'default'}+{hostname of directory_url}+key"`, per §4.6.
  fn account_cache_key(&self) -> String {
    let contact = self.configuration.contact.as_deref().unwrap_or("default");
    let host = url::Url::parse(&self.configuration.directory_url)
      .ok()
      .and_then(|url| url.host_str().map(str::to_string))
      .unwrap_or_else(|| self.configuration.directory_url.clone());
    format!("{contact}+{host}+key")
  }
}

/// Preserves order, deduplicates, and puts `common_name` first.
fn consolidate(common_name: &str, extra_identifiers: Vec<String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  let mut consolidated = Vec::new();
  for identifier in std::iter::once(common_name.to_string()).chain(extra_identifiers) {
    if seen.insert(identifier.clone()) {
      consolidated.push(identifier);
    }
  }
  consolidated
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use async_trait::async_trait;
  use rcgen::{CertificateParams, DnType, KeyPair};

  use super::*;
  use crate::acme_client::ProvisionedCertificate;
  use crate::configuration::ConfigurationBuilder;
  use crate::terms_of_service::TosAcceptor;

  fn self_signed(common_name: &str) -> (String, String) {
    let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
  }

  struct StubAcmeClient {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl AcmeClient for StubAcmeClient {
    async fn fetch_terms_of_service(&self, _directory_url: &str) -> anyhow::Result<Option<String>> {
      Ok(None)
    }

    async fn provision(&self, request: ProvisionRequest) -> anyhow::Result<ProvisionedCertificate> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let name = request.identifiers.first().cloned().unwrap_or_default();
      let (cert_pem, key_pem) = self_signed(&name);
      Ok(ProvisionedCertificate {
        cert_pem,
        key_pem,
        account_to_cache: b"account".to_vec(),
      })
    }
  }

  struct FailingAcmeClient;

  #[async_trait]
  impl AcmeClient for FailingAcmeClient {
    async fn fetch_terms_of_service(&self, _directory_url: &str) -> anyhow::Result<Option<String>> {
      Ok(None)
    }

    async fn provision(&self, request: ProvisionRequest) -> anyhow::Result<ProvisionedCertificate> {
      if request.identifiers.first().map(String::as_str) == Some("fallback.lcl.host") {
        let (cert_pem, key_pem) = self_signed("fallback.lcl.host");
        return Ok(ProvisionedCertificate {
          cert_pem,
          key_pem,
          account_to_cache: b"account".to_vec(),
        });
      }
      anyhow::bail!("identifier rejected by CA")
    }
  }

  fn manager_with(acme_client: Arc<dyn AcmeClient>) -> Manager {
    let configuration = ConfigurationBuilder {
      allow_identifiers: Some(vec!["test.example.com".to_string()]),
      directory_url: Some("https://acme.example.com/directory".to_string()),
      tos_acceptors: Some(vec![TosAcceptor::any()]),
      ..Default::default()
    }
    .build("manager-test")
    .unwrap();
    Manager::new(configuration, Cache::memory(), acme_client, ErrorLogger::without_logger())
  }

  #[test]
  fn from_configuration_derives_disk_cache_from_cache_dir() {
    let dir = std::env::temp_dir().join(format!("autocert-manager-from-config-test-{}", std::process::id()));
    let configuration = ConfigurationBuilder {
      allow_identifiers: Some(vec!["test.example.com".to_string()]),
      directory_url: Some("https://acme.example.com/directory".to_string()),
      tos_acceptors: Some(vec![TosAcceptor::any()]),
      cache_dir: Some(dir.clone()),
      ..Default::default()
    }
    .build("from-configuration-test")
    .unwrap();
    let manager = Manager::from_configuration(
      configuration,
      Arc::new(StubAcmeClient { calls: AtomicUsize::new(0) }),
      ErrorLogger::without_logger(),
    );
    assert!(matches!(manager.cache, Cache::File(ref root) if *root == dir));
    std::fs::remove_dir_all(&dir).ok();
  }

  // Scenario 1: a second request for the same already-cached name never
  // reaches the ACME client again.
  #[tokio::test]
  async fn repeated_request_reuses_cache_without_new_acme_traffic() {
    let stub = Arc::new(StubAcmeClient { calls: AtomicUsize::new(0) });
    let manager = manager_with(stub.clone());

    let first = manager.certificate_for("test.example.com", None, Utc::now()).await.unwrap();
    let second = manager.certificate_for("test.example.com", None, Utc::now()).await.unwrap();

    assert_eq!(first.serial, second.serial);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
  }

  // Scenario 2: a denied identifier silently falls back to the configured
  // fallback identifier.
  #[tokio::test]
  async fn denied_identifier_falls_back() {
    let configuration = ConfigurationBuilder {
      allow_identifiers: Some(vec![
        "anchor-pki-py-testing.lcl.host".to_string(),
        "*.anchor-pki-py-testing.lcl.host".to_string(),
      ]),
      directory_url: Some("https://acme.example.com/directory".to_string()),
      tos_acceptors: Some(vec![TosAcceptor::any()]),
      ..Default::default()
    }
    .build("fallback-test")
    .unwrap();
    let stub = Arc::new(StubAcmeClient { calls: AtomicUsize::new(0) });
    let manager = Manager::new(configuration, Cache::memory(), stub, ErrorLogger::without_logger());

    let cert = manager.certificate_for("invalid.bad.host", None, Utc::now()).await.unwrap();
    assert_eq!(cert.common_name, "anchor-pki-py-testing.lcl.host");
  }

  #[tokio::test]
  async fn acme_failure_retries_once_against_fallback() {
    let configuration = ConfigurationBuilder {
      allow_identifiers: Some(vec!["auth.fallback.lcl.host".to_string(), "*.fallback.lcl.host".to_string()]),
      directory_url: Some("https://acme.example.com/directory".to_string()),
      tos_acceptors: Some(vec![TosAcceptor::any()]),
      ..Default::default()
    }
    .build("retry-test")
    .unwrap();
    let manager = Manager::new(configuration, Cache::memory(), Arc::new(FailingAcmeClient), ErrorLogger::without_logger());

    let cert = manager.certificate_for("auth.fallback.lcl.host", None, Utc::now()).await.unwrap();
    assert_eq!(cert.common_name, "fallback.lcl.host");
  }

  #[test]
  fn consolidate_dedupes_preserving_order_with_common_name_first() {
    let result = consolidate("a.example.com", vec!["b.example.com".to_string(), "a.example.com".to_string()]);
    assert_eq!(result, vec!["a.example.com".to_string(), "b.example.com".to_string()]);
  }

  #[tokio::test]
  async fn renewal_sweep_refreshes_a_stale_in_memory_certificate() {
    use chrono::Duration as ChronoDuration;

    let stub = Arc::new(StubAcmeClient { calls: AtomicUsize::new(0) });
    let manager = manager_with(stub.clone());

    let stale = ManagedCertificate {
      cert_pem: String::new(),
      key_pem: String::new(),
      serial: "1".to_string(),
      not_before: Utc::now() - ChronoDuration::days(90),
      not_after: Utc::now() - ChronoDuration::days(1),
      common_name: "test.example.com".to_string(),
      identifiers: vec!["test.example.com".to_string()],
      all_names: vec!["test.example.com".to_string()],
      certificate_path: None,
      private_key_path: None,
    };
    manager.managed_certificates.write().await.insert("test.example.com".to_string(), stale);

    manager.renewal_sweep_once(Utc::now()).await;

    assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    let refreshed = manager.managed_certificates.read().await.get("test.example.com").cloned().unwrap();
    assert!(refreshed.not_after > Utc::now());
  }
}
