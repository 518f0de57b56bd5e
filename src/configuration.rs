//! Validated, immutable configuration for a [`crate::manager::Manager`].
//!
//! Every tunable resolves through the same three-tier precedence: an
//! explicit value given to the constructor, then an environment variable,
//! then a built-in default. Resolution happens once, at construction; the
//! result is never re-read.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ConfigurationError;
use crate::identifier_policy::IdentifierPolicy;
use crate::terms_of_service::TosAcceptor;

const DEFAULT_RENEW_BEFORE_SECONDS: i64 = 2_592_000; // 30 days
const DEFAULT_RENEW_BEFORE_FRACTION: f64 = 0.5;
const DEFAULT_CHECK_EVERY_SECONDS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct ExternalAccountBinding {
  pub key_id: String,
  pub hmac_key: String,
}

pub struct Configuration {
  pub name: String,
  pub allow_identifiers: Vec<String>,
  pub cache_dir: Option<PathBuf>,
  pub work_dir: PathBuf,
  pub directory_url: String,
  pub contact: Option<String>,
  pub external_account_binding: Option<ExternalAccountBinding>,
  pub renew_before_seconds: i64,
  pub renew_before_fraction: f64,
  pub check_every_seconds: u64,
  pub tos_acceptors: Vec<TosAcceptor>,
  /// The aggregate policy built once from `allow_identifiers`.
  pub identifier_policy: IdentifierPolicy,
  /// The identifier substituted when a request is denied by policy or
  /// provisioning fails; computed once and validated against the policy
  /// it was derived from.
  pub fallback_identifier: String,
}

/// Everything a caller may supply explicitly; fields left `None` fall back
/// to environment variables and then built-in defaults.
#[derive(Default)]
pub struct ConfigurationBuilder {
  pub allow_identifiers: Option<Vec<String>>,
  pub cache_dir: Option<PathBuf>,
  pub work_dir: Option<PathBuf>,
  pub directory_url: Option<String>,
  pub contact: Option<String>,
  pub external_account_binding: Option<ExternalAccountBinding>,
  pub renew_before_seconds: Option<i64>,
  pub renew_before_fraction: Option<f64>,
  pub check_every_seconds: Option<u64>,
  pub tos_acceptors: Option<Vec<TosAcceptor>>,
}

impl ConfigurationBuilder {
  pub fn build(self, name: &str) -> Result<Configuration, ConfigurationError> {
    if name.is_empty() {
      return Err(ConfigurationError::MissingName { name: "name" });
    }

    let allow_identifiers = prepare_allow_identifiers(name, self.allow_identifiers)?;
    let directory_url = prepare_directory_url(name, self.directory_url)?;
    let external_account_binding = prepare_external_account_binding(self.external_account_binding);
    let renew_before_seconds = prepare_renew_before_seconds(name, self.renew_before_seconds)?;
    let renew_before_fraction = prepare_renew_before_fraction(name, self.renew_before_fraction)?;
    let check_every_seconds = prepare_check_every_seconds(name, self.check_every_seconds)?;
    let tos_acceptors = self.tos_acceptors.unwrap_or_default();
    if tos_acceptors.is_empty() {
      return Err(ConfigurationError::MissingTosAcceptors { name: name.to_string() });
    }

    let cache_dir = match self.cache_dir {
      Some(dir) => {
        ensure_directory(&dir, name, "cache_dir")?;
        Some(dir)
      }
      None => None,
    };
    let work_dir = match self.work_dir {
      Some(dir) => dir,
      None => ephemeral_scratch_dir(),
    };
    ensure_directory(&work_dir, name, "work_dir")?;

    let identifier_policy = IdentifierPolicy::build(&allow_identifiers).map_err(|_| ConfigurationError::PolicyBuild(name.to_string()))?;
    let fallback_identifier = fallback_identifier(&allow_identifiers)?;
    if identifier_policy.deny(&fallback_identifier) {
      return Err(ConfigurationError::FallbackIdentifierDenied(fallback_identifier));
    }

    Ok(Configuration {
      name: name.to_string(),
      allow_identifiers,
      cache_dir,
      work_dir,
      directory_url,
      contact: self.contact,
      external_account_binding,
      renew_before_seconds,
      renew_before_fraction,
      check_every_seconds,
      tos_acceptors,
      identifier_policy,
      fallback_identifier,
    })
  }
}

fn prepare_allow_identifiers(name: &str, explicit: Option<Vec<String>>) -> Result<Vec<String>, ConfigurationError> {
  let resolved = explicit.or_else(|| {
    std::env::var("ACME_ALLOW_IDENTIFIERS")
      .ok()
      .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
  });

  match resolved {
    Some(identifiers) if !identifiers.is_empty() => Ok(identifiers),
    _ => Err(ConfigurationError::InvalidAllowIdentifiers { name: name.to_string() }),
  }
}

fn prepare_directory_url(name: &str, explicit: Option<String>) -> Result<String, ConfigurationError> {
  explicit
    .or_else(|| std::env::var("ACME_DIRECTORY_URL").ok())
    .ok_or_else(|| ConfigurationError::MissingDirectoryUrl { name: name.to_string() })
}

fn prepare_external_account_binding(explicit: Option<ExternalAccountBinding>) -> Option<ExternalAccountBinding> {
  explicit.or_else(|| {
    let key_id = std::env::var("ACME_KID").ok()?;
    let hmac_key = std::env::var("ACME_HMAC_KEY").ok()?;
    Some(ExternalAccountBinding { key_id, hmac_key })
  })
}

fn prepare_renew_before_seconds(name: &str, explicit: Option<i64>) -> Result<i64, ConfigurationError> {
  let candidates = [explicit, std::env::var("ACME_RENEW_BEFORE_SECONDS").ok().and_then(|v| v.parse().ok())];
  candidates
    .into_iter()
    .flatten()
    .find(|candidate| *candidate > 0)
    .or(Some(DEFAULT_RENEW_BEFORE_SECONDS).filter(|d| *d > 0))
    .ok_or_else(|| ConfigurationError::InvalidRenewBeforeSeconds { name: name.to_string() })
}

fn prepare_renew_before_fraction(name: &str, explicit: Option<f64>) -> Result<f64, ConfigurationError> {
  let candidates = [explicit, std::env::var("ACME_RENEW_BEFORE_FRACTION").ok().and_then(|v| v.parse().ok())];
  candidates
    .into_iter()
    .flatten()
    .find(|candidate| *candidate > 0.0 && *candidate < 1.0)
    .or(Some(DEFAULT_RENEW_BEFORE_FRACTION).filter(|d| *d > 0.0 && *d < 1.0))
    .ok_or_else(|| ConfigurationError::InvalidRenewBeforeFraction { name: name.to_string() })
}

fn prepare_check_every_seconds(name: &str, explicit: Option<u64>) -> Result<u64, ConfigurationError> {
  let candidates = [explicit, std::env::var("AUTO_CERT_CHECK_EVERY").ok().and_then(|v| v.parse().ok())];
  candidates
    .into_iter()
    .flatten()
    .find(|candidate| *candidate > 0)
    .or(Some(DEFAULT_CHECK_EVERY_SECONDS).filter(|d| *d > 0))
    .ok_or_else(|| ConfigurationError::InvalidCheckEverySeconds { name: name.to_string() })
}

fn ensure_directory(path: &std::path::Path, name: &str, property: &'static str) -> Result<(), ConfigurationError> {
  std::fs::create_dir_all(path).map_err(|source| ConfigurationError::DirectoryUnavailable {
    name: name.to_string(),
    property,
    source,
  })
}

fn ephemeral_scratch_dir() -> PathBuf {
  let unique = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
  std::env::temp_dir().join(format!("autocert-manager-{}-{unique}", std::process::id()))
}

/// An OS-conventional default `cache_dir`, for callers that want one
/// without naming a path explicitly. `cache_dir` itself has no built-in
/// default (it stays `None`, disabling disk persistence, unless a caller
/// sets one); this is an opt-in convenience, not something `build` applies
/// on its own.
pub fn default_cache_dir() -> Option<PathBuf> {
  dirs::data_local_dir().map(|dir| dir.join("autocert-manager"))
}

/// Strips a leading `*.`, discards entries with fewer than two dots, and
/// returns the survivor with the fewest dots (ties won by first occurrence).
fn fallback_identifier(allow_identifiers: &[String]) -> Result<String, ConfigurationError> {
  allow_identifiers
    .iter()
    .map(|identifier| identifier.strip_prefix("*.").unwrap_or(identifier))
    .filter(|identifier| identifier.matches('.').count() >= 2)
    .min_by_key(|identifier| identifier.matches('.').count())
    .map(str::to_string)
    .ok_or(ConfigurationError::NoFallbackIdentifier)
}
