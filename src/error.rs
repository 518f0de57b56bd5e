use thiserror::Error;

/// Errors raised while building a [`crate::configuration::Configuration`].
///
/// Configuration errors are always synchronous and construction-time: they
/// should be treated as process-terminating by callers.
#[derive(Debug, Error)]
pub enum ConfigurationError {
  #[error("the '{name}' configuration is missing a required 'name' value")]
  MissingName { name: &'static str },

  #[error(
    "the '{name}' configuration has a misconfigured `allow_identifiers` value; set it to a \
     non-empty list of identifiers, or set ACME_ALLOW_IDENTIFIERS"
  )]
  InvalidAllowIdentifiers { name: String },

  #[error(
    "the '{name}' configuration has a misconfigured `directory_url` value; set it explicitly, \
     or set ACME_DIRECTORY_URL"
  )]
  MissingDirectoryUrl { name: String },

  #[error(
    "the '{name}' configuration has a misconfigured `renew_before_seconds` value; it must be a \
     positive integer"
  )]
  InvalidRenewBeforeSeconds { name: String },

  #[error(
    "the '{name}' configuration has a misconfigured `renew_before_fraction` value; it must \
     satisfy 0 < fraction < 1"
  )]
  InvalidRenewBeforeFraction { name: String },

  #[error(
    "the '{name}' configuration has a misconfigured `check_every_seconds` value; it must be a \
     positive integer"
  )]
  InvalidCheckEverySeconds { name: String },

  #[error("the '{name}' configuration must have at least one `tos_acceptors` entry")]
  MissingTosAcceptors { name: String },

  #[error("the '{name}' configuration has a `{property}` path that could not be created: {source}")]
  DirectoryUnavailable {
    name: String,
    property: &'static str,
    #[source]
    source: std::io::Error,
  },

  /// Raised when a policy description in `allow_identifiers` matches no
  /// known policy check.
  #[error("no policy check can handle the identifier policy description: {0}")]
  PolicyBuild(String),

  /// Raised when none of `allow_identifiers`, after stripping a leading
  /// `*.`, has at least two dots, so no fallback identifier can be chosen.
  #[error("configuration has no `allow_identifiers` entry that qualifies as a fallback identifier")]
  NoFallbackIdentifier,

  /// Raised when the chosen fallback identifier would itself be denied by
  /// the aggregate identifier policy.
  #[error("the fallback identifier '{0}' is not allowed by the configured identifier policy")]
  FallbackIdentifierDenied(String),
}

/// Errors produced while constructing or persisting a [`crate::managed_certificate::ManagedCertificate`].
#[derive(Debug, Error)]
pub enum CertificateError {
  #[error("failed to parse certificate PEM: {0}")]
  Parse(String),

  #[error("certificate chain is empty")]
  EmptyChain,

  #[error("certificate is missing a subject common name")]
  MissingCommonName,

  #[error("failed to persist certificate to {path}: {source}")]
  Persist {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Failure of a single ACME provisioning attempt. This is an internal
/// signal: the manager always attempts a fallback provisioning before
/// letting a failure propagate to a caller.
#[derive(Debug, Error)]
pub enum ProvisionError {
  #[error("identifier not allowed by policy: {0}")]
  IdentifierNotAllowed(String),

  #[error("ACME protocol error: {0}")]
  Acme(#[from] anyhow::Error),

  #[error("malformed cached certificate bundle: {0}")]
  MalformedCache(String),
}
