//! Aggregate identifier policy.
//!
//! Wraps a sequence of [`PolicyCheck`]s built from a configuration's
//! `allow_identifiers` descriptions. The aggregate decision is union-of-allow:
//! an identifier is denied only if every single check denies it, so a
//! combination of an exact-host, a wildcard, and a CIDR entry compose the way
//! a reader would expect a allow-list to compose.

use crate::error::ConfigurationError;
use crate::policy_check::PolicyCheck;

#[derive(Debug, Clone)]
pub struct IdentifierPolicy {
  checks: Vec<PolicyCheck>,
}

impl IdentifierPolicy {
  /// Builds one [`PolicyCheck`] per description, failing on the first
  /// description none of the known checks can handle.
  pub fn build<I, S>(descriptions: I) -> Result<Self, ConfigurationError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let checks = descriptions
      .into_iter()
      .map(|description| PolicyCheck::build(description.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { checks })
  }

  /// Returns true if any configured check allows `identifier`.
  pub fn allow(&self, identifier: &str) -> bool {
    self.checks.iter().any(|check| check.allow(identifier))
  }

  /// Returns true if every configured check denies `identifier`.
  pub fn deny(&self, identifier: &str) -> bool {
    !self.allow(identifier)
  }
}
