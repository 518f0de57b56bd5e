//! Single-predicate identifier checks.
//!
//! The original implementation modeled these as an open class hierarchy with
//! a `handles(description)` classmethod on each subclass. Since the set of
//! checks is fixed and closed, it is recast here as a single enum with one
//! variant per check, dispatched through [`PolicyCheck::build`].

use std::net::IpAddr;
use std::sync::LazyLock;

use cidr::{Cidr, IpCidr};
use fancy_regex::Regex;

use crate::error::ConfigurationError;

const DOMAIN_LABEL: &str = "[a-zA-Z0-9][-a-zA-Z0-9]*[a-zA-Z0-9]";

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(&format!(
    "^(?:{DOMAIN_LABEL}\\.)+[a-zA-Z][-a-zA-Z0-9]*[a-zA-Z0-9]$"
  ))
  .expect("hostname regex is valid")
});

static DOMAIN_LABEL_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(&format!("^{DOMAIN_LABEL}$")).expect("domain label regex is valid"));

/// Returns true if `description` matches the `label(.label)+.tld` grammar
/// used for exact hostnames.
fn is_exact_hostname(description: &str) -> bool {
  HOSTNAME_RE.is_match(description).unwrap_or(false)
}

/// A single identifier policy check, built from one textual description.
///
/// Dispatch order when building from a description is fixed: IP/CIDR is
/// tried first, because e.g. `192.168.1.0/24` would otherwise also be
/// rejected-but-not-quite-matched by the hostname grammar in confusing ways.
#[derive(Debug, Clone)]
pub enum PolicyCheck {
  /// Exact (non-wildcard) hostname match, case-insensitive.
  Host { hostname: String },
  /// `*.suffix` wildcard hostname match.
  Wildcard { suffix: String },
  /// IP address or CIDR network match, v4 or v6.
  IpNetwork { network: IpCidr },
}

impl PolicyCheck {
  /// Builds the policy check that handles `description`, or fails if none
  /// of the known checks can handle it.
  pub fn build(description: &str) -> Result<Self, ConfigurationError> {
    if let Some(check) = Self::try_ip_network(description) {
      return Ok(check);
    }
    if let Some(check) = Self::try_wildcard(description) {
      return Ok(check);
    }
    if let Some(check) = Self::try_host(description) {
      return Ok(check);
    }
    Err(ConfigurationError::PolicyBuild(description.to_string()))
  }

  fn try_host(description: &str) -> Option<Self> {
    is_exact_hostname(description).then(|| PolicyCheck::Host {
      hostname: description.to_lowercase(),
    })
  }

  fn try_wildcard(description: &str) -> Option<Self> {
    let suffix = description.strip_prefix("*.")?;
    is_exact_hostname(suffix).then(|| PolicyCheck::Wildcard {
      suffix: suffix.to_lowercase(),
    })
  }

  fn try_ip_network(description: &str) -> Option<Self> {
    description.parse::<IpCidr>().ok().map(|network| PolicyCheck::IpNetwork { network })
  }

  /// Returns true if `identifier` is allowed by this single check.
  pub fn allow(&self, identifier: &str) -> bool {
    match self {
      PolicyCheck::Host { hostname } => identifier.to_lowercase() == *hostname,
      PolicyCheck::Wildcard { suffix } => Self::allow_wildcard(suffix, identifier),
      PolicyCheck::IpNetwork { network } => Self::allow_ip_network(network, identifier),
    }
  }

  /// Returns true if `identifier` is denied by this single check.
  pub fn deny(&self, identifier: &str) -> bool {
    !self.allow(identifier)
  }

  fn allow_wildcard(suffix: &str, identifier: &str) -> bool {
    let Some((prefix, domain)) = identifier.split_once('.') else {
      return false;
    };

    // A literal `*` label is permitted as an identifier, matching the
    // original implementation's (unusual but preserved) behavior.
    let prefix_ok = prefix == "*" || DOMAIN_LABEL_RE.is_match(prefix).unwrap_or(false);

    prefix_ok && domain.to_lowercase() == suffix
  }

  fn allow_ip_network(network: &IpCidr, identifier: &str) -> bool {
    let parsed: Result<IpCidr, _> = identifier.parse();
    let parsed = match parsed {
      Ok(cidr) => cidr,
      Err(_) => match identifier.parse::<IpAddr>() {
        Ok(addr) => IpCidr::new_host(addr),
        Err(_) => return false,
      },
    };
    network_overlaps(network, &parsed)
  }
}

fn network_overlaps(a: &IpCidr, b: &IpCidr) -> bool {
  // `cidr::IpCidr` doesn't expose `overlaps` directly; two networks overlap
  // iff either one's first address falls within the other.
  a.contains(&b.first_address()) || b.contains(&a.first_address())
}
