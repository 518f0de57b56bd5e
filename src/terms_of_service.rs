//! Terms-of-service acceptance predicates.
//!
//! The original implementation modeled acceptors as an open `Acceptor`
//! subclass hierarchy (`AnyAcceptor`, `RegexAcceptor`, and callers building
//! their own ad-hoc exact-match acceptor). The set is closed here, with an
//! explicit `Explicit` variant for the exact-URL case.

use fancy_regex::Regex;

#[derive(Debug, Clone)]
pub enum TosAcceptor {
  /// Accepts any URL, including an absent one.
  Any,
  /// Accepts a URL iff it matches an anchored regex pattern.
  Regex { pattern: Regex },
  /// Accepts a URL iff it equals a stored expected URL, or if `agreed` is
  /// already true (used when an operator has accepted out of band).
  Explicit { expected_url: Option<String>, agreed: bool },
}

impl TosAcceptor {
  pub fn any() -> Self {
    TosAcceptor::Any
  }

  pub fn regex(pattern: &str) -> Result<Self, fancy_regex::Error> {
    Ok(TosAcceptor::Regex {
      pattern: Regex::new(pattern)?,
    })
  }

  pub fn explicit(expected_url: Option<String>, agreed: bool) -> Self {
    TosAcceptor::Explicit { expected_url, agreed }
  }

  /// Returns true if this acceptor accepts `tos_url`.
  pub fn accept(&self, tos_url: Option<&str>) -> bool {
    match self {
      TosAcceptor::Any => true,
      TosAcceptor::Regex { pattern } => tos_url.is_some_and(|url| pattern.is_match(url).unwrap_or(false)),
      TosAcceptor::Explicit { expected_url, agreed } => {
        *agreed || matches!((expected_url.as_deref(), tos_url), (Some(expected), Some(url)) if expected == url)
      }
    }
  }
}

/// Returns true if `acceptors` considers `tos_url` agreed: an absent URL is
/// always agreed, otherwise at least one acceptor must accept it.
pub fn terms_of_service_agreed(acceptors: &[TosAcceptor], tos_url: Option<&str>) -> bool {
  if tos_url.is_none() {
    return true;
  }
  acceptors.iter().any(|acceptor| acceptor.accept(tos_url))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn any_accepts_everything() {
    let acceptor = TosAcceptor::any();
    assert!(acceptor.accept(Some("https://example.com/tos")));
    assert!(acceptor.accept(None));
  }

  #[test]
  fn regex_requires_anchored_match() {
    let acceptor = TosAcceptor::regex(r"^https://example\.com/tos/v\d+$").unwrap();
    assert!(acceptor.accept(Some("https://example.com/tos/v2")));
    assert!(!acceptor.accept(Some("https://evil.example.com/tos/v2")));
    assert!(!acceptor.accept(None));
  }

  #[test]
  fn explicit_matches_expected_url_or_pre_agreed_flag() {
    let acceptor = TosAcceptor::explicit(Some("https://example.com/tos".to_string()), false);
    assert!(acceptor.accept(Some("https://example.com/tos")));
    assert!(!acceptor.accept(Some("https://example.com/tos/v2")));

    let pre_agreed = TosAcceptor::explicit(None, true);
    assert!(pre_agreed.accept(Some("https://anything")));
  }

  #[test]
  fn absent_directory_url_is_always_agreed() {
    assert!(terms_of_service_agreed(&[], None));
  }

  #[test]
  fn agreed_if_any_acceptor_accepts() {
    let acceptors = vec![
      TosAcceptor::regex(r"^https://nomatch$").unwrap(),
      TosAcceptor::any(),
    ];
    assert!(terms_of_service_agreed(&acceptors, Some("https://example.com/tos")));
  }
}
