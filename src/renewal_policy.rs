//! Pure function deciding whether a [`ManagedCertificate`] must be renewed.
//!
//! `renew_after` is the minimum of three candidate timestamps (seconds
//! before expiry, a fraction of the validity span, and a one-day fallback),
//! each clamped to the certificate's own validity window, plus the
//! certificate's `not_after` as an ultimate ceiling. Taking the minimum
//! makes renewal eager: whichever rule fires first wins.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::managed_certificate::ManagedCertificate;

/// One day, used as the fallback rule regardless of the configured
/// `renew_before_seconds`.
const FALLBACK_RENEW_BEFORE_SECONDS: i64 = 86_400;

pub fn needs_renewal(cert: &ManagedCertificate, now: DateTime<Utc>, renew_before_seconds: i64, renew_before_fraction: f64) -> bool {
  let renew_after = renew_after(cert, renew_before_seconds, renew_before_fraction);
  now > renew_after
}

fn renew_after(cert: &ManagedCertificate, renew_before_seconds: i64, renew_before_fraction: f64) -> DateTime<Utc> {
  let mut candidates = vec![cert.not_after];

  if let Some(seconds_rule) = renew_after_from_seconds(cert, renew_before_seconds) {
    candidates.push(seconds_rule);
  }
  if let Some(fraction_rule) = renew_after_from_fraction(cert, renew_before_fraction) {
    candidates.push(fraction_rule);
  }
  if let Some(fallback_rule) = renew_after_from_seconds(cert, FALLBACK_RENEW_BEFORE_SECONDS) {
    candidates.push(fallback_rule);
  }

  candidates.into_iter().min().expect("not_after is always a candidate")
}

fn renew_after_from_seconds(cert: &ManagedCertificate, before_seconds: i64) -> Option<DateTime<Utc>> {
  let candidate = cert.not_after - ChronoDuration::seconds(before_seconds);
  (cert.not_before..=cert.not_after).contains(&candidate).then_some(candidate)
}

fn renew_after_from_fraction(cert: &ManagedCertificate, before_fraction: f64) -> Option<DateTime<Utc>> {
  if !(0.0..=1.0).contains(&before_fraction) {
    return None;
  }
  let span_seconds = (cert.not_after - cert.not_before).num_seconds();
  let before_seconds = (span_seconds as f64 * before_fraction).floor() as i64;
  renew_after_from_seconds(cert, before_seconds)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn cert_with_validity(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> ManagedCertificate {
    ManagedCertificate {
      cert_pem: String::new(),
      key_pem: String::new(),
      serial: "1".to_string(),
      not_before,
      not_after,
      common_name: "example.com".to_string(),
      identifiers: vec!["example.com".to_string()],
      all_names: vec!["example.com".to_string()],
      certificate_path: None,
      private_key_path: None,
    }
  }

  // Scenario 6 from the renewal-policy contract.
  #[test]
  fn literal_scenario_fourteen_days_before_expiry() {
    let not_before = Utc.with_ymd_and_hms(2023, 9, 6, 22, 59, 3).unwrap();
    let not_after = Utc.with_ymd_and_hms(2023, 10, 4, 22, 59, 2).unwrap();
    let cert = cert_with_validity(not_before, not_after);
    let renew_before_seconds = 14 * 86_400;

    assert!(needs_renewal(&cert, not_after - ChronoDuration::days(10), renew_before_seconds, 0.5));
    assert!(!needs_renewal(&cert, not_before + ChronoDuration::days(2), renew_before_seconds, 0.5));
  }

  #[test]
  fn always_needs_renewal_once_expired() {
    let not_before = Utc::now() - ChronoDuration::days(30);
    let not_after = Utc::now() - ChronoDuration::days(1);
    let cert = cert_with_validity(not_before, not_after);
    assert!(needs_renewal(&cert, not_after + ChronoDuration::seconds(1), 86_400, 0.5));
  }

  #[test]
  fn does_not_renew_far_from_expiry_with_narrow_rules() {
    let not_before = Utc::now();
    let not_after = not_before + ChronoDuration::days(90);
    let cert = cert_with_validity(not_before, not_after);
    assert!(!needs_renewal(&cert, not_before, 3600, 0.1));
  }
}
