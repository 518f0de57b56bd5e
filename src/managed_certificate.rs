//! Parsed, persisted certificate + private key pairs.
//!
//! Constructed once from raw PEM bytes at fetch time and never mutated
//! afterward. Persistence to `work_dir`, when requested, happens eagerly in
//! the constructor rather than lazily on first access.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::CertificateError;

#[derive(Debug, Clone)]
pub struct ManagedCertificate {
  pub cert_pem: String,
  pub key_pem: String,
  pub serial: String,
  pub not_before: DateTime<Utc>,
  pub not_after: DateTime<Utc>,
  pub common_name: String,
  pub identifiers: Vec<String>,
  pub all_names: Vec<String>,
  pub certificate_path: Option<PathBuf>,
  pub private_key_path: Option<PathBuf>,
}

impl ManagedCertificate {
  /// Parses `cert_pem`/`key_pem`, deriving every field from the leaf
  /// certificate, and eagerly persists to `persist_dir` if given.
  pub fn new(persist_dir: Option<&Path>, cert_pem: String, key_pem: String) -> Result<Self, CertificateError> {
    let der_certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|err| CertificateError::Parse(err.to_string()))?;

    let leaf_der = der_certs.first().ok_or(CertificateError::EmptyChain)?;
    let (_, leaf) =
      X509Certificate::from_der(leaf_der).map_err(|err| CertificateError::Parse(err.to_string()))?;

    let serial = leaf.serial.to_str_radix(10);

    let not_before = from_asn1_time(leaf.validity().not_before);
    let not_after = from_asn1_time(leaf.validity().not_after);

    let common_name = leaf
      .subject()
      .iter_common_name()
      .next()
      .and_then(|cn| cn.as_str().ok())
      .map(str::to_string)
      .ok_or(CertificateError::MissingCommonName)?;

    let mut identifiers = dns_names(&leaf);
    identifiers.sort();
    identifiers.dedup();

    let mut all_names = vec![common_name.clone()];
    let mut rest: Vec<String> = identifiers.iter().filter(|name| **name != common_name).cloned().collect();
    rest.sort();
    rest.dedup();
    all_names.extend(rest);

    let (certificate_path, private_key_path) = match persist_dir {
      Some(dir) => {
        let cert_path = dir.join(format!("{serial}.crt"));
        let key_path = dir.join(format!("{serial}.key"));
        persist(&cert_path, cert_pem.as_bytes(), false)?;
        persist(&key_path, key_pem.as_bytes(), true)?;
        (Some(cert_path), Some(key_path))
      }
      None => (None, None),
    };

    Ok(ManagedCertificate {
      cert_pem,
      key_pem,
      serial,
      not_before,
      not_after,
      common_name,
      identifiers,
      all_names,
      certificate_path,
      private_key_path,
    })
  }
}

fn dns_names(cert: &X509Certificate) -> Vec<String> {
  let Ok(Some(san_ext)) = cert.subject_alternative_name() else {
    return Vec::new();
  };
  san_ext
    .value
    .general_names
    .iter()
    .filter_map(|name| match name {
      GeneralName::DNSName(dns) => Some((*dns).to_string()),
      _ => None,
    })
    .collect()
}

fn from_asn1_time(time: x509_parser::time::ASN1Time) -> DateTime<Utc> {
  DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn persist(path: &Path, bytes: &[u8], restrict_permissions: bool) -> Result<(), CertificateError> {
  std::fs::write(path, bytes).map_err(|source| CertificateError::Persist {
    path: path.to_path_buf(),
    source,
  })?;

  #[cfg(unix)]
  if restrict_permissions {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
      CertificateError::Persist {
        path: path.to_path_buf(),
        source,
      }
    })?;
  }
  #[cfg(not(unix))]
  let _ = restrict_permissions;

  Ok(())
}

#[cfg(test)]
mod tests {
  use rcgen::{CertificateParams, DnType, KeyPair};

  use super::*;

  /// Builds a self-signed leaf with the given CN and SAN DNS names, PEM-encoded.
  fn self_signed(common_name: &str, san: &[&str]) -> (String, String) {
    let mut params = CertificateParams::new(san.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
  }

  #[test]
  fn parses_fields_from_leaf_certificate() {
    let (cert_pem, key_pem) = self_signed("example.com", &["example.com", "www.example.com"]);
    let managed = ManagedCertificate::new(None, cert_pem, key_pem).unwrap();
    assert_eq!(managed.common_name, "example.com");
    assert_eq!(managed.all_names[0], managed.common_name);
    assert!(managed.not_before <= managed.not_after);
    assert_eq!(managed.identifiers, vec!["example.com".to_string(), "www.example.com".to_string()]);
  }

  #[test]
  fn persists_to_directory_with_serial_basename() {
    let (cert_pem, key_pem) = self_signed("persist.example.com", &["persist.example.com"]);
    let dir = std::env::temp_dir().join(format!("autocert-managed-cert-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let managed = ManagedCertificate::new(Some(&dir), cert_pem.clone(), key_pem).unwrap();
    let cert_path = managed.certificate_path.unwrap();
    assert_eq!(cert_path.file_name().unwrap().to_str().unwrap(), format!("{}.crt", managed.serial));
    assert_eq!(std::fs::read_to_string(&cert_path).unwrap(), cert_pem);
    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn empty_chain_is_an_error() {
    let (_, key_pem) = self_signed("example.com", &["example.com"]);
    assert!(matches!(
      ManagedCertificate::new(None, String::new(), key_pem),
      Err(CertificateError::Parse(_)) | Err(CertificateError::EmptyChain)
    ));
  }
}
