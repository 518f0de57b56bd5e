//! The ACME protocol collaborator.
//!
//! This module is the one place the "external collaborator" named in the
//! component design — the ACME client itself — is given a concrete shape.
//! [`AcmeClient`] is the contract the Manager depends on; [`InstantAcmeClient`]
//! is the adapter backed by the real ACME implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use instant_acme::{
  Account, AuthorizationStatus, BodyWrapper, BytesResponse, ChallengeType, ExternalAccountKey, HttpClient,
  Identifier, NewAccount, NewOrder, OrderStatus, RetryPolicy,
};
use rustls::ClientConfig;
use tokio::sync::RwLock;

use crate::configuration::ExternalAccountBinding;
use crate::logging::ErrorLogger;

const USER_AGENT: &str = concat!("autocert-manager/", env!("CARGO_PKG_VERSION"));

/// A request to provision a full certificate chain for a set of identifiers.
pub struct ProvisionRequest {
  pub directory_url: String,
  pub identifiers: Vec<String>,
  pub contact: Option<String>,
  pub external_account_binding: Option<ExternalAccountBinding>,
  pub terms_of_service_agreed: bool,
  /// A previously cached account, if any, serialized by this same client.
  pub cached_account: Option<Vec<u8>>,
  pub finalize_deadline: Duration,
}

/// The provisioned certificate, the fresh certificate private key, and the
/// account state to cache for next time.
pub struct ProvisionedCertificate {
  pub cert_pem: String,
  pub key_pem: String,
  pub account_to_cache: Vec<u8>,
}

#[async_trait]
pub trait AcmeClient: Send + Sync {
  /// Fetches the directory and returns its advertised terms-of-service URL,
  /// or `None` if the directory advertises none.
  async fn fetch_terms_of_service(&self, directory_url: &str) -> anyhow::Result<Option<String>>;

  /// Runs the full order → authorize → challenge → finalize → download
  /// cycle and returns the resulting certificate chain and key.
  async fn provision(&self, request: ProvisionRequest) -> anyhow::Result<ProvisionedCertificate>;
}

/// [`AcmeClient`] backed by the real ACME wire protocol, using HTTP-01 as the
/// challenge type. Challenge tokens are published through
/// [`InstantAcmeClient::http01_challenge`] for an HTTP server to serve.
pub struct InstantAcmeClient {
  rustls_client_config: ClientConfig,
  http01_challenge: Arc<RwLock<Option<(String, String)>>>,
  logger: ErrorLogger,
}

impl InstantAcmeClient {
  pub fn new(rustls_client_config: ClientConfig, logger: ErrorLogger) -> Self {
    Self {
      rustls_client_config,
      http01_challenge: Arc::new(RwLock::new(None)),
      logger,
    }
  }

  /// The pending HTTP-01 challenge `(token, key_authorization)`, if any.
  pub async fn http01_challenge(&self) -> Option<(String, String)> {
    self.http01_challenge.read().await.clone()
  }
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
  async fn fetch_terms_of_service(&self, directory_url: &str) -> anyhow::Result<Option<String>> {
    let client = HyperClient::builder(TokioExecutor::new()).build(
      hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(self.rustls_client_config.clone())
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build(),
    );
    let request = Request::get(directory_url)
      .header("user-agent", USER_AGENT)
      .body(Empty::<Bytes>::new())?;
    let response = client.request(request).await?;
    let body = response.into_body().collect().await?.to_bytes();
    let directory: serde_json::Value = serde_json::from_slice(&body)?;
    Ok(
      directory
        .get("meta")
        .and_then(|meta| meta.get("termsOfService"))
        .and_then(|tos| tos.as_str())
        .map(str::to_string),
    )
  }

  async fn provision(&self, request: ProvisionRequest) -> anyhow::Result<ProvisionedCertificate> {
    let account_builder = Account::builder_with_http(Box::new(HttpsClient::new(self.rustls_client_config.clone())));

    let eab_key = request
      .external_account_binding
      .as_ref()
      .map(|eab| -> anyhow::Result<ExternalAccountKey> {
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
          .decode(eab.hmac_key.trim_end_matches('='))
          .map_err(|err| anyhow::anyhow!("invalid external account binding HMAC key: {err}"))?;
        Ok(ExternalAccountKey::new(eab.key_id.clone(), &decoded))
      })
      .transpose()?;

    let (account, account_to_cache) = if let Some(cached) = &request.cached_account {
      let credentials = serde_json::from_slice(cached)?;
      let account = account_builder.from_credentials(credentials).await?;
      (account, cached.clone())
    } else {
      let contact = request.contact.as_deref().map(|c| format!("mailto:{c}"));
      let contact_slice = contact.as_deref().map(std::slice::from_ref).unwrap_or(&[]);
      let (account, credentials) = account_builder
        .create(
          &NewAccount {
            contact: contact_slice,
            terms_of_service_agreed: request.terms_of_service_agreed,
            only_return_existing: false,
          },
          request.directory_url.clone(),
          eab_key.as_ref(),
        )
        .await?;
      self
        .logger
        .info(&format!("created ACME account for directory {}", request.directory_url))
        .await;
      (account, serde_json::to_vec(&credentials)?)
    };

    let identifiers = request
      .identifiers
      .iter()
      .map(|id| Identifier::Dns(id.clone()))
      .collect::<Vec<_>>();

    let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

    let mut authorizations = order.authorizations();
    while let Some(authorization) = authorizations.next().await {
      let mut authorization = authorization?;
      match authorization.status {
        AuthorizationStatus::Pending => {}
        AuthorizationStatus::Valid => continue,
        _ => anyhow::bail!("ACME authorization in unexpected status: {:?}", authorization.status),
      }

      let mut challenge = authorization
        .challenge(ChallengeType::Http01)
        .ok_or_else(|| anyhow::anyhow!("ACME server does not offer an HTTP-01 challenge"))?;

      let key_authorization = challenge.key_authorization();
      *self.http01_challenge.write().await = Some((challenge.token.clone(), key_authorization.as_str().to_string()));

      challenge.set_ready().await?;
    }

    let status = order.poll_ready(&RetryPolicy::default()).await?;
    if status != OrderStatus::Ready {
      anyhow::bail!("ACME order did not reach Ready status: {status:?}");
    }

    let key_pem = tokio::time::timeout(request.finalize_deadline, order.finalize()).await??;
    let cert_pem = tokio::time::timeout(request.finalize_deadline, order.poll_certificate(&RetryPolicy::default())).await??;

    *self.http01_challenge.write().await = None;

    Ok(ProvisionedCertificate {
      cert_pem,
      key_pem,
      account_to_cache,
    })
  }
}

struct HttpsClient(HyperClient<hyper_rustls::HttpsConnector<HttpConnector>, BodyWrapper<Bytes>>);

impl HttpsClient {
  fn new(tls_config: ClientConfig) -> Self {
    Self(
      HyperClient::builder(TokioExecutor::new()).build(
        hyper_rustls::HttpsConnectorBuilder::new()
          .with_tls_config(tls_config)
          .https_or_http()
          .enable_http1()
          .enable_http2()
          .build(),
      ),
    )
  }
}

impl HttpClient for HttpsClient {
  fn request(
    &self,
    req: Request<BodyWrapper<Bytes>>,
  ) -> Pin<Box<dyn Future<Output = Result<BytesResponse, instant_acme::Error>> + Send>> {
    HttpClient::request(&self.0, req)
  }
}
