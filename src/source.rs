// File: ./src/source.rs
// Prayer-time lookup over HTTP, normalized into validated clock values.
use crate::clock;
use crate::config::Config;
use crate::error::PrayerError;
use crate::model::{PrayerTimes, School};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use http::{Request, Uri, header};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::time::Duration;

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct TimingsQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub method: u32,
    pub school: School,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub times: PrayerTimes,
    /// IANA identifier for the queried coordinates.
    pub timezone: String,
}

/// External prayer-time lookup.
#[async_trait]
pub trait PrayerTimeSource: Send + Sync {
    /// Issues exactly one request for `query`.
    async fn fetch_times(&self, query: &TimingsQuery) -> Result<Timings, PrayerError>;
}

/// Client for the AlAdhan `timings` endpoint.
#[derive(Clone)]
pub struct AladhanClient {
    client: HttpsClient,
    base_url: String,
    timeout: Duration,
}

impl AladhanClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PrayerError> {
        base_url
            .parse::<Uri>()
            .map_err(|e| PrayerError::SourceUnavailable(format!("bad base url: {}", e)))?;

        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(Self::tls_config())
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https_connector);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PrayerError> {
        Self::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn tls_config() -> rustls::ClientConfig {
        let mut root_store = rustls::RootCertStore::empty();

        #[cfg(not(target_os = "android"))]
        {
            let result = rustls_native_certs::load_native_certs();
            for e in &result.errors {
                log::debug!("Skipping unreadable system certificate: {}", e);
            }
            root_store.add_parsable_certificates(result.certs);
        }

        #[cfg(target_os = "android")]
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if root_store.is_empty() {
            log::warn!("No trusted root certificates found; HTTPS lookups will fail");
        }

        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    }

    pub fn timings_uri(&self, query: &TimingsQuery) -> Result<Uri, PrayerError> {
        let url = format!(
            "{}/timings/{}?latitude={}&longitude={}&method={}&school={}",
            self.base_url,
            query.date.format("%d-%m-%Y"),
            query.latitude,
            query.longitude,
            query.method,
            query.school.id()
        );
        url.parse::<Uri>()
            .map_err(|e| PrayerError::SourceUnavailable(format!("bad request url: {}", e)))
    }

    async fn get_body(&self, uri: Uri) -> Result<Vec<u8>, PrayerError> {
        let req = Request::get(uri)
            .header(header::ACCEPT, "application/json")
            .header(
                header::USER_AGENT,
                concat!("waqt/", env!("CARGO_PKG_VERSION")),
            )
            .body(String::new())
            .map_err(|e| PrayerError::SourceUnavailable(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| PrayerError::SourceUnavailable(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PrayerError::SourceUnavailable(format!("HTTP {}", status)));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| PrayerError::SourceUnavailable(format!("reading body: {}", e)))?
            .to_bytes();
        Ok(body.to_vec())
    }
}

#[async_trait]
impl PrayerTimeSource for AladhanClient {
    async fn fetch_times(&self, query: &TimingsQuery) -> Result<Timings, PrayerError> {
        let uri = self.timings_uri(query)?;
        log::debug!("Fetching prayer times: {}", uri);

        let body = tokio::time::timeout(self.timeout, self.get_body(uri))
            .await
            .map_err(|_| {
                PrayerError::SourceUnavailable(format!(
                    "no answer within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        parse_timings_response(&body)
    }
}

/// Validates a lookup response body.
///
/// A non-200 application `code` is a `SourceUnavailable`; anything missing or
/// malformed is `SourceDataInvalid`.
pub fn parse_timings_response(body: &[u8]) -> Result<Timings, PrayerError> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| PrayerError::SourceDataInvalid(format!("body is not JSON: {}", e)))?;

    let code = json.get("code").and_then(Value::as_i64);
    if code != Some(200) {
        let status = json
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown status");
        let detail = json.get("data").and_then(Value::as_str).unwrap_or("");
        return Err(PrayerError::SourceUnavailable(format!(
            "lookup answered {} {} {}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            status,
            detail
        )
        .trim_end()
        .to_string()));
    }

    let timings = json
        .pointer("/data/timings")
        .and_then(Value::as_object)
        .ok_or_else(|| PrayerError::SourceDataInvalid("missing data.timings".to_string()))?;

    let times = PrayerTimes::try_from_fn(|prayer| {
        let raw = timings
            .get(prayer.as_ref())
            .and_then(Value::as_str)
            .ok_or_else(|| PrayerError::SourceDataInvalid(format!("missing {}", prayer)))?;
        clock::normalize_clock(raw).map_err(|e| {
            PrayerError::SourceDataInvalid(format!("{} value '{}': {}", prayer, raw, e))
        })
    })?;

    let timezone = json
        .pointer("/data/meta/timezone")
        .and_then(Value::as_str)
        .filter(|tz| !tz.is_empty())
        .ok_or_else(|| PrayerError::SourceDataInvalid("missing data.meta.timezone".to_string()))?;
    if timezone.parse::<Tz>().is_err() {
        return Err(PrayerError::SourceDataInvalid(format!(
            "unknown time zone '{}'",
            timezone
        )));
    }

    Ok(Timings {
        times,
        timezone: timezone.to_string(),
    })
}
