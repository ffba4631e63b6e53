//! Authenticated HTTP client for the software factory (LogJuicer, weeder).

use std::{path::Path, time::Duration};

use reqwest::{
    Certificate, RequestBuilder,
    header::{COOKIE, HeaderMap, HeaderValue},
};
use tracing::{info, instrument, warn};

use crate::base::{config::Config, types::Res};

/// The name of the OIDC session cookie.
pub const SESSION_COOKIE: &str = "mod_auth_openidc_session";

/// Cookie files older than this are ignored.
const COOKIE_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// HTTP client for the software factory.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct SfClient {
    http: reqwest::Client,
    base_url: String,
}

impl SfClient {
    /// Create a new client, restoring the session cookie from the configuration.
    #[instrument(name = "SfClient::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let cookie = match (&config.sf_cookie, &config.cookie_file) {
            (Some(cookie), _) => Some(cookie.clone()),
            (None, Some(path)) => read_cookie_file(path),
            (None, None) => None,
        };

        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            info!("Using the software factory session cookie.");
            headers.insert(COOKIE, HeaderValue::from_str(&format!("{SESSION_COOKIE}={cookie}"))?);
        } else {
            warn!("No software factory session cookie configured, requests are not authenticated.");
        }

        let http = http_client_builder(config)?.default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: config.sf_base().to_string(),
        })
    }

    /// The software factory URL, without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// An absolute URL for a software factory path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.http.put(self.url(path))
    }
}

/// A `reqwest` builder using the configured CA bundle.
pub fn http_client_builder(config: &Config) -> Res<reqwest::ClientBuilder> {
    let mut builder = reqwest::Client::builder().user_agent(concat!("rcav2/", env!("CARGO_PKG_VERSION")));

    if let Some(path) = &config.ca_bundle_path {
        if path.exists() {
            let pem = std::fs::read(path)?;
            for cert in Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(cert);
            }
        } else {
            warn!("CA bundle `{}` does not exist, using the system roots.", path.display());
        }
    }

    Ok(builder)
}

/// Read the session cookie, unless the file is too old.
fn read_cookie_file(path: &Path) -> Option<String> {
    let metadata = std::fs::metadata(path).ok()?;
    let age = metadata.modified().ok()?.elapsed().unwrap_or_default();

    if age > COOKIE_MAX_AGE {
        warn!("Ignoring the expired cookie file `{}`.", path.display());
        return None;
    }

    let cookie = std::fs::read_to_string(path).ok()?;
    let cookie = cookie.trim();

    (!cookie.is_empty()).then(|| cookie.to_string())
}
