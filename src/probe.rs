use crate::errors::ProbeError;
use async_trait::async_trait;
use log::debug;
use std::env;
use std::time::Duration;
use url::Url;

/// One fine lookup against the remote source. Implementations own
/// their timeout; a call must never hang the cycle.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn check(&self, plate_number: &str) -> Result<bool, ProbeError>;
}

const DEFAULT_FINES_URL: &str = "http://localhost:8999/fines";
const DEFAULT_FOUND_MARKER: &str = "fine-results";
const DEFAULT_CLEAR_MARKER: &str = "no-fines-found";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Probes the fines inquiry page over HTTP and classifies the response
/// body by marker substrings. The markers default to the page's result
/// container ids and can be overridden when the site changes.
pub struct SiteProbe {
    client: reqwest::Client,
    base_url: String,
    found_marker: String,
    clear_marker: String,
}

impl SiteProbe {
    pub fn from_env() -> SiteProbe {
        let timeout = env::var("PROBE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        SiteProbe {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout))
                .build()
                .expect("Unable to build probe HTTP client"),
            base_url: env::var("FINES_URL").unwrap_or_else(|_| DEFAULT_FINES_URL.to_string()),
            found_marker: env::var("FOUND_MARKER")
                .unwrap_or_else(|_| DEFAULT_FOUND_MARKER.to_string()),
            clear_marker: env::var("CLEAR_MARKER")
                .unwrap_or_else(|_| DEFAULT_CLEAR_MARKER.to_string()),
        }
    }
}

/// The "no fines" marker wins if the page somehow carries both, since
/// the empty-result template embeds more boilerplate than the hit list.
fn classify(body: &str, found_marker: &str, clear_marker: &str) -> Option<bool> {
    if body.contains(clear_marker) {
        Some(false)
    } else if body.contains(found_marker) {
        Some(true)
    } else {
        None
    }
}

#[async_trait]
impl ProbeClient for SiteProbe {
    async fn check(&self, plate_number: &str) -> Result<bool, ProbeError> {
        let url = Url::parse_with_params(&self.base_url, &[("plate", plate_number)])
            .map_err(|e| ProbeError(format!("bad fines URL: {}", e)))?;
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError(format!("fetch failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ProbeError(format!(
                "fines page returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError(format!("unreadable response: {}", e)))?;
        classify(&body, &self.found_marker, &self.clear_marker)
            .ok_or_else(|| ProbeError("page matched no known layout".to_string()))
    }
}
