use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use url::Url;

use super::types::{ProbeErrorKind, ProbeResult};

/// Fixed client identification. Some targets reject requests without a
/// browser-like User-Agent; this is a compatibility policy, not a trust
/// mechanism.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Upper bound on connection setup, on top of the total request timeout.
const CONNECT_MARGIN: Duration = Duration::from_secs(5);

/// Performs exactly one check of one URL. Trait seam so scheduler tests can
/// inject a scripted prober instead of touching the network.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build the shared client once; `timeout` bounds the whole request,
    /// redirects included.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_MARGIN))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        let started = Instant::now();

        if let Err(reason) = validate_target_url(url) {
            return ProbeResult::down_error(ProbeErrorKind::InvalidUrl, reason, started.elapsed());
        }

        match self.client.get(url).send().await {
            Ok(response) => {
                let latency = started.elapsed();
                let code = response.status().as_u16();
                if (200..400).contains(&code) {
                    ProbeResult::up(code, latency)
                } else {
                    ProbeResult::down_status(code, latency)
                }
            }
            Err(error) => {
                let latency = started.elapsed();
                ProbeResult::down_error(classify(&error), root_cause(&error), latency)
            }
        }
    }
}

/// Reject unparseable or non-http(s) targets before any network I/O.
fn validate_target_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme {other:?}")),
    }
}

/// Map a transport failure onto the stored error categories. reqwest keeps
/// the interesting detail in the error source chain, so classification walks
/// the chain text rather than the top-level message, which embeds the URL.
fn classify(error: &reqwest::Error) -> ProbeErrorKind {
    if error.is_timeout() {
        return ProbeErrorKind::Timeout;
    }
    let chain = source_chain_text(error);
    if chain.contains("dns") || chain.contains("failed to lookup") {
        ProbeErrorKind::Dns
    } else if chain.contains("certificate")
        || chain.contains("handshake")
        || chain.contains("tls")
        || chain.contains("ssl")
    {
        ProbeErrorKind::Tls
    } else if error.is_connect() {
        ProbeErrorKind::Connection
    } else {
        ProbeErrorKind::Request
    }
}

fn source_chain_text(error: &reqwest::Error) -> String {
    let mut text = String::new();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push_str(&cause.to_string());
        text.push(' ');
        source = cause.source();
    }
    text.to_ascii_lowercase()
}

fn root_cause(error: &reqwest::Error) -> String {
    let mut cause: &dyn std::error::Error = error;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}
