//! Browser fingerprint shaping
//!
//! Each proxy client is pinned to one browser identity at construction:
//! the TLS ClientHello is shaped to that browser's preferences and the
//! plaintext headers sent with every request match it. Upstream
//! fingerprinting correlates the two, so they must never disagree.

use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL,
    CONNECTION, DNT, TE, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

/// Browser families the dialer can impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl Browser {
    pub const ALL: [Browser; 4] = [
        Browser::Chrome,
        Browser::Firefox,
        Browser::Safari,
        Browser::Edge,
    ];

    /// Pick a browser at random; called once per dialer construction.
    pub fn random() -> Self {
        Self::ALL[rand::thread_rng().gen_range(0..Self::ALL.len())]
    }

    /// Current-release user agents for this family.
    pub fn user_agents(&self) -> &'static [&'static str] {
        match self {
            Browser::Chrome => &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
            ],
            Browser::Firefox => &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
                "Mozilla/5.0 (X11; Linux x86_64; rv:122.0) Gecko/20100101 Firefox/122.0",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
            ],
            Browser::Safari => &[
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
            ],
            Browser::Edge => &[
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.2277.128",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.2365.66",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.2365.80",
            ],
        }
    }
}

/// Accept-Language values sampled per request.
pub const ACCEPT_LANGUAGES: [&str; 8] = [
    "en-US,en;q=0.9",
    "en-US,en;q=0.8",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "en-CA,en;q=0.9,fr-CA;q=0.8",
    "fr-FR,fr;q=0.9,en;q=0.8",
    "de-DE,de;q=0.9,en;q=0.8",
    "es-ES,es;q=0.9,en;q=0.8",
    "it-IT,it;q=0.9,en;q=0.8",
];

const ACCEPT_ENCODINGS: [&str; 3] = ["gzip, deflate, br", "gzip, deflate", "br, gzip, deflate"];

const CACHE_CONTROLS: [&str; 3] = ["max-age=0", "no-cache", "max-age=0, private, must-revalidate"];

const ACCEPT_CHROMIUM: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const ACCEPT_FIREFOX: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_SAFARI: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

fn pick(rng: &mut impl Rng, items: &[&'static str]) -> &'static str {
    items[rng.gen_range(0..items.len())]
}

/// Injects randomized browser-shaped headers.
///
/// The user agent resolution order is: an already-present header wins,
/// then the per-browser pool when randomization is on, then the fixed
/// configured agent.
#[derive(Debug, Clone)]
pub struct HeaderShaper {
    fixed_agent: String,
    randomize: bool,
}

impl HeaderShaper {
    pub fn new(fixed_agent: String, randomize: bool) -> Self {
        HeaderShaper {
            fixed_agent,
            randomize,
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap, browser: Browser) {
        let mut rng = rand::thread_rng();

        if !headers.contains_key(USER_AGENT) {
            let agent = if self.randomize || self.fixed_agent.is_empty() {
                HeaderValue::from_static(pick(&mut rng, browser.user_agents()))
            } else {
                HeaderValue::from_str(&self.fixed_agent)
                    .unwrap_or_else(|_| HeaderValue::from_static(pick(&mut rng, browser.user_agents())))
            };
            headers.insert(USER_AGENT, agent);
        }

        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(pick(&mut rng, &ACCEPT_LANGUAGES)),
        );
        headers.insert(
            ACCEPT_ENCODING,
            HeaderValue::from_static(pick(&mut rng, &ACCEPT_ENCODINGS)),
        );

        if rng.gen_range(0..10) > 2 {
            headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static(pick(&mut rng, &CACHE_CONTROLS)),
            );
        }

        if rng.gen_range(0..10) > 3 {
            let dnt = if rng.gen_bool(0.5) { "1" } else { "2" };
            headers.insert(DNT, HeaderValue::from_static(dnt));
        }

        match browser {
            Browser::Chrome | Browser::Edge => {
                headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_CHROMIUM));

                if rng.gen_range(0..10) > 2 {
                    headers.insert(
                        HeaderName::from_static("sec-fetch-dest"),
                        HeaderValue::from_static("document"),
                    );
                    headers.insert(
                        HeaderName::from_static("sec-fetch-mode"),
                        HeaderValue::from_static("navigate"),
                    );
                    headers.insert(
                        HeaderName::from_static("sec-fetch-site"),
                        HeaderValue::from_static("none"),
                    );
                    if rng.gen_range(0..10) > 3 {
                        headers.insert(
                            HeaderName::from_static("sec-fetch-user"),
                            HeaderValue::from_static("?1"),
                        );
                    }
                }
            }
            Browser::Firefox => {
                headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_FIREFOX));
                if rng.gen_range(0..10) > 2 {
                    headers.insert(TE, HeaderValue::from_static("trailers"));
                }
            }
            Browser::Safari => {
                headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_SAFARI));
                if rng.gen_range(0..10) > 2 {
                    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
                }
            }
        }

        if rng.gen_range(0..10) > 0 {
            headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        }

        let connection = if rng.gen_bool(0.5) { "keep-alive" } else { "close" };
        headers.insert(CONNECTION, HeaderValue::from_static(connection));
    }
}

/// Build a TLS client configuration shaped to the given browser.
///
/// rustls owns the ClientHello extension layout, so the shaping covers
/// what it exposes: protocol versions, cipher-suite preference order
/// (Firefox leads with ChaCha20, the Chromium family and Safari with
/// AES-128-GCM), and an HTTP/1.1-only ALPN matching the transport.
pub fn tls_config(browser: Browser) -> Result<rustls::ClientConfig, rustls::Error> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut provider = rustls::crypto::ring::default_provider();
    let preferred = match browser {
        Browser::Firefox => rustls::CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
        _ => rustls::CipherSuite::TLS13_AES_128_GCM_SHA256,
    };
    provider
        .cipher_suites
        .sort_by_key(|s| if s.suite() == preferred { 0 } else { 1 });

    let mut config = rustls::ClientConfig::builder_with_provider(provider.into())
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_root_certificates(roots)
        .with_no_client_auth();

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
