use std::future::Future;

use colored::*;
use encoding_rs::{Encoding, SHIFT_JIS};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::FetchConfig;
use crate::error::FetchError;

/// Raw page bytes and the charset the server declared for them.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub bytes: Vec<u8>,
    pub declared_encoding: Option<String>,
}

impl FetchedPage {
    /// Encoding used to decode the page. Pages without a charset, or with
    /// the HTTP default ISO-8859-1, are Shift_JIS.
    pub fn encoding(&self) -> &'static Encoding {
        self.declared_encoding
            .as_deref()
            .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
            .filter(|encoding| encoding.name() != "windows-1252")
            .unwrap_or(SHIFT_JIS)
    }

    pub fn decode(&self) -> String {
        let encoding = self.encoding();
        let (text, _, malformed) = encoding.decode(&self.bytes);
        if malformed {
            debug!("Page contained bytes invalid in {}", encoding.name());
        }
        text.into_owned()
    }
}

/// Source page retrieval.
pub trait Fetch {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, FetchError>> + Send;
}

pub struct HttpFetcher {
    client: Client,
    max_page_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(FetchError::Client)?;

        Ok(Self {
            client,
            max_page_bytes: config.max_page_bytes,
        })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        info!("Visiting \"{}\"", url.green());

        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let declared_encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(charset_from_content_type);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(request_error)?;
            if bytes.len() + chunk.len() > self.max_page_bytes {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit: self.max_page_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(
            "Fetched {} bytes (declared charset: {:?})",
            bytes.len(),
            declared_encoding
        );

        Ok(FetchedPage {
            url: parsed,
            bytes,
            declared_encoding,
        })
    }
}

/// Extracts the `charset` parameter of a Content-Type header value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}
