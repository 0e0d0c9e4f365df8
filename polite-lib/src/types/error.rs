use http::StatusCode;
use thiserror::Error;

/// Possible errors when interacting with `polite_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The given string cannot be parsed into a URL
    #[error("Cannot parse `{0}` as URL: {1}")]
    ParseUrl(String, #[source] url::ParseError),

    /// An URL with an invalid host was found
    #[error("URL is missing a host")]
    InvalidUrlHost,

    /// Name resolution for the host of a URL failed
    #[error("Cannot resolve host `{host}`: {source}")]
    UnresolvableHost {
        /// The host name that was looked up
        host: String,
        /// The underlying resolver error
        #[source]
        source: std::io::Error,
    },

    /// Name resolution succeeded but did not yield a single address
    #[error("No address found for host `{0}`")]
    NoAddressFound(String),

    /// Network error while sending the request or receiving the response head
    #[error("Network error while trying to connect to an endpoint via reqwest")]
    NetworkRequest(#[source] reqwest::Error),

    /// The response head arrived but the body could not be read
    #[error("Error reading response body (status {status}): {source}")]
    ReadResponseBody {
        /// Status code of the response whose body failed
        status: StatusCode,
        /// The underlying reqwest error
        #[source]
        source: reqwest::Error,
    },

    /// The request client cannot be built
    #[error("Error creating request client: {0}")]
    BuildHttpClient(#[source] reqwest::Error),

    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string or byte
    /// slice.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

impl ErrorKind {
    /// The best known HTTP status code for this error, if any.
    ///
    /// Failure callbacks receive this value; `None` corresponds to an
    /// unknown status (no response was received).
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ReadResponseBody { status, .. } => Some(*status),
            Self::NetworkRequest(e) => e.status(),
            _ => None,
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ParseUrl(s1, e1), Self::ParseUrl(s2, e2)) => s1 == s2 && e1 == e2,
            (
                Self::UnresolvableHost {
                    host: h1,
                    source: e1,
                },
                Self::UnresolvableHost {
                    host: h2,
                    source: e2,
                },
            ) => h1 == h2 && e1.kind() == e2.kind(),
            (Self::NoAddressFound(h1), Self::NoAddressFound(h2)) => h1 == h2,
            (Self::NetworkRequest(e1), Self::NetworkRequest(e2))
            | (Self::BuildHttpClient(e1), Self::BuildHttpClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (
                Self::ReadResponseBody {
                    status: s1,
                    source: e1,
                },
                Self::ReadResponseBody {
                    status: s2,
                    source: e2,
                },
            ) => s1 == s2 && e1.to_string() == e2.to_string(),
            (Self::InvalidHeader(_), Self::InvalidHeader(_))
            | (Self::InvalidUrlHost, Self::InvalidUrlHost) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}
