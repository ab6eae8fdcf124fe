//! Maps a failed backend round trip onto the status returned to the client.
//!
//! The rules are tried in order and the first match wins:
//!
//! 1. a connect or I/O timeout is a `504 Gateway Timeout`
//! 2. a refused connection is a `502 Bad Gateway`
//! 3. giving up while waiting for the response head is a `504`
//! 4. a request whose declared content length disagrees with its body is a
//!    `400 Bad Request`
//! 5. anything else (DNS, TLS, resets) is a `500 Internal Server Error`
//!
//! Every rule first looks for a structured error in the `source()` chain.
//! Rules 3 and 4 also accept the error text, since wrapped client errors
//! only carry those conditions as messages.

use crate::error::{BackendError, HEADER_TIMEOUT_MESSAGE};
use http::StatusCode;
use regex::Regex;
use std::error::Error as StdError;
use std::io;
use std::sync::LazyLock;

static INVALID_CONTENT_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Request\.ContentLength=\d+ with Body length \d+|early end, expected \d+ more bytes",
    )
    .expect("content length pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    HeaderTimeout,
    InvalidContentLength,
    Other,
}

impl FailureKind {
    pub fn status(self) -> StatusCode {
        match self {
            FailureKind::Timeout | FailureKind::HeaderTimeout => StatusCode::GATEWAY_TIMEOUT,
            FailureKind::ConnectionRefused => StatusCode::BAD_GATEWAY,
            FailureKind::InvalidContentLength => StatusCode::BAD_REQUEST,
            FailureKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&e| e.source())
}

fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return io_err.kind() == io::ErrorKind::TimedOut;
    }
    if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
        return hyper_err.is_timeout();
    }
    false
}

fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<io::Error>()
        .is_some_and(|io_err| io_err.kind() == io::ErrorKind::ConnectionRefused)
}

fn is_header_timeout(err: &(dyn StdError + 'static)) -> bool {
    matches!(
        err.downcast_ref::<BackendError>(),
        Some(BackendError::HeaderTimeout(_))
    ) || err.to_string().ends_with(HEADER_TIMEOUT_MESSAGE)
}

fn is_invalid_content_length(err: &(dyn StdError + 'static)) -> bool {
    matches!(
        err.downcast_ref::<BackendError>(),
        Some(BackendError::ContentLengthMismatch { .. })
    ) || INVALID_CONTENT_LENGTH.is_match(&err.to_string())
}

/// Classifies a failure. Every rule inspects the whole `source()` chain
/// before the next rule is tried.
pub fn classify(err: &(dyn StdError + 'static)) -> FailureKind {
    if chain(err).any(is_timeout) {
        FailureKind::Timeout
    } else if chain(err).any(is_connection_refused) {
        FailureKind::ConnectionRefused
    } else if chain(err).any(is_header_timeout) {
        FailureKind::HeaderTimeout
    } else if chain(err).any(is_invalid_content_length) {
        FailureKind::InvalidContentLength
    } else {
        FailureKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    struct Wrapped {
        context: &'static str,
        cause: Box<dyn StdError + Send + Sync>,
    }

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.context)
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&*self.cause)
        }
    }

    fn wrap(cause: impl StdError + Send + Sync + 'static) -> Wrapped {
        Wrapped {
            context: "tcp connect error",
            cause: Box::new(cause),
        }
    }

    #[test]
    fn test_connect_timeout_is_gateway_timeout() {
        let err = wrap(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"));
        assert_eq!(classify(&err), FailureKind::Timeout);
        assert_eq!(classify(&err).status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_connection_refused_is_bad_gateway() {
        let err = wrap(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(classify(&err), FailureKind::ConnectionRefused);
        assert_eq!(classify(&err).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_header_timeout_is_gateway_timeout() {
        let err = BackendError::HeaderTimeout(Duration::from_millis(10));
        assert_eq!(classify(&err), FailureKind::HeaderTimeout);
        assert_eq!(classify(&err).status(), StatusCode::GATEWAY_TIMEOUT);

        let opaque = io::Error::other("net/http: timeout awaiting response headers");
        assert_eq!(classify(&opaque), FailureKind::HeaderTimeout);
    }

    #[test]
    fn test_content_length_mismatch_is_bad_request() {
        let err = wrap(io::Error::other("early end, expected 12 more bytes"));
        assert_eq!(classify(&err), FailureKind::InvalidContentLength);
        assert_eq!(classify(&err).status(), StatusCode::BAD_REQUEST);

        let err = io::Error::other("http: Request.ContentLength=5 with Body length 3");
        assert_eq!(classify(&err).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_declared_length_mismatch_is_bad_request() {
        let err = BackendError::ContentLengthMismatch {
            declared: 10,
            actual: 3,
        };
        assert_eq!(classify(&err), FailureKind::InvalidContentLength);
        assert_eq!(classify(&err).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_other_failures_are_internal_errors() {
        let dns = wrap(io::Error::other("failed to lookup address information"));
        assert_eq!(classify(&dns), FailureKind::Other);
        assert_eq!(classify(&dns).status(), StatusCode::INTERNAL_SERVER_ERROR);

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify(&reset).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // A timeout whose message also looks like a body length mismatch
        let err = io::Error::new(io::ErrorKind::TimedOut, "early end, expected 1 more bytes");
        assert_eq!(classify(&err), FailureKind::Timeout);

        // A refused connection reported alongside the header give-up message
        let err = Wrapped {
            context: HEADER_TIMEOUT_MESSAGE,
            cause: Box::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
        };
        assert_eq!(classify(&err), FailureKind::ConnectionRefused);
    }
}
