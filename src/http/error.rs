use std::num::ParseIntError;
use std::str::Utf8Error;

use quick_error::quick_error;

quick_error! {
    /// Error raised while framing a request.
    ///
    /// Note, you should not make an exhaustive match over the enum, more
    /// errors will be added at will. Use the `HttpError` trait to turn one
    /// into a response status.
    #[derive(Debug)]
    pub enum RequestError {
        HeadersAreTooLarge {
            display("headers are larger than the configured maximum")
        }
        BadHeaders(e: httparse::Error) {
            from()
            display("error parsing headers: {:?}", e)
        }
        BadChunk {
            display("invalid chunk framing in request body")
        }
        DuplicateContentLength {
            display("duplicate `Content-Length` header in request")
        }
        ConflictingFraming {
            display("both `Content-Length` and `Transfer-Encoding: chunked` \
                     present")
        }
        ContentLengthOverflow {
            display("`Content-Length` claim overflows the byte counter")
        }
        BadContentLength(err: ParseIntError) {
            display("error parsing `Content-Length` header: {}", err)
        }
        LengthRequired {
            display("request carries a body but no `Content-Length`")
        }
        PayloadTooLarge {
            display("payload is larger than is allowed by server settings")
        }
        MissingHost {
            display("HTTP/1.1 request without a `Host` header")
        }
        BadHost {
            display("malformed `Host` header")
        }
        UriTooLong {
            display("request URI exceeds the configured maximum")
        }
        MethodNotImplemented {
            display("request method is not implemented by this server")
        }
        VersionNotSupported {
            display("HTTP version is not supported")
        }
        BadUtf8(err: Utf8Error) {
            from()
            display("bad utf8 in one of the crucial headers: {}", err)
        }
    }
}

/// A trait which represents an error which can be rendered as an HTTP
/// error page.
pub trait HttpError {
    /// Return HTTP status code and status text.
    fn http_status(&self) -> (u16, &'static str);
}

impl HttpError for RequestError {
    fn http_status(&self) -> (u16, &'static str) {
        use self::RequestError::*;
        match *self {
            HeadersAreTooLarge => (431, "Request Header Fields Too Large"),
            BadHeaders(_) => (400, "Bad Request"),
            BadChunk => (400, "Bad Request"),
            DuplicateContentLength => (400, "Bad Request"),
            ConflictingFraming => (400, "Bad Request"),
            ContentLengthOverflow => (400, "Bad Request"),
            BadContentLength(_) => (400, "Bad Request"),
            LengthRequired => (411, "Length Required"),
            PayloadTooLarge => (413, "Payload Too Large"),
            MissingHost => (400, "Bad Request"),
            BadHost => (400, "Bad Request"),
            UriTooLong => (414, "URI Too Long"),
            MethodNotImplemented => (501, "Not Implemented"),
            VersionNotSupported => (505, "HTTP Version Not Supported"),
            BadUtf8(_) => (400, "Bad Request"),
        }
    }
}

/// Status text for the codes the server emits. Unknown codes fall back
/// to a generic marker so the status line is always well-formed.
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod test {
    use super::{status_text, HttpError, RequestError};

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RequestError::HeadersAreTooLarge.http_status(),
            (431, "Request Header Fields Too Large")
        );
        assert_eq!(
            RequestError::ConflictingFraming.http_status().0,
            400
        );
        assert_eq!(RequestError::LengthRequired.http_status().0, 411);
        assert_eq!(RequestError::VersionNotSupported.http_status().0, 505);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(504), "Gateway Timeout");
        assert_eq!(status_text(999), "Unknown");
    }
}
