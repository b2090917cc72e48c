use pingora_http::RequestHeader;
use pingora_proxy::Session;

/// Retrieves the value of a specific header from the request.
///
/// Returns `None` if the header is not present or its value is not valid UTF-8.
pub fn get_req_header_value<'a>(req_header: &'a RequestHeader, key: &str) -> Option<&'a str> {
    req_header
        .headers
        .get(key)
        .and_then(|value| value.to_str().ok())
}

/// Resolves an Nginx-style variable name against the session.
///
/// Only the connection variables plugins declare are supported; other
/// names resolve to `None`.
pub fn get_var(session: &Session, key: &str) -> Option<String> {
    let inet = |addr: Option<&pingora_core::protocols::l4::socket::SocketAddr>| {
        addr.and_then(|a| a.as_inet()).copied()
    };

    match key {
        "remote_addr" => inet(session.client_addr()).map(|a| a.ip().to_string()),
        "server_port" => inet(session.server_addr()).map(|a| a.port().to_string()),
        _ => {
            log::debug!("Unsupported variable: {key}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_req_header_value() {
        let mut header = RequestHeader::build("GET", b"/", None).unwrap();
        header.insert_header("gray-name", "canary").unwrap();

        assert_eq!(get_req_header_value(&header, "gray-name"), Some("canary"));
        assert_eq!(get_req_header_value(&header, "Gray-Name"), Some("canary"));
        assert_eq!(get_req_header_value(&header, "missing"), None);
    }
}
