//! `host[:port]` parsing for tunnel targets.

/// Splits a CONNECT authority such as `example.test:8443` into host and port.
///
/// Falls back to `default_port` when no port is given.  Bracketed IPv6
/// literals (`[::1]:443`) are returned without their brackets.  Input that
/// does not look like `host[:port]` is returned whole as the host.
///
/// # Examples
///
/// ```rust
/// use hot_core::protocol::split_host_port;
///
/// assert_eq!(split_host_port("example.test", 443), ("example.test".to_string(), 443));
/// assert_eq!(split_host_port("example.test:8443", 443), ("example.test".to_string(), 8443));
/// ```
pub fn split_host_port(authority: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            return match tail.strip_prefix(':') {
                None if tail.is_empty() => (host.to_string(), default_port),
                Some(port) => match port.parse() {
                    Ok(port) => (host.to_string(), port),
                    Err(_) => (authority.to_string(), default_port),
                },
                None => (authority.to_string(), default_port),
            };
        }
        return (authority.to_string(), default_port);
    }

    match authority.split_once(':') {
        None => (authority.to_string(), default_port),
        Some((host, port)) if !host.is_empty() => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        Some(_) => (authority.to_string(), default_port),
    }
}
