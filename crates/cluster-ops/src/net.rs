//! Plain network reachability probes.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// Try a TCP connect to `host:port` within `timeout`.
///
/// Every resolved address is tried; the first successful connect wins.
#[must_use]
pub fn tcp_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(host, port, error = %e, "Address resolution failed");
            return false;
        }
    };

    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return true,
            Err(e) => debug!(%addr, error = %e, "Connection attempt failed"),
        }
    }
    false
}

/// Outcome of an HTTPS request against a public hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpProbe {
    /// Any response below 500 counts as reachable (auth walls return 401/403).
    Reachable(u16),
    ServerError(u16),
    Unreachable(String),
}

/// Issue a GET to `https://<host>/` and classify the answer.
#[must_use]
pub fn https_probe(host: &str, timeout: Duration) -> HttpProbe {
    let client = match reqwest::blocking::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(3))
        .build()
    {
        Ok(c) => c,
        Err(e) => return HttpProbe::Unreachable(e.to_string()),
    };

    match client.get(format!("https://{host}/")).send() {
        Ok(resp) => {
            let code = resp.status().as_u16();
            if resp.status().is_server_error() {
                HttpProbe::ServerError(code)
            } else {
                HttpProbe::Reachable(code)
            }
        }
        Err(e) => HttpProbe::Unreachable(e.to_string()),
    }
}
