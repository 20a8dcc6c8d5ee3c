pub mod authorization;
pub mod cors;
pub mod filters;
pub mod ratelimit;
pub mod route;

pub type Error = axum_core::Error;
pub type Body = axum_core::body::Body;
pub type Request = ::http::Request<Body>;
pub type Response = ::http::Response<Body>;
pub use ::http::uri::{Authority, Scheme};
pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header, uri};

use crate::proxy::ProxyError;

pub fn get_host(req: &Request) -> Result<&str, ProxyError> {
	// We expect a normalized request, so this will always be in the URI
	let host = req.uri().host().ok_or(ProxyError::InvalidRequest)?;
	let host = strip_port(host);
	Ok(host)
}

// copied from private `http` method
fn strip_port(auth: &str) -> &str {
	let host_port = auth
		.rsplit('@')
		.next()
		.expect("split always has at least 1 item");

	if host_port.as_bytes()[0] == b'[' {
		let i = host_port
			.find(']')
			.expect("parsing should validate brackets");
		&host_port[0..i + 1]
	} else {
		host_port
			.split(':')
			.next()
			.expect("split always has at least 1 item")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strip_port_variants() {
		assert_eq!(strip_port("example.com"), "example.com");
		assert_eq!(strip_port("example.com:8443"), "example.com");
		assert_eq!(strip_port("[::1]:8443"), "[::1]");
	}
}
