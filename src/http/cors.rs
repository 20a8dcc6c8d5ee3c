use crate::http::{HeaderMap, HeaderValue, header};

const HEADER_VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");

/// Permissive CORS reflection: whatever the client asked for is allowed
/// back. Captured from the inbound request before it is consumed, applied to
/// the downstream response ahead of any response rewrite hook.
#[derive(Debug, Default, Clone)]
pub struct ReflectedCors {
	method: Option<HeaderValue>,
	headers: Option<HeaderValue>,
	origin: Option<HeaderValue>,
}

impl ReflectedCors {
	pub fn capture(headers: &HeaderMap) -> ReflectedCors {
		ReflectedCors {
			method: headers.get(header::ACCESS_CONTROL_REQUEST_METHOD).cloned(),
			headers: headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS).cloned(),
			origin: headers.get(header::ORIGIN).cloned(),
		}
	}

	pub fn apply(&self, headers: &mut HeaderMap) {
		if let Some(method) = &self.method {
			headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, method.clone());
		}
		if let Some(h) = &self.headers {
			headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, h.clone());
		}
		if let Some(origin) = &self.origin {
			headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
			headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HEADER_VALUE_TRUE);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reflects_request_headers() {
		let mut req = HeaderMap::new();
		req.insert(header::ORIGIN, HeaderValue::from_static("https://a.test"));
		req.insert(
			header::ACCESS_CONTROL_REQUEST_METHOD,
			HeaderValue::from_static("PATCH"),
		);
		req.insert(
			header::ACCESS_CONTROL_REQUEST_HEADERS,
			HeaderValue::from_static("x-custom"),
		);

		let mut resp = HeaderMap::new();
		ReflectedCors::capture(&req).apply(&mut resp);

		assert_eq!(
			resp.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
			"https://a.test"
		);
		assert_eq!(
			resp.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
			"true"
		);
		assert_eq!(
			resp.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
			"PATCH"
		);
		assert_eq!(
			resp.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
			"x-custom"
		);
	}

	#[test]
	fn no_origin_no_credentials() {
		let req = HeaderMap::new();
		let mut resp = HeaderMap::new();
		ReflectedCors::capture(&req).apply(&mut resp);

		assert!(resp.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
		assert!(resp.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
	}
}
