pub mod gateway;
pub mod httpproxy;

pub use gateway::Gateway;

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::http::{Body, Response, StatusCode, header};

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("rate limit exceeded")]
	RateLimitExceeded,
	#[error("path matches no pattern")]
	PathNotAllowed,
	#[error("no route after host narrowing")]
	RouteNotFound,
	#[error("route has no target")]
	RouteNotConfigured,
	#[error("route target is unusable")]
	TargetMisconfigured,
	#[error("source address denied")]
	IpDenied,
	#[error("invalid request")]
	InvalidRequest,
	#[error("file target unreadable: {0}")]
	FileUnreadable(std::io::Error),
	#[error("handler failed: {0}")]
	HandlerFailed(anyhow::Error),
	#[error("upstream call failed: {0}")]
	UpstreamCallFailed(anyhow::Error),
	#[error("upstream request timed out")]
	RequestTimeout,
	#[error("processing failed: {0:?}")]
	Processing(anyhow::Error),
}

impl ProxyError {
	pub fn status(&self) -> StatusCode {
		match self {
			ProxyError::RateLimitExceeded
			| ProxyError::RouteNotConfigured
			| ProxyError::TargetMisconfigured
			| ProxyError::IpDenied => StatusCode::FORBIDDEN,
			ProxyError::PathNotAllowed
			| ProxyError::RouteNotFound
			| ProxyError::FileUnreadable(_) => StatusCode::NOT_FOUND,
			ProxyError::InvalidRequest
			| ProxyError::HandlerFailed(_)
			| ProxyError::UpstreamCallFailed(_)
			| ProxyError::RequestTimeout
			| ProxyError::Processing(_) => StatusCode::BAD_GATEWAY,
		}
	}

	fn fallback_body(&self) -> &'static str {
		match self {
			ProxyError::RateLimitExceeded => "Flood protection",
			ProxyError::IpDenied => "ip banned",
			ProxyError::RouteNotConfigured => "Path not configured",
			ProxyError::TargetMisconfigured => "Path incorrectly configured",
			ProxyError::PathNotAllowed
			| ProxyError::RouteNotFound
			| ProxyError::FileUnreadable(_) => "not found",
			_ => "server error",
		}
	}
}

/// Emits a status code with either a configured static body or a short
/// plain-text fallback. Only ever builds small complete responses, so it
/// cannot itself fail mid-stream.
#[derive(Debug, Default, Clone)]
pub struct ErrorResponder {
	responses: HashMap<u16, Bytes>,
}

impl ErrorResponder {
	/// `<dir>/<code>.html`, keyed by decimal status code. A missing
	/// directory just means no overrides.
	pub fn load(dir: &Path) -> ErrorResponder {
		let mut responses = HashMap::new();
		let entries = match fs_err::read_dir(dir) {
			Ok(entries) => entries,
			Err(_) => return ErrorResponder::default(),
		};
		for entry in entries.flatten() {
			let path = entry.path();
			if path.extension().map(|e| e == "html").unwrap_or(false)
				&& let Some(code) = path
					.file_stem()
					.and_then(|s| s.to_str())
					.and_then(|s| s.parse::<u16>().ok())
			{
				match fs_err::read(&path) {
					Ok(body) => {
						responses.insert(code, Bytes::from(body));
					},
					Err(e) => warn!("skipping static response {}: {e}", path.display()),
				}
			}
		}
		debug!(count = responses.len(), "static error bodies loaded");
		ErrorResponder { responses }
	}

	pub fn respond(&self, err: &ProxyError) -> Response {
		let code = err.status();
		match self.responses.get(&code.as_u16()) {
			Some(body) => ::http::Response::builder()
				.status(code)
				.header(header::CONTENT_TYPE, "text/html")
				.body(Body::from(body.clone()))
				.expect("builder with known status code should not fail"),
			None => ::http::Response::builder()
				.status(code)
				.header(header::CONTENT_TYPE, "text/plain")
				.body(Body::from(err.fallback_body()))
				.expect("builder with known status code should not fail"),
		}
	}
}

#[cfg(test)]
mod tests {
	use http_body_util::BodyExt;

	use super::*;

	async fn body_of(resp: Response) -> String {
		let collected = resp.into_body().collect().await.unwrap();
		String::from_utf8(collected.to_bytes().to_vec()).unwrap()
	}

	#[tokio::test]
	async fn fallback_bodies() {
		let responder = ErrorResponder::default();

		let resp = responder.respond(&ProxyError::RateLimitExceeded);
		assert_eq!(resp.status(), StatusCode::FORBIDDEN);
		assert_eq!(body_of(resp).await, "Flood protection");

		let resp = responder.respond(&ProxyError::IpDenied);
		assert_eq!(resp.status(), StatusCode::FORBIDDEN);
		assert_eq!(body_of(resp).await, "ip banned");

		let resp = responder.respond(&ProxyError::RouteNotFound);
		assert_eq!(resp.status(), StatusCode::NOT_FOUND);
		assert_eq!(body_of(resp).await, "not found");

		let resp = responder.respond(&ProxyError::RouteNotConfigured);
		assert_eq!(body_of(resp).await, "Path not configured");

		let resp = responder.respond(&ProxyError::TargetMisconfigured);
		assert_eq!(body_of(resp).await, "Path incorrectly configured");

		let resp = responder.respond(&ProxyError::RequestTimeout);
		assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
		assert_eq!(body_of(resp).await, "server error");
	}

	#[tokio::test]
	async fn static_bodies_override_fallbacks() {
		let dir = std::env::temp_dir().join(format!("edgegateway-resp-{}", rand::random::<u64>()));
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::write(dir.join("404.html"), "<h1>gone</h1>").unwrap();
		std::fs::write(dir.join("not-a-code.html"), "ignored").unwrap();

		let responder = ErrorResponder::load(&dir);
		let resp = responder.respond(&ProxyError::RouteNotFound);
		assert_eq!(resp.status(), StatusCode::NOT_FOUND);
		assert_eq!(
			resp.headers().get(header::CONTENT_TYPE).unwrap(),
			"text/html"
		);
		assert_eq!(body_of(resp).await, "<h1>gone</h1>");

		// 502 has no override and keeps the plain-text fallback.
		let resp = responder.respond(&ProxyError::RequestTimeout);
		assert_eq!(
			resp.headers().get(header::CONTENT_TYPE).unwrap(),
			"text/plain"
		);

		let _ = std::fs::remove_dir_all(dir);
	}
}
