use std::fmt::Debug;
use std::sync::Arc;

use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::http;
use crate::transport::tls;

/// Pooled upstream HTTP/1.1 client. The connector speaks both plaintext and
/// TLS; which one a request gets is decided by the scheme the dispatcher put
/// on the forward URI.
#[derive(Clone)]
pub struct Client {
	client: hyper_util::client::legacy::Client<HttpsConnector<HttpConnector>, http::Body>,
	tls: Arc<rustls::ClientConfig>,
}

impl Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client").finish()
	}
}

impl Client {
	pub fn new() -> Client {
		let tls = tls::upstream_config();
		let connector = hyper_rustls::HttpsConnectorBuilder::new()
			.with_tls_config((*tls).clone())
			.https_or_http()
			.enable_http1()
			.build();
		let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
			.timer(TokioTimer::new())
			.build(connector);
		Client { client, tls }
	}

	pub async fn request(
		&self,
		req: http::Request,
	) -> Result<http::Response, hyper_util::client::legacy::Error> {
		let resp = self.client.request(req).await?;
		Ok(resp.map(http::Body::new))
	}

	/// Shared client-side TLS config; the WebSocket engine dials with it.
	pub fn tls_config(&self) -> Arc<rustls::ClientConfig> {
		self.tls.clone()
	}
}

impl Default for Client {
	fn default() -> Self {
		Self::new()
	}
}
