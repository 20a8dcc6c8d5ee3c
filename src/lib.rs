use std::sync::Arc;

pub mod client;
pub mod config;
pub mod http;
pub mod proxy;
pub mod transport;
pub mod types;

pub use config::Config;

use crate::client::Client;
use crate::http::ratelimit::RateLimit;
use crate::proxy::ErrorResponder;
use crate::transport::tls::CertStore;
use crate::types::agent::RouteSet;

/// Everything a request needs, wired once at startup. The only piece that
/// mutates afterwards is the rate limiter's bucket.
#[derive(Debug, Clone)]
pub struct ProxyInputs {
	pub cfg: Arc<Config>,
	pub routes: RouteSet,
	pub certs: Arc<CertStore>,
	pub responder: ErrorResponder,
	pub ratelimit: RateLimit,
	pub upstream: Client,
}

impl ProxyInputs {
	pub fn new(
		cfg: Arc<Config>,
		routes: RouteSet,
		certs: Arc<CertStore>,
		responder: ErrorResponder,
		ratelimit: RateLimit,
		upstream: Client,
	) -> Arc<Self> {
		Arc::new(Self {
			cfg,
			routes,
			certs,
			responder,
			ratelimit,
			upstream,
		})
	}
}
