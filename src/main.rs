use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgegateway::client::Client;
use edgegateway::http::filters::CustomRoutes;
use edgegateway::http::ratelimit::RateLimit;
use edgegateway::proxy::{ErrorResponder, Gateway};
use edgegateway::transport::tls::CertStore;
use edgegateway::types::local;
use edgegateway::{ProxyInputs, config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let cfg = Arc::new(config::parse_config()?);
	let certs = Arc::new(
		CertStore::load(&cfg.ssl_dir)
			.with_context(|| format!("loading TLS material from {}", cfg.ssl_dir.display()))?,
	);
	let responder = ErrorResponder::load(&cfg.responses_dir);
	// Compiled extensions would register handler routes and rewrite hooks
	// here; the stock binary ships none.
	let routes = local::load_routes(&cfg, CustomRoutes::default())?;
	info!(routes = routes.len(), port = cfg.port, "route table ready");

	let ratelimit = RateLimit::new(cfg.max_calls_per_second)?;
	let pi = ProxyInputs::new(cfg, routes, certs, responder, ratelimit, Client::new());
	Gateway::new(pi).run().await
}
