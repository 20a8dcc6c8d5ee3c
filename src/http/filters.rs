use bytes::Bytes;

use crate::http::{Request, Response};
use crate::types::agent::Route;

/// Mutates the outbound proxy request before it leaves for the upstream.
/// Header-mutation contract: the body is not captured.
pub trait RequestRewrite: Send + Sync {
	fn apply(&self, req: &mut Request) -> anyhow::Result<()>;
}

/// Mutates the proxied response before it is returned downstream. Runs after
/// the CORS reflection headers are written. Header-mutation contract: the
/// body is not buffered.
pub trait ResponseRewrite: Send + Sync {
	fn apply(&self, resp: &mut Response) -> anyhow::Result<()>;
}

/// Computes the body for a handler route. Synchronous handlers are simply
/// already-ready futures; the dispatcher awaits uniformly either way.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
	async fn serve(&self, req: Request) -> anyhow::Result<Bytes>;
}

/// Routes registered from code rather than from the serialized document.
/// Only these may carry handler targets or rewrite hooks; the document
/// loader has no way to express either.
#[derive(Default)]
pub struct CustomRoutes {
	routes: Vec<Route>,
}

impl CustomRoutes {
	pub fn register(&mut self, route: Route) {
		self.routes.push(route);
	}

	pub(crate) fn into_routes(self) -> Vec<Route> {
		self.routes
	}
}
