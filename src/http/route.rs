use std::sync::Arc;

use crate::http::Request;
use crate::types::agent::{Route, RouteSet};

#[cfg(test)]
#[path = "route_test.rs"]
mod tests;

/// True iff any pattern in the table accepts the path, ignoring hostnames.
/// This is the cheap admission predicate run before route resolution; it
/// distinguishes "not configured" from "forbidden".
pub fn allows_path(routes: &RouteSet, path: &str) -> bool {
	routes.iter().any(|r| r.pattern.matches(path))
}

/// Resolve the best route for a request path and (port-stripped) host.
///
/// Order:
/// * Pattern must accept the path.
/// * If the route names hostnames, one must equal the request host,
///   case-insensitively.
/// * Among candidates, the smallest priority wins; an absent priority loses
///   to every explicit one; remaining ties break by insertion order.
pub fn select_best_route(routes: &RouteSet, host: &str, path: &str) -> Option<Arc<Route>> {
	routes
		.iter()
		.enumerate()
		.filter(|(_, r)| r.pattern.matches(path))
		.filter(|(_, r)| {
			r.hostnames.is_empty() || r.hostnames.iter().any(|h| h.eq_ignore_ascii_case(host))
		})
		.min_by_key(|(idx, r)| (r.priority.map(i64::from).unwrap_or(i64::MAX), *idx))
		.map(|(_, r)| r.clone())
}

/// Convenience over a normalized request.
pub fn select_for_request(routes: &RouteSet, host: &str, req: &Request) -> Option<Arc<Route>> {
	select_best_route(routes, host, req.uri().path())
}
