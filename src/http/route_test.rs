use crate::types::agent::{InvalidTarget, Route, RouteSet, Target, UpstreamTarget};

fn mk_route(pattern: &str, hostnames: Vec<&str>, priority: Option<i32>) -> Route {
	let mut r = Route::new(pattern, Target::Invalid(InvalidTarget::Unset)).unwrap();
	r.hostnames = hostnames.into_iter().map(|h| h.to_lowercase()).collect();
	r.priority = priority;
	r
}

fn setup(routes: Vec<Route>) -> RouteSet {
	RouteSet::from_list(routes)
}

fn run_test(routes: &RouteSet, host: &str, path: &str) -> Option<String> {
	super::select_best_route(routes, host, path).map(|r| r.key.clone())
}

#[test]
fn test_priority_tiebreak() {
	let routes = setup(vec![
		mk_route("/a*", vec![], Some(5)),
		mk_route("/abc", vec![], Some(1)),
	]);

	assert_eq!(run_test(&routes, "any.host", "/abc"), Some("/abc".into()));
	assert_eq!(run_test(&routes, "any.host", "/ab"), Some("/a*".into()));
}

#[test]
fn test_absent_priority_loses() {
	let routes = setup(vec![
		mk_route("/x*", vec![], None),
		mk_route("/x/y", vec![], Some(100)),
	]);

	assert_eq!(run_test(&routes, "h", "/x/y"), Some("/x/y".into()));
	assert_eq!(run_test(&routes, "h", "/x/z"), Some("/x*".into()));
}

#[test]
fn test_insertion_order_breaks_ties() {
	let routes = setup(vec![
		mk_route("/t*", vec![], Some(3)),
		mk_route("/ty*", vec![], Some(3)),
	]);

	assert_eq!(run_test(&routes, "h", "/ty"), Some("/t*".into()));
}

#[test]
fn test_hostname_narrowing() {
	let routes = setup(vec![mk_route("/api", vec!["svc.example"], None)]);

	struct TestCase {
		host: &'static str,
		want: Option<&'static str>,
	}
	let cases = vec![
		TestCase {
			host: "other.example",
			want: None,
		},
		TestCase {
			host: "svc.example",
			want: Some("/api"),
		},
		// Casing on the request side must not matter
		TestCase {
			host: "SVC.EXAMPLE",
			want: Some("/api"),
		},
	];
	for tc in cases {
		assert_eq!(
			run_test(&routes, tc.host, "/api"),
			tc.want.map(|s| s.to_string()),
			"host {}",
			tc.host
		);
	}
}

#[test]
fn test_hostname_fallback_to_open_route() {
	let routes = setup(vec![
		mk_route("/api", vec!["svc.example"], Some(1)),
		mk_route("/api", vec![], Some(2)),
	]);
	// Duplicate pattern keys collapse, so use distinct patterns instead.
	let routes2 = setup(vec![
		mk_route("/api", vec!["svc.example"], Some(1)),
		mk_route("/api*", vec![], Some(2)),
	]);

	// The single surviving entry for "/api" is the override (open route).
	assert_eq!(run_test(&routes, "elsewhere", "/api"), Some("/api".into()));
	// Host-specific route wins when the host matches, open route otherwise.
	assert_eq!(run_test(&routes2, "svc.example", "/api"), Some("/api".into()));
	assert_eq!(run_test(&routes2, "elsewhere", "/api"), Some("/api*".into()));
}

#[test]
fn test_allows_path_ignores_hostnames() {
	let routes = setup(vec![mk_route("/api", vec!["svc.example"], None)]);

	assert!(super::allows_path(&routes, "/api"));
	assert!(!super::allows_path(&routes, "/other"));
}

#[test]
fn test_root_pattern_stays_rooted() {
	let routes = setup(vec![mk_route("/", vec![], None)]);

	assert_eq!(run_test(&routes, "h", "/"), Some("/".into()));
	assert_eq!(run_test(&routes, "h", "/x"), None);
}

#[test]
fn test_pool_route_selected() {
	let mut r = mk_route("/pool", vec![], None);
	r.target = Target::Pool(vec![UpstreamTarget::parse("http://u1:81", false).unwrap()]);
	let routes = setup(vec![r]);

	let got = super::select_best_route(&routes, "h", "/pool").unwrap();
	match &got.target {
		Target::Pool(p) => assert_eq!(p.len(), 1),
		other => panic!("unexpected target {other:?}"),
	}
}
