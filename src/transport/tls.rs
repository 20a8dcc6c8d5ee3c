use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::transport::stream::Socket;
use crate::types::agent::{parse_cert, parse_key};

pub static ALL_TLS_VERSIONS: &[&rustls::SupportedProtocolVersion] =
	&[&rustls::version::TLS12, &rustls::version::TLS13];

pub fn provider() -> Arc<CryptoProvider> {
	Arc::new(rustls::crypto::ring::default_provider())
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("tls handshake error: {0:?}")]
	Handshake(std::io::Error),
	#[error("{0}")]
	Anyhow(#[from] anyhow::Error),
}

/// Terminate TLS on an accepted downstream socket. Certificate selection
/// happens inside the handshake via the store's SNI resolver.
pub async fn accept(conn: Socket, cfg: Arc<ServerConfig>) -> Result<Socket, Error> {
	let (ext, inner) = conn.into_parts();
	let stream = TlsAcceptor::from(cfg)
		.accept(Box::new(inner))
		.await
		.map_err(Error::Handshake)?;
	Ok(Socket::from_tls(ext, stream)?)
}

/// SNI host name → prepared credential, with a default fallback.
///
/// Loaded once from `./ssl` by a single synchronous walk: `key.pem` and
/// `certificate.pem` at the top level are the default material, and each
/// subdirectory holds the material for the host named by the (lowercased)
/// directory name. Matching is exact lowercase equality; a miss serves the
/// default. The map tolerates entries inserted after listen begins, but the
/// steady-state contract is read-only.
pub struct CertStore {
	certs: RwLock<HashMap<String, Arc<CertifiedKey>>>,
	default: Arc<CertifiedKey>,
}

impl std::fmt::Debug for CertStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CertStore")
			.field("hosts", &self.certs.read().expect("lock").len())
			.finish()
	}
}

impl CertStore {
	pub fn load(dir: &Path) -> anyhow::Result<CertStore> {
		let default = load_certified(dir, "default")
			.with_context(|| format!("default TLS material in {}", dir.display()))?;
		let mut certs = HashMap::new();
		for entry in fs_err::read_dir(dir)? {
			let entry = entry?;
			if !entry.file_type()?.is_dir() {
				continue;
			}
			let host = entry.file_name().to_string_lossy().to_ascii_lowercase();
			match load_certified(&entry.path(), &host) {
				Ok(ck) => {
					debug!(%host, "loaded certificate");
					certs.insert(host, ck);
				},
				Err(e) => warn!(%host, "skipping certificate directory: {e}"),
			}
		}
		info!(hosts = certs.len(), "TLS material ready");
		Ok(CertStore {
			certs: RwLock::new(certs),
			default,
		})
	}

	pub fn insert(&self, host: &str, cert: Arc<CertifiedKey>) {
		self
			.certs
			.write()
			.expect("lock")
			.insert(host.to_ascii_lowercase(), cert);
	}

	/// Exact lowercase match on the presented name; no name falls back to
	/// the default credential.
	pub fn lookup(&self, server_name: Option<&str>) -> Arc<CertifiedKey> {
		match server_name {
			Some(host) => self
				.certs
				.read()
				.expect("lock")
				.get(&host.to_ascii_lowercase())
				.cloned()
				.unwrap_or_else(|| self.default.clone()),
			None => self.default.clone(),
		}
	}

	pub fn server_config(self: &Arc<Self>) -> Arc<ServerConfig> {
		let mut sc = ServerConfig::builder_with_provider(provider())
			.with_protocol_versions(ALL_TLS_VERSIONS)
			.expect("server config must be valid")
			.with_no_client_auth()
			.with_cert_resolver(self.clone());
		// Upgrades require HTTP/1.1; don't offer h2.
		sc.alpn_protocols = vec![b"http/1.1".to_vec()];
		Arc::new(sc)
	}
}

impl ResolvesServerCert for CertStore {
	fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
		Some(self.lookup(client_hello.server_name()))
	}
}

fn load_certified(dir: &Path, what: &str) -> anyhow::Result<Arc<CertifiedKey>> {
	let cert = fs_err::read(dir.join("certificate.pem"))?;
	let chain = parse_cert(&cert).with_context(|| format!("certificate for {what}"))?;
	let key = fs_err::read(dir.join("key.pem"))?;
	let key = parse_key(&key).with_context(|| format!("key for {what}"))?;
	let signing = rustls::crypto::ring::sign::any_supported_type(&key)
		.map_err(|e| anyhow::anyhow!("unsupported key type for {what}: {e}"))?;
	Ok(Arc::new(CertifiedKey::new(chain, signing)))
}

/// Client-side TLS for secure upstreams: platform roots, standard
/// verification. The per-route boolean is the only policy knob.
pub fn upstream_config() -> Arc<ClientConfig> {
	let mut roots = rustls::RootCertStore::empty();
	let loaded = rustls_native_certs::load_native_certs();
	for err in &loaded.errors {
		warn!("failed to load a native root: {err}");
	}
	for cert in loaded.certs {
		let _ = roots.add(cert);
	}
	let cfg = ClientConfig::builder_with_provider(provider())
		.with_protocol_versions(ALL_TLS_VERSIONS)
		.expect("client config must be valid")
		.with_root_certificates(roots)
		.with_no_client_auth();
	Arc::new(cfg)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_material(dir: &Path, host: &str) {
		let ck = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
		std::fs::create_dir_all(dir).unwrap();
		std::fs::write(dir.join("certificate.pem"), ck.cert.pem()).unwrap();
		std::fs::write(dir.join("key.pem"), ck.key_pair.serialize_pem()).unwrap();
	}

	fn setup() -> (std::path::PathBuf, Arc<CertStore>) {
		let dir = std::env::temp_dir().join(format!("edgegateway-tls-{}", rand::random::<u64>()));
		write_material(&dir, "default.example");
		write_material(&dir.join("a.example"), "a.example");
		write_material(&dir.join("B.Example"), "b.example");
		let store = Arc::new(CertStore::load(&dir).expect("load"));
		(dir, store)
	}

	#[test]
	fn per_host_lookup_with_default_fallback() {
		let (dir, store) = setup();

		let a = store.lookup(Some("a.example"));
		let def = store.lookup(None);
		assert!(!Arc::ptr_eq(&a, &def), "host entry must not be the default");

		// Unknown and unrelated hosts serve the default credential.
		let other = store.lookup(Some("unrelated.example"));
		assert!(Arc::ptr_eq(&other, &def));

		let _ = std::fs::remove_dir_all(dir);
	}

	#[test]
	fn lookup_is_case_insensitive_on_both_sides() {
		let (dir, store) = setup();

		let def = store.lookup(None);
		// Directory name was mixed case; presented name is mixed case too.
		let b = store.lookup(Some("b.EXAMPLE"));
		assert!(!Arc::ptr_eq(&b, &def));

		let _ = std::fs::remove_dir_all(dir);
	}

	#[test]
	fn entries_may_appear_after_startup() {
		let (dir, store) = setup();

		let def = store.lookup(None);
		assert!(Arc::ptr_eq(&store.lookup(Some("late.example")), &def));

		let late_dir = dir.join("late.example");
		write_material(&late_dir, "late.example");
		let late = load_certified(&late_dir, "late.example").unwrap();
		store.insert("late.example", late);
		assert!(!Arc::ptr_eq(&store.lookup(Some("late.example")), &def));

		let _ = std::fs::remove_dir_all(dir);
	}

	#[test]
	fn missing_default_material_is_an_error() {
		let dir = std::env::temp_dir().join(format!("edgegateway-tls-{}", rand::random::<u64>()));
		std::fs::create_dir_all(&dir).unwrap();
		assert!(CertStore::load(&dir).is_err());
		let _ = std::fs::remove_dir_all(dir);
	}
}
