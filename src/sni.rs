// Copyright (c) 2024-2026, The SNet Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{ErrKind, Error};
use crate::err;
use crate::tls::TlsListenConfig;
use log::{debug, warn};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::{any_supported_type, CertifiedKey};
use rustls::{Certificate, PrivateKey};
use std::sync::Arc;

/// Case-insensitive glob match with `*` (any run, including empty) and `?`
/// (exactly one character). Matching is per byte on the lowercased name.
pub(crate) fn wildcard_match(pattern: &str, name: &str) -> bool {
	fn matches(pattern: &[u8], name: &[u8]) -> bool {
		match (pattern.first(), name.first()) {
			(None, None) => true,
			(Some(b'*'), _) => {
				matches(&pattern[1..], name)
					|| (!name.is_empty() && matches(pattern, &name[1..]))
			}
			(Some(b'?'), Some(_)) => matches(&pattern[1..], &name[1..]),
			(Some(p), Some(n)) if p == n => matches(&pattern[1..], &name[1..]),
			_ => false,
		}
	}
	matches(
		pattern.to_ascii_lowercase().as_bytes(),
		name.to_ascii_lowercase().as_bytes(),
	)
}

struct ResolverEntry {
	patterns: Vec<String>,
	key: Arc<CertifiedKey>,
}

impl ResolverEntry {
	fn matches(&self, name: &str) -> bool {
		self.patterns.iter().any(|pattern| wildcard_match(pattern, name))
	}
}

/// Certificate selection by requested server name. The default entry is
/// consulted first, then the auxiliary domains in configuration order;
/// without a match the default is served unless `force_sni` aborts the
/// handshake instead. Patterns come from configuration, not from parsing
/// the certificates.
pub(crate) struct SniResolver {
	default: ResolverEntry,
	domains: Vec<ResolverEntry>,
	force_sni: bool,
}

fn certified(certs: &[Certificate], key: &PrivateKey) -> Result<Arc<CertifiedKey>, Error> {
	let signing = any_supported_type(key)
		.map_err(|e| err!(ErrKind::Configuration, "unusable private key: {}", e))?;
	Ok(Arc::new(CertifiedKey::new(certs.to_vec(), signing)))
}

impl SniResolver {
	pub(crate) fn build(config: &TlsListenConfig) -> Result<Self, Error> {
		if config.certs.is_empty() {
			return Err(err!(ErrKind::Configuration, "no default certificate configured"));
		}
		let default = ResolverEntry {
			patterns: config.patterns.clone(),
			key: certified(&config.certs, &config.key)?,
		};
		let mut domains = vec![];
		for entry in config.sni.iter() {
			domains.push(ResolverEntry {
				patterns: entry.patterns.clone(),
				key: certified(&entry.certs, &entry.key)?,
			});
		}
		Ok(Self {
			default,
			domains,
			force_sni: config.force_sni,
		})
	}

	fn lookup(&self, name: Option<&str>) -> Option<Arc<CertifiedKey>> {
		match name {
			Some(name) => {
				if self.default.matches(name) {
					debug!("sni '{}' served by the default certificate", name);
					return Some(self.default.key.clone());
				}
				for entry in self.domains.iter() {
					if entry.matches(name) {
						debug!("sni '{}' matched a configured domain", name);
						return Some(entry.key.clone());
					}
				}
				if self.force_sni {
					warn!("sni '{}' matched nothing, refusing handshake", name);
					None
				} else {
					debug!("sni '{}' matched nothing, falling back to default", name);
					Some(self.default.key.clone())
				}
			}
			None => {
				if self.force_sni {
					warn!("no sni sent, refusing handshake");
					None
				} else {
					Some(self.default.key.clone())
				}
			}
		}
	}
}

impl ResolvesServerCert for SniResolver {
	fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
		self.lookup(client_hello.server_name())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::Error;

	#[test]
	fn test_wildcard_match() -> Result<(), Error> {
		assert!(wildcard_match("*.example.com", "a.example.com"));
		assert!(wildcard_match("*.example.com", "deep.sub.example.com"));
		assert!(!wildcard_match("*.example.com", "example.com"));
		assert!(wildcard_match("?.example.com", "a.example.com"));
		assert!(!wildcard_match("?.example.com", "ab.example.com"));
		assert!(wildcard_match("example.com", "EXAMPLE.COM"));
		assert!(wildcard_match("*", "anything.at.all"));
		assert!(wildcard_match("*", ""));
		assert!(!wildcard_match("", "x"));
		assert!(wildcard_match("a*b*c", "aXXbYYc"));
		assert!(!wildcard_match("a*b*c", "aXXbYY"));
		Ok(())
	}

	fn listen_config(patterns: &[&str], force_sni: bool) -> Result<TlsListenConfig, Error> {
		let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
			.map_err(|e| err!(ErrKind::Configuration, "rcgen: {}", e))?;
		let certs = vec![Certificate(
			generated
				.serialize_der()
				.map_err(|e| err!(ErrKind::Configuration, "rcgen: {}", e))?,
		)];
		let key = PrivateKey(generated.serialize_private_key_der());
		let mut config = TlsListenConfig::new(certs, key);
		config.patterns = patterns.iter().map(|p| p.to_string()).collect();
		config.force_sni = force_sni;
		Ok(config)
	}

	#[test]
	fn test_resolver_lookup_order() -> Result<(), Error> {
		let mut config = listen_config(&["localhost"], false)?;
		let aux = rcgen::generate_simple_self_signed(vec!["x.example.com".to_string()])
			.map_err(|e| err!(ErrKind::Configuration, "rcgen: {}", e))?;
		config.sni.push(crate::tls::SniEntry {
			patterns: vec!["*.example.com".to_string()],
			certs: vec![Certificate(
				aux.serialize_der()
					.map_err(|e| err!(ErrKind::Configuration, "rcgen: {}", e))?,
			)],
			key: PrivateKey(aux.serialize_private_key_der()),
		});

		let resolver = SniResolver::build(&config)?;
		assert!(resolver.lookup(Some("localhost")).is_some());
		assert!(resolver.lookup(Some("a.example.com")).is_some());
		// no match falls back to the default
		assert!(resolver.lookup(Some("nomatch.net")).is_some());
		assert!(resolver.lookup(None).is_some());
		Ok(())
	}

	#[test]
	fn test_resolver_force_sni() -> Result<(), Error> {
		let config = listen_config(&["*.example.com"], true)?;
		let resolver = SniResolver::build(&config)?;
		assert!(resolver.lookup(Some("a.example.com")).is_some());
		assert!(resolver.lookup(Some("other.net")).is_none());
		assert!(resolver.lookup(None).is_none());
		Ok(())
	}
}
