//! Longest-prefix routing over snapshot-replaced registries.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::listener::prefix::{HostKind, ListenerPrefix};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Route<T> {
    prefix: ListenerPrefix,
    owner: T,
}

/// Maps request hosts and paths to the owner of the best matching prefix.
///
/// Lookups read an immutable snapshot and never wait on writers. Writers
/// copy the snapshot, change the copy and swap it in only if nobody else
/// swapped first, retrying otherwise.
#[derive(Debug)]
pub(crate) struct PrefixRouter<T> {
    exact: ArcSwap<HashMap<String, Vec<Route<T>>>>,
    strong: ArcSwap<Vec<Route<T>>>,
    weak: ArcSwap<Vec<Route<T>>>,
}

impl<T> Default for PrefixRouter<T> {
    fn default() -> Self {
        Self {
            exact: ArcSwap::from_pointee(HashMap::new()),
            strong: ArcSwap::from_pointee(Vec::new()),
            weak: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

/// Apply `change` to a copy of the current snapshot and swap it in.
///
/// `change` returns whether it modified the copy; unmodified copies are
/// not swapped.
fn update<V, F>(slot: &ArcSwap<V>, mut change: F) -> Result<bool>
where
    V: Clone,
    F: FnMut(&mut V) -> Result<bool>,
{
    loop {
        let current = slot.load_full();
        let mut next = (*current).clone();
        if !change(&mut next)? {
            return Ok(false);
        }
        let previous = slot.compare_and_swap(&current, Arc::new(next));
        if Arc::ptr_eq(&previous, &current) {
            return Ok(true);
        }
        log::trace!("prefix registry changed concurrently, retrying");
    }
}

impl<T: Clone + PartialEq> PrefixRouter<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `prefix` for `owner`.
    ///
    /// Registering an exact prefix twice for the same owner does nothing.
    pub(crate) fn register(&self, prefix: &ListenerPrefix, owner: T) -> Result<()> {
        let route = Route {
            prefix: prefix.clone(),
            owner,
        };
        match prefix.host_kind() {
            HostKind::Exact => {
                let host = prefix.host().to_ascii_lowercase();
                update(&self.exact, |map| {
                    let routes = map.entry(host.clone()).or_default();
                    match routes.iter().find(|r| r.prefix.path() == prefix.path()) {
                        Some(existing) if existing.owner == route.owner => Ok(false),
                        Some(_) => Err(Error::PrefixConflict(prefix.to_string())),
                        None => {
                            routes.push(route.clone());
                            Ok(true)
                        }
                    }
                })?;
            }
            HostKind::Strong | HostKind::Weak => {
                let slot = self.list(prefix.host_kind());
                update(slot, |routes| {
                    if routes.iter().any(|r| r.prefix.path() == prefix.path()) {
                        return Err(Error::PrefixConflict(prefix.to_string()));
                    }
                    routes.push(route.clone());
                    Ok(true)
                })?;
            }
        }
        log::debug!("registered prefix {}", prefix);
        Ok(())
    }

    /// Remove `prefix` if `owner` holds it. Returns whether it was removed.
    pub(crate) fn unregister(&self, prefix: &ListenerPrefix, owner: &T) -> bool {
        let matches = |r: &Route<T>| &r.prefix == prefix && &r.owner == owner;
        let removed = match prefix.host_kind() {
            HostKind::Exact => {
                let host = prefix.host().to_ascii_lowercase();
                update(&self.exact, |map| {
                    let routes = match map.get_mut(&host) {
                        Some(routes) => routes,
                        None => return Ok(false),
                    };
                    let before = routes.len();
                    routes.retain(|r| !matches(r));
                    let changed = routes.len() != before;
                    if routes.is_empty() {
                        map.remove(&host);
                    }
                    Ok(changed)
                })
            }
            kind => update(self.list(kind), |routes| {
                let before = routes.len();
                routes.retain(|r| !matches(r));
                Ok(routes.len() != before)
            }),
        };
        let removed = removed.unwrap_or(false);
        if removed {
            log::debug!("unregistered prefix {}", prefix);
        }
        removed
    }

    /// Whether no prefix is registered at all.
    pub(crate) fn is_empty(&self) -> bool {
        self.exact.load().is_empty() && self.strong.load().is_empty() && self.weak.load().is_empty()
    }

    /// Find the owner for a request to `host` (port ignored) and `path`.
    pub(crate) fn resolve(&self, host: &str, path: &str) -> Option<(T, ListenerPrefix)> {
        let host = strip_port(host).to_ascii_lowercase();
        let path = percent_decode(path);
        let slashed = if path.ends_with('/') {
            path.clone()
        } else {
            format!("{}/", path)
        };

        let exact = self.exact.load();
        if let Some(routes) = exact.get(&host) {
            if let Some(route) = best_match(routes, &path, &slashed) {
                return Some((route.owner.clone(), route.prefix.clone()));
            }
        }
        for kind in [HostKind::Strong, HostKind::Weak] {
            let routes = self.list(kind).load();
            if let Some(route) = best_match(&routes, &path, &slashed) {
                return Some((route.owner.clone(), route.prefix.clone()));
            }
        }
        None
    }

    fn list(&self, kind: HostKind) -> &ArcSwap<Vec<Route<T>>> {
        match kind {
            HostKind::Strong => &self.strong,
            _ => &self.weak,
        }
    }
}

/// Longest prefix path matching either form of the request path.
fn best_match<'a, T>(routes: &'a [Route<T>], path: &str, slashed: &str) -> Option<&'a Route<T>> {
    let mut best: Option<&Route<T>> = None;
    for route in routes {
        let candidate = route.prefix.path();
        if !(path.starts_with(candidate) || slashed.starts_with(candidate)) {
            continue;
        }
        if best.map_or(true, |b| candidate.len() > b.prefix.path().len()) {
            best = Some(route);
        }
    }
    best
}

fn strip_port(host: &str) -> &str {
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    match host.rfind(':') {
        Some(colon) => &host[..colon],
        None => host,
    }
}

fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1..i + 3].iter().all(u8::is_ascii_hexdigit)
        {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(uri: &str) -> ListenerPrefix {
        ListenerPrefix::parse(uri).unwrap()
    }

    #[test]
    fn longest_path_wins() {
        let router = PrefixRouter::new();
        router.register(&prefix("http://example.com:8080/a/"), 1).unwrap();
        router.register(&prefix("http://example.com:8080/a/b/"), 2).unwrap();

        let (owner, matched) = router.resolve("example.com:8080", "/a/b/c").unwrap();
        assert_eq!(owner, 2);
        assert_eq!(matched.path(), "/a/b/");

        let (owner, matched) = router.resolve("example.com:8080", "/a/x").unwrap();
        assert_eq!(owner, 1);
        assert_eq!(matched.path(), "/a/");
    }

    #[test]
    fn percent_escapes_need_two_hex_digits() {
        assert_eq!(percent_decode("/a%20b/%2F"), "/a b//");
        assert_eq!(percent_decode("/%+f/%zz/%4"), "/%+f/%zz/%4");
    }

    #[test]
    fn path_without_trailing_slash() {
        let router = PrefixRouter::new();
        router.register(&prefix("http://example.com/a/b/"), 2).unwrap();
        assert_eq!(router.resolve("example.com", "/a/b").unwrap().0, 2);
        assert!(router.resolve("example.com", "/a").is_none());
    }

    #[test]
    fn tiers_in_order() {
        let router = PrefixRouter::new();
        router.register(&prefix("http://*/"), "weak").unwrap();
        router.register(&prefix("http://+/api/"), "strong").unwrap();
        router.register(&prefix("http://example.com/"), "exact").unwrap();

        assert_eq!(router.resolve("EXAMPLE.com", "/api/x").unwrap().0, "exact");
        assert_eq!(router.resolve("other.org", "/api/x").unwrap().0, "strong");
        assert_eq!(router.resolve("other.org", "/x").unwrap().0, "weak");
    }

    #[test]
    fn conflicts() {
        let router = PrefixRouter::new();
        let exact = prefix("http://example.com/a/");
        router.register(&exact, 1).unwrap();
        router.register(&exact, 1).unwrap();
        assert!(matches!(
            router.register(&exact, 2),
            Err(Error::PrefixConflict(_))
        ));

        let weak = prefix("http://*/a/");
        router.register(&weak, 1).unwrap();
        assert!(matches!(
            router.register(&weak, 1),
            Err(Error::PrefixConflict(_))
        ));
    }

    #[test]
    fn unregister_by_owner() {
        let router = PrefixRouter::new();
        let p = prefix("http://+/a/");
        router.register(&p, 1).unwrap();
        assert!(!router.unregister(&p, &2));
        assert!(!router.is_empty());
        assert!(router.unregister(&p, &1));
        assert!(router.is_empty());
        assert!(router.resolve("example.com", "/a/").is_none());
    }

    #[test]
    fn decodes_paths() {
        let router = PrefixRouter::new();
        router.register(&prefix("http://+/hello world/"), 1).unwrap();
        assert_eq!(router.resolve("h", "/hello%20world/x").unwrap().0, 1);
    }

    #[test]
    fn concurrent_registration() {
        let router = Arc::new(PrefixRouter::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                std::thread::spawn(move || {
                    router
                        .register(&prefix(&format!("http://+/t{}/", i)), i)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..8 {
            assert_eq!(router.resolve("h", &format!("/t{}/", i)).unwrap().0, i);
        }
    }
}
