use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

/// A client was refused by a [`ClientFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Why the client was refused.
    pub reason: String,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client rejected: {}", self.reason)
    }
}

impl std::error::Error for Rejected {}

/// Decides, once per request, whether a client address may be served.
pub trait ClientFilter: Send + Sync + fmt::Debug {
    /// Accept or refuse `addr`.
    fn check_client(&self, addr: IpAddr) -> Result<(), Rejected>;

    /// Refuse `addr` from now on. Returns whether anything changed.
    fn try_ban(&self, _addr: IpAddr) -> bool {
        false
    }

    /// Lift a ban on `addr`. Returns whether anything changed.
    fn try_unban(&self, _addr: IpAddr) -> bool {
        false
    }
}

/// Serves everyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ClientFilter for AllowAll {
    fn check_client(&self, _addr: IpAddr) -> Result<(), Rejected> {
        Ok(())
    }
}

/// Refuses addresses that were explicitly banned.
#[derive(Debug)]
pub struct BanList {
    banned: async_dup::Mutex<HashSet<IpAddr>>,
}

impl BanList {
    /// An empty ban list.
    pub fn new() -> Self {
        Self {
            banned: async_dup::Mutex::new(HashSet::new()),
        }
    }
}

impl Default for BanList {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFilter for BanList {
    fn check_client(&self, addr: IpAddr) -> Result<(), Rejected> {
        if self.banned.lock().contains(&addr) {
            return Err(Rejected {
                reason: format!("{} is banned", addr),
            });
        }
        Ok(())
    }

    fn try_ban(&self, addr: IpAddr) -> bool {
        self.banned.lock().insert(addr)
    }

    fn try_unban(&self, addr: IpAddr) -> bool {
        self.banned.lock().remove(&addr)
    }
}
