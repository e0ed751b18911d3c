use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Tracks, per controlled server, whether a push is in flight and which
/// configuration version it last acknowledged.
///
/// Entries are created when a server is first seen and are never evicted.
#[derive(Clone, Debug, Default)]
pub struct Servers(Arc<RwLock<HashMap<String, ServerState>>>);

#[derive(Debug, Default)]
struct ServerState {
    updating: bool,
    version: u64,
}

/// Why a push was not started.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Skip {
    /// A previous push to the server has not completed.
    InFlight,

    /// The server already acknowledged this version or a later one.
    UpToDate,
}

/// An in-flight push. Dropping it clears the server's in-flight flag.
#[derive(Debug)]
pub struct Update {
    servers: Servers,
    server: String,
    version: u64,
}

// === impl Servers ===

impl Servers {
    /// Marks `server` as updating to `version`, unless a push is already in
    /// flight or the server is up to date.
    pub fn begin(&self, server: &str, version: u64) -> Result<Update, Skip> {
        let mut servers = self.0.write();
        let state = servers.entry(server.to_string()).or_default();
        if state.updating {
            return Err(Skip::InFlight);
        }
        if state.version >= version {
            return Err(Skip::UpToDate);
        }
        state.updating = true;
        Ok(Update {
            servers: self.clone(),
            server: server.to_string(),
            version,
        })
    }

    /// The last version `server` acknowledged.
    pub fn version(&self, server: &str) -> Option<u64> {
        self.0.read().get(server).map(|s| s.version)
    }

    pub fn is_updating(&self, server: &str) -> bool {
        self.0.read().get(server).is_some_and(|s| s.updating)
    }
}

// === impl Update ===

impl Update {
    /// Records that the server loaded this update's version.
    pub fn acknowledge(self) {
        if let Some(state) = self.servers.0.write().get_mut(&self.server) {
            state.version = state.version.max(self.version);
        }
    }
}

impl Drop for Update {
    fn drop(&mut self) {
        if let Some(state) = self.servers.0.write().get_mut(&self.server) {
            state.updating = false;
        }
    }
}
