//! Shared fixtures for the integration tests

use async_trait::async_trait;
use cloudplug_core::{Iid, Lookup, NameMatching, ResourceKind, Result, Scope};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub zone: String,
}

pub fn server(id: &str, name: &str, zone: &str) -> Server {
    Server {
        id: id.into(),
        name: name.into(),
        zone: zone.into(),
    }
}

/// In-memory lookup over a fixed set of servers
pub struct ServerLookup {
    pub servers: Mutex<Vec<Server>>,
    pub lists: AtomicUsize,
    pub creates: AtomicUsize,
}

impl ServerLookup {
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers: Mutex::new(servers),
            lists: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
        }
    }

    pub fn create(&self, name: &str, zone: &str) -> Server {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut servers = self.servers.lock().unwrap();
        let created = server(&format!("i-{}", servers.len() + 1), name, zone);
        servers.push(created.clone());
        created
    }

    pub fn remove(&self, id: &str) {
        self.servers.lock().unwrap().retain(|s| s.id != id);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lookup for ServerLookup {
    type Resource = Server;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
    }

    async fn fetch_by_id(&self, _scope: &Scope, id: &str) -> Result<Option<Server>> {
        Ok(self.servers.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn list(&self, _scope: &Scope) -> Result<Vec<Server>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.servers.lock().unwrap().clone())
    }

    fn iid_of(&self, server: &Server) -> Iid {
        Iid::new(&server.name, &server.id)
    }

    fn zone_of(&self, server: &Server) -> Option<String> {
        Some(server.zone.clone())
    }

    fn name_matching(&self) -> NameMatching {
        NameMatching::CaseInsensitive
    }
}
