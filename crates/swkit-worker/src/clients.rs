//! Pages controlled by the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::WorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A controlled (or controllable) page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Version tag of the worker controlling this client, if any.
    pub controller: Option<String>,
}

impl Client {
    /// A new, uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }

    /// Focus the client.
    pub fn focus(&mut self) -> Result<(), WorkerError> {
        if self.client_type != ClientType::Window {
            return Err(WorkerError::Client(format!(
                "cannot focus non-window client {}",
                self.id
            )));
        }
        self.focused = true;
        Ok(())
    }
}

/// Registry of clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients of `client_type` (every type when `None`), ordered by id.
    pub fn match_all(&self, client_type: Option<ClientType>) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| client_type.map_or(true, |t| c.client_type == t))
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Put every window client under the control of `version`.
    ///
    /// Returns how many clients changed controller.
    pub fn claim(&mut self, version: &str) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.client_type == ClientType::Window
                && client.controller.as_deref() != Some(version)
            {
                client.controller = Some(version.to_string());
                claimed += 1;
            }
        }
        claimed
    }

    /// Open a focused window client at `url`.
    pub fn open_window(&mut self, url: Url, controller: Option<String>) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        client.controller = controller;
        self.add(client.clone());
        client
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
