//! Shared client settings: header table, message catalog and the
//! unauthenticated hook.
//!
//! One [`ClientSettings`] is created by the host and handed to the
//! `NetworkClient` by `Arc`. Every request reads it at dispatch time, so a
//! header update is visible to requests still waiting on connectivity.
//!
//! Readers never hold a lock across a request: the header table is stored as
//! an `Arc<HashMap>` snapshot that writers replace in one step.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub const DEFAULT_TIMEOUT_MESSAGE: &str = "The connection has timed out, please try again";
pub const DEFAULT_NETWORK_ISSUES_MESSAGE: &str =
    "Unable to reach the server, please check your internet connection";
pub const DEFAULT_GENERIC_ERROR_MESSAGE: &str = "Something went wrong, please try again";

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared mutable set of headers applied to every outgoing request.
#[derive(Debug, Clone)]
pub struct HeaderTable {
    defaults: Arc<HashMap<String, String>>,
    current: Arc<RwLock<Arc<HashMap<String, String>>>>,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::with_defaults(default_headers())
    }
}

/// Headers every table starts with.
pub fn default_headers() -> HashMap<String, String> {
    HashMap::from([("accept".to_string(), "application/json".to_string())])
}

impl HeaderTable {
    /// Create a table that starts with, and resets to, `defaults`.
    pub fn with_defaults(defaults: HashMap<String, String>) -> Self {
        let defaults = Arc::new(defaults);
        Self {
            current: Arc::new(RwLock::new(Arc::clone(&defaults))),
            defaults,
        }
    }

    /// Latest committed headers.
    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        Arc::clone(&read(&self.current))
    }

    /// Merge `partial` into the table and return the merged result.
    ///
    /// New keys are added and existing keys overwritten; nothing is removed.
    pub fn update(&self, partial: HashMap<String, String>) -> HashMap<String, String> {
        let mut guard = write(&self.current);
        let mut merged = HashMap::clone(&guard);
        merged.extend(partial);
        *guard = Arc::new(merged.clone());
        debug!("Header table updated ({} entries)", merged.len());
        merged
    }

    /// Remove one header. Returns its previous value.
    pub fn remove(&self, name: &str) -> Option<String> {
        let mut guard = write(&self.current);
        if !guard.contains_key(name) {
            return None;
        }
        let mut next = HashMap::clone(&guard);
        let previous = next.remove(name);
        *guard = Arc::new(next);
        previous
    }

    /// Restore the defaults the table was created with.
    pub fn reset(&self) {
        *write(&self.current) = Arc::clone(&self.defaults);
        debug!("Header table reset to defaults");
    }
}

/// User-facing fallback messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCatalog {
    pub timeout_message: String,
    pub network_issues_message: String,
    pub generic_error_message: String,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            timeout_message: DEFAULT_TIMEOUT_MESSAGE.to_string(),
            network_issues_message: DEFAULT_NETWORK_ISSUES_MESSAGE.to_string(),
            generic_error_message: DEFAULT_GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Message catalog whose entries can be overridden and reset one by one.
#[derive(Debug, Default)]
pub struct Messages {
    catalog: RwLock<MessageCatalog>,
}

impl Messages {
    /// Copy of the current catalog.
    pub fn current(&self) -> MessageCatalog {
        read(&self.catalog).clone()
    }

    pub fn set_timeout_message(&self, message: impl Into<String>) {
        write(&self.catalog).timeout_message = message.into();
    }

    pub fn set_network_issues_message(&self, message: impl Into<String>) {
        write(&self.catalog).network_issues_message = message.into();
    }

    pub fn set_generic_error_message(&self, message: impl Into<String>) {
        write(&self.catalog).generic_error_message = message.into();
    }

    pub fn reset_timeout_message(&self) {
        write(&self.catalog).timeout_message = DEFAULT_TIMEOUT_MESSAGE.to_string();
    }

    pub fn reset_network_issues_message(&self) {
        write(&self.catalog).network_issues_message = DEFAULT_NETWORK_ISSUES_MESSAGE.to_string();
    }

    pub fn reset_generic_error_message(&self) {
        write(&self.catalog).generic_error_message = DEFAULT_GENERIC_ERROR_MESSAGE.to_string();
    }

    /// Reset every entry.
    pub fn reset(&self) {
        *write(&self.catalog) = MessageCatalog::default();
    }
}

/// Called when a request is classified as unauthorized.
pub type UnauthenticatedHook = Arc<dyn Fn() + Send + Sync>;

/// Configuration object shared by the host and the client.
#[derive(Default)]
pub struct ClientSettings {
    headers: HeaderTable,
    messages: Messages,
    on_unauthenticated: RwLock<Option<UnauthenticatedHook>>,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("headers", &self.headers.snapshot())
            .field("messages", &self.messages.current())
            .field("on_unauthenticated", &read(&self.on_unauthenticated).is_some())
            .finish()
    }
}

impl ClientSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings whose header table starts with (and resets to) `defaults`.
    pub fn with_default_headers(defaults: HashMap<String, String>) -> Self {
        Self {
            headers: HeaderTable::with_defaults(defaults),
            ..Self::default()
        }
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Merge headers into the shared table. See [`HeaderTable::update`].
    pub fn update_headers(&self, partial: HashMap<String, String>) -> HashMap<String, String> {
        self.headers.update(partial)
    }

    pub fn remove_header(&self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    pub fn reset_headers(&self) {
        self.headers.reset()
    }

    /// Install the hook run on unauthorized responses.
    pub fn set_unauthenticated_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *write(&self.on_unauthenticated) = Some(Arc::new(hook));
    }

    pub fn clear_unauthenticated_hook(&self) {
        *write(&self.on_unauthenticated) = None;
    }

    /// Run the hook, if any. The lock is released before the hook runs.
    pub(crate) fn notify_unauthenticated(&self) {
        let hook = read(&self.on_unauthenticated).clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}
