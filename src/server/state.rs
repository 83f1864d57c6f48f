//! Shared server state handed to every route handler.

use std::sync::Arc;

use crate::jobs::JobDispatcher;
use crate::server::websocket::ConnectionManager;
use crate::store::SessionStore;

#[derive(Clone)]
pub struct ServerState {
    pub dispatcher: Arc<JobDispatcher>,
    pub store: Arc<dyn SessionStore>,
    pub connections: Arc<ConnectionManager>,
}

impl ServerState {
    pub fn new(
        dispatcher: Arc<JobDispatcher>,
        store: Arc<dyn SessionStore>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            dispatcher,
            store,
            connections,
        }
    }
}
