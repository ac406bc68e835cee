use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::access_repository::AccessRepository;
use crate::application::ports::document_repository::DocumentRepository;
use crate::application::ports::object_store_port::ObjectStorePort;
use crate::application::ports::user_repository::UserRepository;
use crate::application::services::realtime::assembler::DocumentAssembler;
use crate::application::session::{SessionDeps, SessionSettings};
use crate::bootstrap::config::Config;

impl From<&Config> for SessionSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            ping_interval: Duration::from_secs(cfg.ping_interval_secs.max(1)),
            touch_stale: Duration::from_secs(cfg.touch_stale_secs),
            summarize_delay: Duration::from_secs(cfg.summarize_delay_secs),
            audit_flush_interval: Duration::from_secs(cfg.audit_flush_interval_secs.max(1)),
        }
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub cfg: Config,
    services: Arc<AppServices>,
}

pub struct AppServices {
    session: SessionDeps,
    user_repo: Arc<dyn UserRepository>,
}

impl AppServices {
    pub fn new(session: SessionDeps, user_repo: Arc<dyn UserRepository>) -> Self {
        Self { session, user_repo }
    }
}

impl AppContext {
    pub fn new(cfg: Config, services: AppServices) -> Self {
        Self {
            cfg,
            services: Arc::new(services),
        }
    }

    /// Dependencies handed to every new WebSocket session.
    pub fn session_deps(&self) -> SessionDeps {
        self.services.session.clone()
    }

    pub fn assembler(&self) -> &DocumentAssembler {
        &self.services.session.assembler
    }

    pub fn access_repo(&self) -> Arc<dyn AccessRepository> {
        self.services.session.access.clone()
    }

    pub fn document_repo(&self) -> Arc<dyn DocumentRepository> {
        self.services.session.documents.clone()
    }

    pub fn user_repo(&self) -> Arc<dyn UserRepository> {
        self.services.user_repo.clone()
    }

    pub fn object_store(&self) -> Arc<dyn ObjectStorePort> {
        self.services.session.objects.clone()
    }
}
