use std::sync::Arc;

use crate::application::service::CompileService;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<CompileService>,
}

impl ApiState {
    pub fn new(service: Arc<CompileService>) -> Self {
        Self { service }
    }
}
