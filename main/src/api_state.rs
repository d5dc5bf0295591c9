use std::sync::Arc;

use retrieval_pipeline::RagService;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<RagService>,
}

impl ApiState {
    pub fn new(service: Arc<RagService>) -> Self {
        Self { service }
    }
}
