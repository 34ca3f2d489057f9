use std::sync::Arc;

use crate::application::gateway::RenderGateway;

#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Arc<RenderGateway>,
}

impl GatewayState {
    pub fn new(gateway: RenderGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}
