use std::sync::Arc;

use crate::metrics::Metrics;
use crate::predict::PredictionClient;

#[derive(Clone)]
pub struct AppState {
    pub client: PredictionClient,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(client: PredictionClient) -> Self {
        Self {
            client,
            metrics: Arc::new(Metrics::default()),
        }
    }
}
