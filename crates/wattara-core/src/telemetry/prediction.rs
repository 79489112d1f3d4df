use tracing::debug;

use crate::api::{ClientError, SessionClient};
use crate::models::Prediction;

const PREDICTION_PATH: &str = "/prediction/run/";

/// Front end for the backend-hosted power model.
#[derive(Clone)]
pub struct PredictionService {
    client: SessionClient,
}

impl PredictionService {
    pub fn new(client: SessionClient) -> Self {
        Self { client }
    }

    pub async fn run_prediction(&self) -> Result<Prediction, ClientError> {
        let prediction: Prediction = self.client.get_json(PREDICTION_PATH).await?;
        debug!(predicted_power = prediction.predicted_power, "Prediction received");
        Ok(prediction)
    }
}
