//! Log-query gateway connector.
//!
//! The gateway fronts the log backend with a single `POST /query` endpoint
//! accepting `{log_group, query_text, time_range}` and answering
//! `{matches, total_count}`.

use crate::http::HttpClient;
use crate::traits::{
    Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult, LogQueryClient,
    LogQueryRequest, LogQueryResponse,
};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Log-query client over HTTP.
pub struct LogGatewayClient {
    name: String,
    client: HttpClient,
}

impl LogGatewayClient {
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let name = config.name.clone();
        let client = HttpClient::new(config)?;
        Ok(Self { name, client })
    }
}

#[async_trait]
impl Connector for LogGatewayClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> &str {
        "log_query"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get_json::<serde_json::Value>("health").await {
            Ok(_) => Ok(ConnectorHealth::Healthy),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl LogQueryClient for LogGatewayClient {
    #[instrument(skip(self, request), fields(log_group = %request.log_group))]
    async fn query(&self, request: LogQueryRequest) -> ConnectorResult<LogQueryResponse> {
        let response: LogQueryResponse = self
            .client
            .post_json("query", &request)
            .await
            .map_err(|e| match e {
                ConnectorError::NotFound(_) => {
                    ConnectorError::NotFound(format!("log group {}", request.log_group))
                }
                other => other,
            })?;

        debug!(
            matches = response.matches.len(),
            total = response.total_count,
            "Log query completed"
        );
        Ok(response)
    }
}
