use crate::domain::{DomainError, DomainResult, Integration, IntegrationKind, IntegrationRepository};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct PostgresIntegrationRepository {
    client: PostgresClient,
}

impl PostgresIntegrationRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntegrationRepository for PostgresIntegrationRepository {
    #[instrument(skip(self), fields(application_id = %application_id))]
    async fn list_integrations(&self, application_id: i64) -> DomainResult<Vec<Integration>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                "SELECT id, application_id, kind, settings
                 FROM integration
                 WHERE application_id = $1
                 ORDER BY id",
                &[&application_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let integrations: Vec<Integration> = rows
            .into_iter()
            .filter_map(|row| {
                let id: i64 = row.get(0);
                let kind: String = row.get(2);
                match kind.parse::<IntegrationKind>() {
                    Ok(kind) => Some(Integration {
                        id,
                        application_id: row.get(1),
                        kind,
                        settings: row.get(3),
                    }),
                    Err(e) => {
                        warn!(integration_id = id, error = %e, "skipping integration with unknown kind");
                        None
                    }
                }
            })
            .collect();

        debug!(count = integrations.len(), "listed integrations");
        Ok(integrations)
    }
}
