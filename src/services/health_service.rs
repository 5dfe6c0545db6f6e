use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::proto::health::{
    health_check_response::ServingStatus, health_server::Health, HealthCheckRequest,
    HealthCheckResponse,
};

#[derive(Debug, Default)]
pub struct HealthServiceImpl;

impl HealthServiceImpl {
    pub fn new() -> Self {
        Self
    }

    fn serving() -> HealthCheckResponse {
        HealthCheckResponse {
            status: ServingStatus::Serving.into(),
        }
    }
}

#[tonic::async_trait]
impl Health for HealthServiceImpl {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(Self::serving()))
    }

    type WatchStream = ReceiverStream<Result<HealthCheckResponse, Status>>;

    async fn watch(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        // Capacity 1 and an empty channel, so this never fails
        let _ = tx.try_send(Ok(Self::serving()));
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_check_reports_serving() {
        let svc = HealthServiceImpl::new();
        let resp = svc
            .check(Request::new(HealthCheckRequest::default()))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().status, ServingStatus::Serving as i32);
    }

    #[tokio::test]
    async fn test_watch_emits_serving_then_ends() {
        let svc = HealthServiceImpl::new();
        let mut stream = svc
            .watch(Request::new(HealthCheckRequest {
                service: "tenantry.workspace.WorkspaceService".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, ServingStatus::Serving as i32);
        assert!(stream.next().await.is_none());
    }
}
