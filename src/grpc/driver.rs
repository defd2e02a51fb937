//! DriverService gRPC server.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::proto::driver_service_server::DriverService as DriverServiceRpc;
use crate::proto::{
    RegisterDriverRequest, RegisterDriverResponse, UnregisterDriverRequest,
    UnregisterDriverResponse,
};
use crate::services::DriverService;

pub struct DriverGrpcServer {
    service: Arc<DriverService>,
}

impl DriverGrpcServer {
    pub fn new(service: Arc<DriverService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl DriverServiceRpc for DriverGrpcServer {
    async fn register_driver(
        &self,
        request: Request<RegisterDriverRequest>,
    ) -> Result<Response<RegisterDriverResponse>, Status> {
        let req = request.into_inner();
        let driver = self
            .service
            .register(&req.driver_id, &req.package_slug)
            .await?;

        Ok(Response::new(RegisterDriverResponse {
            driver: Some(driver.into()),
        }))
    }

    async fn unregister_driver(
        &self,
        request: Request<UnregisterDriverRequest>,
    ) -> Result<Response<UnregisterDriverResponse>, Status> {
        let removed = self
            .service
            .unregister(&request.into_inner().driver_id)
            .await?;

        Ok(Response::new(UnregisterDriverResponse { removed }))
    }
}
