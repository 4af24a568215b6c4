use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use nf_sync_proto::config_service_client::ConfigServiceClient;
use nf_sync_proto::{NetworkSliceRequest, NetworkSliceResponse};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use super::{StreamConfig, StreamError};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Stream of slice responses delivered by a subscription.
pub type SliceStream = BoxStream<'static, Result<NetworkSliceResponse, StreamError>>;

/// Establishes connections to the configuration distributor.
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ConfigConnection>, StreamError>;
}

/// One established connection on which subscriptions can be opened.
#[async_trait]
pub trait ConfigConnection: Send {
    async fn subscribe(&mut self, request: NetworkSliceRequest)
        -> Result<SliceStream, StreamError>;
}

/// gRPC transport with HTTP/2 keepalive.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    endpoint: Endpoint,
}

impl GrpcTransport {
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|_| StreamError::InvalidEndpoint(config.endpoint.clone()))?
            .connect_timeout(config.connect_timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl ConfigTransport for GrpcTransport {
    async fn connect(&self) -> Result<Box<dyn ConfigConnection>, StreamError> {
        debug!(endpoint = %self.endpoint.uri(), "connecting to configuration service");
        let channel = self.endpoint.connect().await?;
        Ok(Box::new(GrpcConnection {
            client: ConfigServiceClient::new(channel),
        }))
    }
}

struct GrpcConnection {
    client: ConfigServiceClient<Channel>,
}

#[async_trait]
impl ConfigConnection for GrpcConnection {
    async fn subscribe(
        &mut self,
        request: NetworkSliceRequest,
    ) -> Result<SliceStream, StreamError> {
        let response = self.client.network_slice_subscribe(request).await?;
        Ok(response.into_inner().map_err(StreamError::from).boxed())
    }
}
