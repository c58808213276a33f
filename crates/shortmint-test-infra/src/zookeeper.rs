use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const CLIENT_PORT: u16 = 2181;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ZooKeeperConfig {
    #[builder(default = "3.9".to_string(), setter(into))]
    tag: String,
    /// Server-side session timeout bounds, in milliseconds.
    #[builder(default = 4_000)]
    min_session_timeout_ms: u32,
}

impl Default for ZooKeeperConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Test fixture for a disposable standalone ZooKeeper server.
pub struct ZooKeeperServer {
    container: ContainerAsync<GenericImage>,
}

impl ZooKeeperServer {
    /// Starts a ZooKeeper container and waits until it accepts clients.
    pub async fn new(config: ZooKeeperConfig) -> Result<Self> {
        let container = GenericImage::new("zookeeper", config.tag.as_str())
            .with_exposed_port(CLIENT_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("binding to port"))
            .with_env_var(
                "ZOO_CFG_EXTRA",
                format!("minSessionTimeout={}", config.min_session_timeout_ms),
            )
            .start()
            .await?;

        Ok(Self { container })
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(CLIENT_PORT).await?)
    }

    /// Address to hand to a ZooKeeper client, `host:port`.
    pub async fn connect_string(&self) -> Result<String> {
        let host = self.host().await?;
        let port = self.port().await?;
        Ok(format!("{host}:{port}"))
    }

    /// Returns the underlying container reference.
    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
