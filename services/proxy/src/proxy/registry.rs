//! Registry of running proxies keyed by listen port.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;

use super::instance::{InstanceConfig, ProxyInstance, DEFAULT_DIAL_TIMEOUT};
use crate::error::ProxyError;

/// Settings shared by every instance a registry starts.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Interface listeners bind on.
    pub bind_ip: IpAddr,
    /// Timeout for dialing the forward target.
    pub dial_timeout: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// Owns every running proxy. At most one instance exists per listen port.
pub struct ProxyRegistry {
    options: ProxyOptions,
    proxies: RwLock<HashMap<u16, Arc<ProxyInstance>>>,
}

impl ProxyRegistry {
    pub fn new(options: ProxyOptions) -> Self {
        Self {
            options,
            proxies: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Bind `listen_port` and start relaying to `forward_host:forward_port`.
    ///
    /// The bind happens under the write lock so two concurrent starts for
    /// the same port cannot both succeed.
    pub async fn start(
        &self,
        listen_port: u16,
        forward_host: &str,
        forward_port: u16,
        capture_limit: usize,
    ) -> Result<Arc<ProxyInstance>, ProxyError> {
        let mut proxies = self.proxies.write().await;

        if proxies.contains_key(&listen_port) {
            return Err(ProxyError::AlreadyRunning { port: listen_port });
        }

        let instance = ProxyInstance::bind(InstanceConfig {
            bind_ip: self.options.bind_ip,
            listen_port,
            forward_host: forward_host.to_string(),
            forward_port,
            capture_limit,
            dial_timeout: self.options.dial_timeout,
        })
        .await?;

        instance.start();
        let instance = Arc::new(instance);
        proxies.insert(listen_port, Arc::clone(&instance));

        info!(
            listen_port,
            forward_to = %instance.forward_to(),
            capture_limit = instance.buffer().max_bytes(),
            "Started proxy"
        );

        Ok(instance)
    }

    /// Stop the instance on `listen_port`. Returns its final captured byte count.
    ///
    /// The port is free for a new `start` once this returns.
    pub async fn stop(&self, listen_port: u16) -> Result<u64, ProxyError> {
        let instance = self
            .proxies
            .write()
            .await
            .remove(&listen_port)
            .ok_or(ProxyError::NotFound { port: listen_port })?;

        instance.shutdown().await;
        let bytes_captured = instance.stats().bytes_captured;

        info!(listen_port, bytes_captured, "Stopped proxy");
        Ok(bytes_captured)
    }

    pub async fn get(&self, listen_port: u16) -> Option<Arc<ProxyInstance>> {
        self.proxies.read().await.get(&listen_port).cloned()
    }

    /// Every running instance, in no particular order.
    pub async fn get_all(&self) -> Vec<Arc<ProxyInstance>> {
        self.proxies.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.proxies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.proxies.read().await.is_empty()
    }

    /// Stop everything. Used at process teardown.
    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.proxies.write().await.drain().collect();

        for (listen_port, instance) in drained {
            instance.shutdown().await;
            info!(listen_port, "Stopped proxy");
        }
    }
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self::new(ProxyOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn registry() -> ProxyRegistry {
        ProxyRegistry::new(ProxyOptions {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dial_timeout: Duration::from_millis(500),
        })
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn start_twice_on_same_port() {
        let registry = registry();
        let port = free_port().await;

        registry.start(port, "localhost", 9, 0).await.unwrap();

        match registry.start(port, "localhost", 10, 0).await {
            Err(ProxyError::AlreadyRunning { port: p }) => assert_eq!(p, port),
            other => panic!("expected AlreadyRunning, got {:?}", other.map(|_| ())),
        }

        let all = registry.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].forward_port(), 9);

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn stop_unknown_port() {
        let registry = registry();
        let port = free_port().await;
        registry.start(port, "localhost", 9, 0).await.unwrap();

        let unknown = port.wrapping_add(1);
        assert!(matches!(
            registry.stop(unknown).await,
            Err(ProxyError::NotFound { .. })
        ));
        assert_eq!(registry.len().await, 1);

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn bind_failure_surfaces_os_reason() {
        let registry = registry();
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        match registry.start(port, "localhost", 9, 0).await {
            Err(ProxyError::Bind { port: p, source }) => {
                assert_eq!(p, port);
                assert_eq!(source.kind(), std::io::ErrorKind::AddrInUse);
            }
            other => panic!("expected Bind error, got {:?}", other.map(|_| ())),
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stop_returns_bytes_and_removes_entry() {
        let registry = registry();
        let port = free_port().await;
        registry.start(port, "localhost", 9, 0).await.unwrap();

        assert_eq!(registry.stop(port).await.unwrap(), 0);
        assert!(registry.get(port).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stop_all_clears_everything() {
        let registry = registry();
        for _ in 0..3 {
            let port = free_port().await;
            registry.start(port, "localhost", 9, 0).await.unwrap();
        }
        assert_eq!(registry.len().await, 3);

        registry.stop_all().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn independent_registries() {
        let a = registry();
        let b = registry();
        let port = free_port().await;

        a.start(port, "localhost", 9, 0).await.unwrap();
        assert!(b.get(port).await.is_none());
        assert!(matches!(
            b.stop(port).await,
            Err(ProxyError::NotFound { .. })
        ));

        a.stop_all().await;
    }
}
