//! Redis test infrastructure

use redis::Client;
use redis::aio::MultiplexedConnection;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Redis 8 (alpine) container for one test.
///
/// The container is stopped and removed when this struct is dropped, so every
/// test gets an empty keyspace.
///
/// ```no_run
/// use test_utils::TestRedis;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let url = redis.connection_string();
/// // hand `url` to the code under test
/// # }
/// ```
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection: MultiplexedConnection,
    connection_string: String,
}

impl TestRedis {
    /// Start a container and wait until it accepts connections.
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let client =
            Client::open(connection_string.clone()).expect("Failed to create Redis client");
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready");

        Self {
            container,
            connection,
            connection_string,
        }
    }

    /// Raw connection for assertions on keys written by the code under test.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// `redis://` URL of the container
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::AsyncCommands;

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_container_starts_empty() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection();

        let keys: Vec<String> = conn.keys("*").await.unwrap();
        assert!(keys.is_empty());

        conn.set::<_, _, ()>("probe", "1").await.unwrap();
        let value: String = conn.get("probe").await.unwrap();
        assert_eq!(value, "1");
    }
}
