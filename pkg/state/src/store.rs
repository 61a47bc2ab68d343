use async_trait::async_trait;

/// Byte-oriented key/value backend under the local object client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store a value under the given key.
    async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Retrieve the value for a key, or `None` if it does not exist.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// List all key-value pairs whose keys start with `prefix`, in key order.
    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>>;
}
