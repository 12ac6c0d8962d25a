use crate::error::BlobStoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Object storage boundary the blob writer and load stage depend on.
/// `create_bucket`/`delete_bucket` are expected to tolerate the bucket
/// already being in the desired state, since both are called unconditionally
/// on every app lifecycle transition.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> Result<(), BlobStoreError>;
    async fn delete_bucket(&self, bucket: &str) -> Result<(), BlobStoreError>;
    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobStoreError>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError>;

    /// The URI form the warehouse's load job accepts as a source, e.g.
    /// `gs://bucket/key`.
    fn object_uri(&self, bucket: &str, key: &str) -> String {
        format!("gs://{bucket}/{key}")
    }
}

/// In-process reference implementation used by the bundled demo and tests.
#[derive(Default)]
pub struct InMemoryBlobStore {
    buckets: Mutex<std::collections::HashSet<String>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), BlobStoreError> {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BlobStoreError> {
        self.buckets.lock().unwrap().remove(bucket);
        let mut objects = self.objects.lock().unwrap();
        objects.retain(|(b, _), _| b != bucket);
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        if !self.buckets.lock().unwrap().contains(bucket) {
            return Err(BlobStoreError::BucketNotFound(bucket.to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BlobStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Production adapter over Google Cloud Storage.
pub struct GcsBlobStore {
    client: google_cloud_storage::client::Client,
}

impl GcsBlobStore {
    pub fn new(client: google_cloud_storage::client::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), BlobStoreError> {
        use google_cloud_storage::http::buckets::insert::{BucketCreationConfig, InsertBucketRequest};

        let req = InsertBucketRequest {
            name: bucket.to_string(),
            bucket: BucketCreationConfig::default(),
            ..Default::default()
        };
        match self.client.insert_bucket(&req).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("409") => Ok(()),
            Err(e) => Err(BlobStoreError::Transport(e.to_string())),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BlobStoreError> {
        use google_cloud_storage::http::buckets::delete::DeleteBucketRequest;

        let req = DeleteBucketRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        match self.client.delete_bucket(&req).await {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("404") => Ok(()),
            Err(e) => Err(BlobStoreError::Transport(e.to_string())),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};

        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        let media = Media::new(key.to_string());
        self.client
            .upload_object(&req, bytes, &UploadType::Simple(media))
            .await
            .map_err(|e| BlobStoreError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        use google_cloud_storage::http::objects::download::Range;
        use google_cloud_storage::http::objects::get::GetObjectRequest;

        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };
        self.client
            .download_object(&req, &Range::default())
            .await
            .map_err(|e| BlobStoreError::Transport(e.to_string()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        use google_cloud_storage::http::objects::delete::DeleteObjectRequest;

        let req = DeleteObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };
        self.client
            .delete_object(&req)
            .await
            .map_err(|e| BlobStoreError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryBlobStore::new();
        store.create_bucket("staging").await.unwrap();
        store.put_object("staging", "a/b", vec![1, 2, 3]).await.unwrap();
        let got = store.get_object("staging", "a/b").await.unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn get_missing_object_errors() {
        let store = InMemoryBlobStore::new();
        store.create_bucket("staging").await.unwrap();
        let err = store.get_object("staging", "missing").await.unwrap_err();
        assert!(matches!(err, BlobStoreError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn put_into_unknown_bucket_errors() {
        let store = InMemoryBlobStore::new();
        let err = store.put_object("nope", "a", vec![]).await.unwrap_err();
        assert!(matches!(err, BlobStoreError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn delete_bucket_drops_its_objects() {
        let store = InMemoryBlobStore::new();
        store.create_bucket("staging").await.unwrap();
        store.put_object("staging", "a", vec![1]).await.unwrap();
        store.delete_bucket("staging").await.unwrap();
        store.create_bucket("staging").await.unwrap();
        assert!(store.get_object("staging", "a").await.is_err());
    }
}
