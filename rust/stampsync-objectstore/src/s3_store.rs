//! S3-compatible `ObjectStore` backed by the `object_store` crate.
//!
//! The async client is driven through a private current-thread runtime, one
//! request at a time, so the store keeps the synchronous contract of the trait.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::{StreamExt, TryStreamExt, future};
use object_store::{
    Attribute, Attributes, GetOptions, ObjectMeta, ObjectStore as AsyncObjectStore, PutOptions,
    PutPayload,
    aws::{AmazonS3, AmazonS3Builder},
    path::Path as StorePath,
};
use stampsync_common::async_runtime::BlockingRuntime;

use crate::{
    ListPage, ObjectInfo, ObjectMetadata, ObjectStore, PutMode, invalid_input, uri::ObjectUri,
};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Connection settings of an S3-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    /// Custom endpoint (e.g. an on-premise S3 gateway). `None` uses AWS.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Set when the endpoint honors create-only writes (`If-None-Match: *`).
    pub conditional_put: bool,
}

pub struct S3ObjectStore {
    settings: S3Settings,
    runtime: BlockingRuntime,
    clients: Mutex<HashMap<String, Arc<AmazonS3>>>,
    page_size: usize,
}

impl S3ObjectStore {
    pub fn new(settings: S3Settings) -> std::io::Result<S3ObjectStore> {
        Ok(S3ObjectStore {
            settings,
            runtime: BlockingRuntime::new()?,
            clients: Mutex::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> S3ObjectStore {
        self.page_size = page_size.max(1);
        self
    }

    fn client(&self, bucket: &str) -> std::io::Result<Arc<AmazonS3>> {
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(endpoint) = &self.settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        if let Some(region) = &self.settings.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key) = &self.settings.access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &self.settings.secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        let client = Arc::new(builder.build().map_err(into_io)?);
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }

    fn info(&self, bucket: &str, meta: ObjectMeta) -> std::io::Result<ObjectInfo> {
        let uri = ObjectUri::new(bucket, meta.location.as_ref())
            .map_err(|e| invalid_input("list", e))?;
        Ok(ObjectInfo {
            uri,
            size: meta.size as u64,
            last_modified: Some(meta.last_modified),
            etag: meta.e_tag,
        })
    }
}

fn store_path(uri: &ObjectUri) -> std::io::Result<StorePath> {
    StorePath::parse(uri.key()).map_err(|e| invalid_input("s3", e))
}

fn user_metadata(attributes: &Attributes) -> ObjectMetadata {
    attributes
        .iter()
        .filter_map(|(attribute, value)| match attribute {
            Attribute::Metadata(key) => {
                let value: &str = value;
                Some((key.to_string(), value.to_string()))
            }
            _ => None,
        })
        .collect()
}

fn into_io(e: object_store::Error) -> std::io::Error {
    match e {
        object_store::Error::NotFound { .. } => {
            std::io::Error::new(std::io::ErrorKind::NotFound, e)
        }
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, e)
        }
        e => std::io::Error::other(e),
    }
}

impl ObjectStore for S3ObjectStore {
    fn list_page(
        &self,
        prefix: &ObjectUri,
        continuation: Option<&str>,
    ) -> std::io::Result<ListPage> {
        let client = self.client(prefix.bucket())?;
        // Listing prefixes are segment-aligned; the raw key prefix is applied
        // as a filter on top.
        let container = prefix.container_key().trim_end_matches('/');
        let container = if container.is_empty() {
            None
        } else {
            Some(StorePath::parse(container).map_err(|e| invalid_input("list", e))?)
        };
        let key_prefix = prefix.key().to_string();

        let stream = match continuation {
            Some(after) => {
                let offset = StorePath::parse(after).map_err(|e| invalid_input("list", e))?;
                client.list_with_offset(container.as_ref(), &offset)
            }
            None => client.list(container.as_ref()),
        };
        let metas: Vec<ObjectMeta> = self
            .runtime
            .block_on(
                stream
                    .try_filter(|meta| {
                        future::ready(meta.location.as_ref().starts_with(&key_prefix))
                    })
                    .take(self.page_size + 1)
                    .try_collect(),
            )
            .map_err(into_io)?;

        let has_more = metas.len() > self.page_size;
        let mut objects = Vec::with_capacity(metas.len());
        for meta in metas.into_iter().take(self.page_size) {
            objects.push(self.info(prefix.bucket(), meta)?);
        }
        let next = if has_more {
            objects.last().map(|o| o.uri.key().to_string())
        } else {
            None
        };
        Ok(ListPage { objects, next })
    }

    fn head(&self, uri: &ObjectUri) -> std::io::Result<Option<ObjectInfo>> {
        let client = self.client(uri.bucket())?;
        let path = store_path(uri)?;
        match self.runtime.block_on(client.head(&path)) {
            Ok(meta) => Ok(Some(self.info(uri.bucket(), meta)?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(into_io(e)),
        }
    }

    fn get(&self, uri: &ObjectUri) -> std::io::Result<Vec<u8>> {
        let client = self.client(uri.bucket())?;
        let path = store_path(uri)?;
        let bytes = self
            .runtime
            .block_on(async {
                let result = client.get(&path).await?;
                result.bytes().await
            })
            .map_err(into_io)?;
        Ok(bytes.to_vec())
    }

    fn put(&self, uri: &ObjectUri, data: &[u8], mode: PutMode) -> std::io::Result<()> {
        let client = self.client(uri.bucket())?;
        let path = store_path(uri)?;
        if mode == PutMode::Create && !self.settings.conditional_put {
            // Check-then-write: a concurrent writer may still slip in between.
            if self.head(uri)?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("object '{uri}' already exists"),
                ));
            }
        }
        let opts = PutOptions {
            mode: match mode {
                PutMode::Create if self.settings.conditional_put => object_store::PutMode::Create,
                _ => object_store::PutMode::Overwrite,
            },
            ..Default::default()
        };
        let payload = PutPayload::from(data.to_vec());
        self.runtime
            .block_on(client.put_opts(&path, payload, opts))
            .map(|_| ())
            .map_err(into_io)
    }

    fn delete(&self, uri: &ObjectUri) -> std::io::Result<()> {
        let client = self.client(uri.bucket())?;
        let path = store_path(uri)?;
        match self.runtime.block_on(client.delete(&path)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(into_io(e)),
        }
    }

    fn copy(&self, from: &ObjectUri, to: &ObjectUri) -> std::io::Result<()> {
        if from.bucket() != to.bucket() {
            let data = self.get(from)?;
            self.put(to, &data, PutMode::Overwrite)?;
            let metadata = self.metadata(from)?;
            if metadata.is_empty() {
                return Ok(());
            }
            return self.replace_metadata(to, &metadata);
        }
        let client = self.client(from.bucket())?;
        let (from_path, to_path) = (store_path(from)?, store_path(to)?);
        self.runtime
            .block_on(client.copy(&from_path, &to_path))
            .map_err(into_io)
    }

    fn metadata(&self, uri: &ObjectUri) -> std::io::Result<ObjectMetadata> {
        let client = self.client(uri.bucket())?;
        let path = store_path(uri)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .runtime
            .block_on(client.get_opts(&path, options))
            .map_err(into_io)?;
        Ok(user_metadata(&result.attributes))
    }

    /// S3 has no in-place metadata update: the object is rewritten with its
    /// other attributes (content type, encoding) preserved.
    fn replace_metadata(&self, uri: &ObjectUri, metadata: &ObjectMetadata) -> std::io::Result<()> {
        let client = self.client(uri.bucket())?;
        let path = store_path(uri)?;
        self.runtime
            .block_on(async {
                let result = client.get(&path).await?;
                let mut attributes: Attributes = result
                    .attributes
                    .iter()
                    .filter(|(attribute, _)| !matches!(attribute, Attribute::Metadata(_)))
                    .map(|(attribute, value)| (attribute.clone(), value.clone()))
                    .collect();
                for (key, value) in metadata {
                    let attribute = Attribute::Metadata(key.clone().into());
                    attributes.insert(attribute, value.clone().into());
                }
                let bytes = result.bytes().await?;
                let options = PutOptions {
                    attributes,
                    ..Default::default()
                };
                client.put_opts(&path, PutPayload::from(bytes), options).await
            })
            .map(|_| ())
            .map_err(into_io)
    }

    fn supports_conditional_put(&self) -> bool {
        self.settings.conditional_put
    }
}
