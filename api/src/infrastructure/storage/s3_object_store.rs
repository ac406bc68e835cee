use std::path::{Component, Path};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, error::SdkError};

use crate::application::ports::object_store_port::ObjectStorePort;
use crate::bootstrap::config::Config;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    root_prefix: String,
}

impl S3ObjectStore {
    pub async fn new(cfg: &Config) -> anyhow::Result<Self> {
        let bucket = cfg
            .s3_bucket
            .clone()
            .context("S3 bucket must be configured when using S3 storage backend")?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &cfg.s3_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let (Some(access), Some(secret)) = (&cfg.s3_access_key, &cfg.s3_secret_key) {
            let creds = Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "docsync-s3-static",
            );
            builder = builder.credentials_provider(creds);
        }
        if let Some(endpoint) = &cfg.s3_endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        if cfg.s3_use_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        ensure_bucket(&client, &bucket).await?;

        Ok(Self {
            client,
            bucket,
            root_prefix: normalize_prefix(Path::new(&cfg.storage_root)),
        })
    }

    fn full_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.root_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.root_prefix, key)
        }
    }

    fn strip_root<'a>(&self, full: &'a str) -> &'a str {
        if self.root_prefix.is_empty() {
            return full;
        }
        full.strip_prefix(&self.root_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(full)
    }

    async fn list_page(
        &self,
        prefix: &str,
        max_keys: Option<i32>,
        token: Option<String>,
    ) -> anyhow::Result<(Vec<String>, Option<String>)> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix));
        if let Some(max_keys) = max_keys {
            request = request.max_keys(max_keys);
        }
        if let Some(token) = token {
            request = request.continuation_token(token);
        }
        let output = request
            .send()
            .await
            .with_context(|| format!("failed to list objects under {prefix}"))?;
        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .map(|key| self.strip_root(key).to_string())
            .collect();
        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok((keys, next))
    }
}

fn normalize_prefix(root: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for comp in root.components() {
        if let Component::Normal(os) = comp {
            let s = os.to_string_lossy();
            if !s.is_empty() && s != "." {
                parts.push(s.replace('\\', "/"));
            }
        }
    }
    parts.join("/")
}

#[async_trait]
impl ObjectStorePort for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let full = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("failed to upload object {full}"))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let full = self.full_key(key);
        let object = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(object) => object,
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_no_such_key() => {
                return Ok(None);
            }
            Err(err) => return Err(anyhow!("get_object failed for {full}: {err}")),
        };
        let data = object
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read object {full}"))?;
        Ok(Some(data.into_bytes().to_vec()))
    }

    async fn list_first(&self, prefix: &str) -> anyhow::Result<Option<String>> {
        let (keys, _) = self.list_page(prefix, Some(1), None).await?;
        Ok(keys.into_iter().next())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut all = Vec::new();
        let mut token = None;
        loop {
            let (keys, next) = self.list_page(prefix, None, token).await?;
            all.extend(keys);
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        all.sort();
        Ok(all)
    }
}

async fn ensure_bucket(client: &Client, bucket: &str) -> anyhow::Result<()> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => return Ok(()),
        Err(SdkError::ServiceError(service_err)) => {
            if !matches!(service_err.err(), HeadBucketError::NotFound(_)) {
                return Err(anyhow!(service_err.err().to_string()));
            }
        }
        Err(err) => return Err(anyhow!(err.to_string())),
    }

    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => {
            tracing::info!(bucket, "s3_bucket_created");
            Ok(())
        }
        Err(SdkError::ServiceError(service_err)) => match service_err.err() {
            CreateBucketError::BucketAlreadyOwnedByYou(_) => Ok(()),
            CreateBucketError::BucketAlreadyExists(_) => Ok(()),
            other => Err(anyhow!(other.to_string())),
        },
        Err(err) => Err(anyhow!(err.to_string())),
    }
}
