//! Session persistence backed by Cloudflare R2 / AWS S3
//!
//! One JSON object per user under the `sessions/` prefix. Listing the prefix
//! yields the full broadcast audience, so no separate user registry is kept.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tracing::info;

use crate::config::Settings;
use crate::session::{SessionRecord, SessionStore, StoreError};

const SESSION_PREFIX: &str = "sessions/";

/// [`SessionStore`] implementation over an S3-compatible bucket
pub struct R2SessionStore {
    client: Client,
    bucket: String,
}

impl R2SessionStore {
    /// Build a store from R2 settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any R2 setting is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StoreError> {
        let endpoint_url = require(&settings.r2_endpoint_url, "R2_ENDPOINT_URL")?;
        let access_key = require(&settings.r2_access_key_id, "R2_ACCESS_KEY_ID")?;
        let secret_key = require(&settings.r2_secret_access_key, "R2_SECRET_ACCESS_KEY")?;
        let bucket = require(&settings.r2_bucket_name, "R2_BUCKET_NAME")?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-sessions");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        info!("Session store ready (bucket: {bucket})");

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }

    fn key_for(user_id: i64) -> String {
        format!("{SESSION_PREFIX}{user_id}.json")
    }

    fn user_id_from_key(key: &str) -> Option<i64> {
        key.strip_prefix(SESSION_PREFIX)?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a String, StoreError> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StoreError::Unavailable(format!("{name} is missing")))
}

#[async_trait]
impl SessionStore for R2SessionStore {
    async fn get(&self, user_id: i64) -> Result<Option<SessionRecord>, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key_for(user_id))
            .send()
            .await;

        let output = match resp {
            Ok(output) => output,
            // A user who never interacted has no object yet
            Err(SdkError::ServiceError(err)) if matches!(err.err(), GetObjectError::NoSuchKey(_)) => {
                return Ok(None);
            }
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .into_bytes();

        let record: SessionRecord =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let body =
            serde_json::to_vec(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key_for(record.user_id))
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut ids = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(SESSION_PREFIX);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }

            let page = req
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            ids.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter_map(Self::user_id_from_key),
            );

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(ids)
    }
}
