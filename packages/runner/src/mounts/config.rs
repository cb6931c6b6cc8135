// ABOUTME: Mount configurations for S3-compatible and GCS buckets
// ABOUTME: Constructors and builders validate every value that ends up in a mount command

use super::validate::{validate_bucket_name, validate_endpoint};
use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate_mount_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(RunnerError::Validation(format!(
            "Mount path must be absolute: \"{}\"",
            path
        )));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(RunnerError::Validation(format!(
            "Mount path must not contain '..': \"{}\"",
            path
        )));
    }
    Ok(())
}

/// Access key pair written to the s3fs password file
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// `ACCESS_KEY:SECRET` line in the s3fs passwd format
    pub fn passwd_line(&self) -> String {
        format!("{}:{}", self.access_key_id, self.secret_access_key)
    }
}

// Keep the secret out of logs
impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// S3 or S3-compatible (R2, MinIO) bucket mounted with s3fs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct S3MountConfig {
    pub bucket: String,
    pub mount_path: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Anonymous public-bucket access when unset
    pub credentials: Option<S3Credentials>,
    pub read_only: bool,
    /// Path-style requests, needed by most S3-compatible stores
    pub path_style: bool,
}

impl S3MountConfig {
    pub fn new(bucket: impl Into<String>, mount_path: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let mount_path = mount_path.into();
        validate_bucket_name(&bucket)?;
        validate_mount_path(&mount_path)?;

        Ok(Self {
            bucket,
            mount_path,
            region: None,
            endpoint: None,
            credentials: None,
            read_only: false,
            path_style: false,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        validate_endpoint(&endpoint)?;
        self.endpoint = Some(endpoint);
        Ok(self)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Result<Self> {
        let region = region.into();
        let valid = !region.is_empty()
            && region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(RunnerError::Validation(format!(
                "Invalid region: \"{}\"",
                region
            )));
        }
        self.region = Some(region);
        Ok(self)
    }

    pub fn with_credentials(mut self, credentials: S3Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn path_style(mut self) -> Self {
        self.path_style = true;
        self
    }

    /// Re-check values, e.g. after deserializing
    pub fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.bucket)?;
        validate_mount_path(&self.mount_path)?;
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint(endpoint)?;
        }
        Ok(())
    }
}

/// Google Cloud Storage bucket mounted with gcsfuse
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GcsMountConfig {
    pub bucket: String,
    pub mount_path: String,
    /// Service account key file; application default credentials when unset
    pub key_file: Option<String>,
    pub endpoint: Option<String>,
    pub read_only: bool,
}

impl GcsMountConfig {
    pub fn new(bucket: impl Into<String>, mount_path: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let mount_path = mount_path.into();
        validate_bucket_name(&bucket)?;
        validate_mount_path(&mount_path)?;

        Ok(Self {
            bucket,
            mount_path,
            key_file: None,
            endpoint: None,
            read_only: false,
        })
    }

    pub fn with_key_file(mut self, key_file: impl Into<String>) -> Result<Self> {
        let key_file = key_file.into();
        validate_mount_path(&key_file).map_err(|_| {
            RunnerError::Validation(format!("Key file path must be absolute: \"{}\"", key_file))
        })?;
        self.key_file = Some(key_file);
        Ok(self)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        validate_endpoint(&endpoint)?;
        self.endpoint = Some(endpoint);
        Ok(self)
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.bucket)?;
        validate_mount_path(&self.mount_path)?;
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint(endpoint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MountConfig {
    S3(S3MountConfig),
    Gcs(GcsMountConfig),
}

impl MountConfig {
    pub fn bucket(&self) -> &str {
        match self {
            MountConfig::S3(config) => &config.bucket,
            MountConfig::Gcs(config) => &config.bucket,
        }
    }

    pub fn mount_path(&self) -> &str {
        match self {
            MountConfig::S3(config) => &config.mount_path,
            MountConfig::Gcs(config) => &config.mount_path,
        }
    }

    /// FUSE program that performs the mount
    pub fn tool(&self) -> &'static str {
        match self {
            MountConfig::S3(_) => "s3fs",
            MountConfig::Gcs(_) => "gcsfuse",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MountConfig::S3(config) => config.validate(),
            MountConfig::Gcs(config) => config.validate(),
        }
    }
}

impl From<S3MountConfig> for MountConfig {
    fn from(config: S3MountConfig) -> Self {
        MountConfig::S3(config)
    }
}

impl From<GcsMountConfig> for MountConfig {
    fn from(config: GcsMountConfig) -> Self {
        MountConfig::Gcs(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_config_validates_on_construction() {
        assert!(S3MountConfig::new("my-bucket", "/mnt/data").is_ok());
        assert!(S3MountConfig::new("Bad_Bucket", "/mnt/data").is_err());
        assert!(S3MountConfig::new("my-bucket", "relative/path").is_err());
        assert!(S3MountConfig::new("my-bucket", "/mnt/../etc").is_err());
    }

    #[test]
    fn test_s3_builder_validates_endpoint_and_region() {
        let config = S3MountConfig::new("my-bucket", "/mnt/data")
            .unwrap()
            .with_endpoint("http://localhost:9000")
            .unwrap()
            .with_region("us-east-1")
            .unwrap()
            .path_style()
            .read_only();

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.path_style && config.read_only);

        let base = S3MountConfig::new("my-bucket", "/mnt/data").unwrap();
        assert!(base.clone().with_endpoint("ftp://example.com").is_err());
        assert!(base
            .clone()
            .with_endpoint("https://minio.example.com/,allow_other")
            .is_err());
        assert!(base.with_region("us-east-1; reboot").is_err());
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let credentials = S3Credentials::new("AKIA123", "super-secret");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("AKIA123"));
        assert!(!debug.contains("super-secret"));
        assert_eq!(credentials.passwd_line(), "AKIA123:super-secret");
    }

    #[test]
    fn test_deserialized_config_revalidates() {
        let json = r#"{"type":"gcs","bucket":"..bad","mountPath":"/mnt/gcs","keyFile":null,"endpoint":null,"readOnly":false}"#;
        let config: MountConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tool(), "gcsfuse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mount_config_accessors() {
        let config: MountConfig = GcsMountConfig::new("logs-bucket", "/mnt/logs")
            .unwrap()
            .into();
        assert_eq!(config.bucket(), "logs-bucket");
        assert_eq!(config.mount_path(), "/mnt/logs");
        assert_eq!(config.tool(), "gcsfuse");
    }
}
