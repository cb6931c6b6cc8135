// ABOUTME: Validation for values interpolated into mount commands
// ABOUTME: Bucket names follow S3/GCS/R2 naming rules; endpoints must be http(s) URLs

use crate::error::{Result, RunnerError};
use once_cell::sync::Lazy;
use regex::Regex;

static SAFE_BUCKET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]{1,61}[a-z0-9]$").expect("bucket name pattern is valid")
});

static IPV4_LIKE_BUCKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{1,3}\.){3}\d{1,3}$").expect("ipv4 pattern is valid")
});

/// Reject bucket names that are not valid for S3, GCS, or S3-compatible stores
pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    if !SAFE_BUCKET_NAME.is_match(bucket) {
        return Err(RunnerError::Validation(format!(
            "Invalid bucket name: \"{}\". Bucket names must be 3-63 characters, lowercase alphanumeric, hyphens, underscores, or dots.",
            bucket
        )));
    }

    if bucket.contains("..")
        || bucket.contains("-.")
        || bucket.contains(".-")
        || IPV4_LIKE_BUCKET.is_match(bucket)
    {
        return Err(RunnerError::Validation(format!(
            "Invalid bucket name: \"{}\".",
            bucket
        )));
    }

    Ok(())
}

/// Accept only absolute `http` or `https` URLs
///
/// Commas and whitespace are rejected because the endpoint is passed inside a
/// comma-separated `-o` option list.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.contains(',') || endpoint.chars().any(char::is_whitespace) {
        return Err(RunnerError::Validation(format!(
            "Invalid endpoint URL: \"{}\". Commas and whitespace are not allowed.",
            endpoint
        )));
    }

    let parsed = url::Url::parse(endpoint)
        .map_err(|_| RunnerError::Validation(format!("Invalid endpoint URL: \"{}\"", endpoint)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(RunnerError::Validation(format!(
            "Invalid endpoint URL scheme: \"{}\". Only http and https are allowed.",
            scheme
        ))),
    }
}
