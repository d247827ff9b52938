//! Configuration validation.

use super::Config;
use crate::error::{EtlError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.warehouse.host.is_empty() {
        return Err(EtlError::Config("warehouse.host is required".into()));
    }
    if config.warehouse.database.is_empty() {
        return Err(EtlError::Config("warehouse.database is required".into()));
    }
    if config.warehouse.user.is_empty() {
        return Err(EtlError::Config("warehouse.user is required".into()));
    }

    if config.etl.workers == 0 {
        return Err(EtlError::Config("etl.workers must be at least 1".into()));
    }
    if config.etl.null_token.is_empty() {
        return Err(EtlError::Config("etl.null_token must not be empty".into()));
    }
    if config.etl.escape_char == '\t' || config.etl.escape_char == '\n' {
        return Err(EtlError::Config(
            "etl.escape_char must not be the field or line delimiter".into(),
        ));
    }

    // COPY auth: both keys or neither, and keys exclusive with an IAM role
    if config.aws.access_key_id.is_some() != config.aws.secret_access_key.is_some() {
        return Err(EtlError::Config(
            "aws.access_key_id and aws.secret_access_key must be set together".into(),
        ));
    }
    if config.aws.iam_role.is_some() && config.aws.access_key_id.is_some() {
        return Err(EtlError::Config(
            "aws.iam_role and aws access keys are mutually exclusive".into(),
        ));
    }

    Ok(())
}
