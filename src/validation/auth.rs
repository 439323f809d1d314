use garde::Validate;

use crate::error::{AppError, Result};

/// Validates an identity GUID.
///
/// # Arguments
///
/// * `guid` - The GUID to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the GUID is well formed. The value is
/// otherwise opaque; whether it names a user is up to the directory.
pub fn validate_guid(guid: &str) -> Result<()> {
    if guid.is_empty() {
        return Err(AppError::MalformedRequest("guid is required".to_string()));
    }

    if guid.len() > 255 {
        return Err(AppError::MalformedRequest(
            "guid must be at most 255 characters".to_string(),
        ));
    }

    Ok(())
}

/// Runs the payload's `garde` rules, turning a report into `MalformedRequest`.
pub fn validate_payload<T>(payload: &T) -> Result<()>
where
    T: Validate,
    T::Context: Default,
{
    payload
        .validate()
        .map_err(|report| AppError::MalformedRequest(report.to_string()))
}
