//! Input validation for pipeline construction
//!
//! Security-focused checks applied before anything reaches the server:
//! collection names, field paths, and output field names are validated
//! locally so malformed input fails with `InvalidArgument` instead of a
//! server round trip.

use aqueduct_common::{AqueductError, Result};
use tracing::warn;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field paths
const MAX_FIELD_PATH_LENGTH: usize = 1024;

/// Maximum allowed length for database names (server limit is 64 bytes)
const MAX_DATABASE_NAME_LENGTH: usize = 63;

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters (special operators)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    /// Creates a new validated collection name
    ///
    /// # Errors
    /// Returns `InvalidArgument` if:
    /// - Name is empty
    /// - Name exceeds MAX_COLLECTION_NAME_LENGTH
    /// - Name contains null bytes
    /// - Name starts with "system."
    /// - Name contains $ characters
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(AqueductError::InvalidArgument(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(AqueductError::InvalidArgument(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(AqueductError::InvalidArgument(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(AqueductError::InvalidArgument(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(AqueductError::InvalidArgument(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            warn!("Collection name contains suspicious pattern: '{}'", name);
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    /// Returns the validated collection name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the ValidatedCollectionName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated field path, possibly dotted ("address.city")
///
/// # Guarantees
/// - Not empty
/// - Maximum 1024 characters
/// - No null bytes
/// - No $ characters (operator injection)
/// - Every dot-separated segment is non-empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldPath {
    path: String,
}

impl ValidatedFieldPath {
    /// Creates a new validated field path
    ///
    /// # Errors
    /// Returns `InvalidArgument` if:
    /// - Path is empty
    /// - Path exceeds MAX_FIELD_PATH_LENGTH
    /// - Path contains null bytes
    /// - Path contains $ characters
    /// - Any dot-separated segment is empty
    pub fn new(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(AqueductError::InvalidArgument(
                "Field path cannot be empty".to_string(),
            ));
        }

        if path.len() > MAX_FIELD_PATH_LENGTH {
            return Err(AqueductError::InvalidArgument(format!(
                "Field path exceeds maximum length of {} characters",
                MAX_FIELD_PATH_LENGTH
            )));
        }

        if path.contains('\0') {
            return Err(AqueductError::InvalidArgument(
                "Field path cannot contain null bytes".to_string(),
            ));
        }

        if path.contains('$') {
            return Err(AqueductError::InvalidArgument(format!(
                "Field path cannot contain '$' character: '{}'",
                path
            )));
        }

        if path.split('.').any(|segment| segment.is_empty()) {
            return Err(AqueductError::InvalidArgument(format!(
                "Field path contains an empty segment: '{}'",
                path
            )));
        }

        Ok(ValidatedFieldPath {
            path: path.to_string(),
        })
    }

    /// Returns the validated field path as a string slice
    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl AsRef<str> for ValidatedFieldPath {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for ValidatedFieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Validates a field path used as a stage input (sort keys, unwind paths,
/// lookup join fields)
pub fn validate_field_path(path: &str) -> Result<()> {
    ValidatedFieldPath::new(path).map(|_| ())
}

/// Validates a field name produced by a stage (group accumulators, $count,
/// $lookup "as")
///
/// Output fields are top-level: dots are rejected along with the usual
/// empty/null-byte/$-prefix rules.
pub fn validate_output_field(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AqueductError::InvalidArgument(
            "Output field name cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(AqueductError::InvalidArgument(
            "Output field name cannot contain null bytes".to_string(),
        ));
    }

    if name.starts_with('$') {
        return Err(AqueductError::InvalidArgument(format!(
            "Output field name cannot start with '$' (reserved for operators): '{}'",
            name
        )));
    }

    if name.contains('.') {
        return Err(AqueductError::InvalidArgument(format!(
            "Output field name cannot contain '.': '{}'",
            name
        )));
    }

    Ok(())
}

/// Validates a database name against the server's naming restrictions
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AqueductError::InvalidArgument(
            "Database name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_DATABASE_NAME_LENGTH {
        return Err(AqueductError::InvalidArgument(format!(
            "Database name exceeds maximum length of {} characters: '{}'",
            MAX_DATABASE_NAME_LENGTH, name
        )));
    }

    const FORBIDDEN: &[char] = &['\0', '/', '\\', '.', ' ', '"', '$'];
    if name.contains(FORBIDDEN) {
        return Err(AqueductError::InvalidArgument(format!(
            "Database name contains a forbidden character: '{}'",
            name
        )));
    }

    Ok(())
}
