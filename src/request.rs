//! IDENTIFY request type and builder.
//!
//! The builder provides a fluent, validated way to construct requests; requests
//! decoded from the wire go through the same [`IdentifyRequest::validate`] check
//! inside the resolver.
//!
//! Field length is limited by [`crate::ResolverConfig::max_field_length`] when
//! the resolver validates. The builder only checks length when a limit is set
//! with [`IdentifyBuilder::max_field_length`].

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// An (email, phone number) observation to resolve.
///
/// Empty strings count as absent, matching what form posts and JSON clients
/// send for unfilled fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    /// Correlation id carried into log lines.
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,

    /// Email address.
    #[serde(default)]
    pub email: Option<String>,

    /// Phone number. JSON numbers are accepted and kept as their decimal text.
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<TextOrNumber> = Option::deserialize(deserializer)?;
    Ok(raw.map(|value| match value {
        TextOrNumber::Text(s) => s,
        TextOrNumber::Signed(n) => n.to_string(),
        TextOrNumber::Unsigned(n) => n.to_string(),
    }))
}

fn check_field(
    field: &str,
    value: Option<String>,
    max_length: usize,
) -> Result<Option<String>, ValidationError> {
    match value {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) if v.len() > max_length => Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        }),
        Some(v) => Ok(Some(v)),
    }
}

impl IdentifyRequest {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> IdentifyBuilder {
        IdentifyBuilder::new()
    }

    /// Normalizes empty strings to absent and checks the request.
    ///
    /// # Errors
    /// - `MissingIdentifier` if neither email nor phone number is present
    /// - `FieldTooLong` for values longer than `max_field_length` bytes
    pub fn validate(self, max_field_length: usize) -> Result<Self, ValidationError> {
        let email = check_field("email", self.email, max_field_length)?;
        let phone_number = check_field("phoneNumber", self.phone_number, max_field_length)?;
        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::MissingIdentifier);
        }
        Ok(Self {
            request_id: self.request_id,
            email,
            phone_number,
        })
    }

    /// Email as a borrowed str.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Phone number as a borrowed str.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

/// Builder for [`IdentifyRequest`].
///
/// # Example
/// ```
/// use contact_identity::IdentifyRequest;
///
/// let request = IdentifyRequest::builder()
///     .email("mcfly@hillvalley.edu")
///     .phone_number("123456")
///     .build()?;
/// assert_eq!(request.email(), Some("mcfly@hillvalley.edu"));
/// # Ok::<(), contact_identity::ValidationError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct IdentifyBuilder {
    request_id: Option<Uuid>,
    email: Option<String>,
    phone_number: Option<String>,
    max_field_length: Option<usize>,
}

impl IdentifyBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-supplied correlation id (default: random v4).
    #[must_use]
    pub fn request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Set the email address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the email address from an optional value.
    #[must_use]
    pub fn maybe_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Set the phone number.
    #[must_use]
    pub fn phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    /// Set the phone number from an optional value.
    #[must_use]
    pub fn maybe_phone_number(mut self, phone_number: Option<String>) -> Self {
        self.phone_number = phone_number;
        self
    }

    /// Check field length at build time (default: left to the resolver).
    #[must_use]
    pub fn max_field_length(mut self, max: usize) -> Self {
        self.max_field_length = Some(max);
        self
    }

    /// Build the request.
    ///
    /// Returns `ValidationError` if:
    /// - Neither email nor phone number is set (at least one required)
    /// - A value is longer than the limit set with `max_field_length`
    pub fn build(self) -> Result<IdentifyRequest, ValidationError> {
        IdentifyRequest {
            request_id: self.request_id.unwrap_or_else(Uuid::new_v4),
            email: self.email,
            phone_number: self.phone_number,
        }
        .validate(self.max_field_length.unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_an_identifier() {
        let err = IdentifyRequest::builder().build().unwrap_err();
        assert!(matches!(err, ValidationError::MissingIdentifier));

        let err = IdentifyRequest::builder()
            .email("")
            .phone_number("")
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingIdentifier));
    }

    #[test]
    fn test_empty_string_means_absent() {
        let request = IdentifyRequest::builder()
            .email("")
            .phone_number("123456")
            .build()
            .unwrap();
        assert_eq!(request.email(), None);
        assert_eq!(request.phone_number(), Some("123456"));
    }

    #[test]
    fn test_whitespace_is_kept_verbatim() {
        let request = IdentifyRequest::builder()
            .email("   ")
            .phone_number("111")
            .build()
            .unwrap();
        assert_eq!(request.email(), Some("   "));
    }

    #[test]
    fn test_length_limit() {
        let err = IdentifyRequest::builder()
            .phone_number("1234567890")
            .max_field_length(8)
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::FieldTooLong { max_length: 8, .. }));
    }

    #[test]
    fn test_no_length_limit_without_override() {
        let email = format!("{}@hillvalley.edu", "m".repeat(400));
        let request = IdentifyRequest::builder().email(email.as_str()).build().unwrap();
        assert_eq!(request.email(), Some(email.as_str()));
    }

    #[test]
    fn test_values_are_not_normalized() {
        let request = IdentifyRequest::builder()
            .email(" Doc@HillValley.edu ")
            .build()
            .unwrap();
        assert_eq!(request.email(), Some(" Doc@HillValley.edu "));
    }

    #[test]
    fn test_deserializes_numeric_phone() {
        let request: IdentifyRequest =
            serde_json::from_str(r#"{"email": null, "phoneNumber": 123456}"#).unwrap();
        assert_eq!(request.phone_number(), Some("123456"));
        assert_eq!(request.email(), None);

        let request: IdentifyRequest =
            serde_json::from_str(r#"{"email": "lorraine@hillvalley.edu"}"#).unwrap();
        assert_eq!(request.phone_number(), None);
        assert!(!request.request_id.is_nil());
    }
}
