//! Caller-side upload validators.
//!
//! Invalid uploads surface as field-level messages, not errors: the owning
//! entity collects them during its validation phase and the coordinator
//! treats a non-empty error map as a failed save attempt.

use std::collections::BTreeMap;

use crate::field::UploadField;
use crate::upload::split_filename;

/// Validation errors keyed by attribute name.
#[derive(Debug, Default, Clone)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attr: impl Into<String>, message: impl Into<String>) {
        self.0.entry(attr.into()).or_default().push(message.into());
    }

    pub fn extend(&mut self, attr: impl Into<String>, messages: Vec<String>) {
        if !messages.is_empty() {
            self.0.entry(attr.into()).or_default().extend(messages);
        }
    }

    /// Messages for one attribute; empty when the attribute is clean.
    pub fn on(&self, attr: &str) -> &[String] {
        self.0.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// Declarative rules for one upload attribute.
#[derive(Debug, Default, Clone)]
pub struct UploadRules {
    /// An upload (new, remembered, or already saved) must exist.
    pub presence: bool,
    /// Maximum upload size in bytes.
    pub max_size: Option<u64>,
    /// Allowed extensions (with leading dot), matched case-insensitively.
    pub extensions: Option<Vec<String>>,
}

impl UploadRules {
    /// Evaluate the rules against a field. `has_saved` reports whether a
    /// permanent record already exists for the field, which satisfies
    /// presence without a fresh upload.
    pub fn validate(&self, field: &UploadField, has_saved: bool) -> Vec<String> {
        let mut messages = Vec::new();

        if self.presence && !field.has_upload() && !has_saved {
            messages.push("must be uploaded".to_string());
        }

        if let Some(upload) = field.pending() {
            if let Some(max_size) = self.max_size {
                if upload.byte_size() > max_size {
                    messages.push(format!("must be smaller than {max_size} bytes"));
                }
            }

            if let Some(ref extensions) = self.extensions {
                let (_, ext) = split_filename(upload.original_filename());
                let ext = ext.to_lowercase();
                if !extensions.iter().any(|e| e.to_lowercase() == ext) {
                    messages.push(format!(
                        "must have one of the following extensions: {}",
                        extensions.join(",")
                    ));
                }
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldDescriptor;
    use crate::upload::Upload;

    fn field_with(upload: Option<Upload>) -> UploadField {
        let mut field = UploadField::new(FieldDescriptor::new("thumbnail"));
        if let Some(upload) = upload {
            field.set(upload);
        }
        field
    }

    #[test]
    fn test_presence() {
        let rules = UploadRules {
            presence: true,
            ..Default::default()
        };

        let empty = field_with(None);
        assert_eq!(rules.validate(&empty, false), vec!["must be uploaded"]);
        assert!(rules.validate(&empty, true).is_empty());

        let set = field_with(Some(Upload::from_bytes("a.png", "x")));
        assert!(rules.validate(&set, false).is_empty());
    }

    #[test]
    fn test_max_size() {
        let rules = UploadRules {
            max_size: Some(4),
            ..Default::default()
        };

        let small = field_with(Some(Upload::from_bytes("a.png", "abc")));
        assert!(rules.validate(&small, false).is_empty());

        let big = field_with(Some(Upload::from_bytes("a.png", "abcdefg")));
        assert_eq!(
            rules.validate(&big, false),
            vec!["must be smaller than 4 bytes"]
        );
    }

    #[test]
    fn test_extensions_case_insensitive() {
        let rules = UploadRules {
            extensions: Some(vec![".jpg".to_string(), ".png".to_string()]),
            ..Default::default()
        };

        let ok = field_with(Some(Upload::from_bytes("photo.PNG", "x")));
        assert!(rules.validate(&ok, false).is_empty());

        let bad = field_with(Some(Upload::from_bytes("doc.pdf", "x")));
        assert_eq!(
            rules.validate(&bad, false),
            vec!["must have one of the following extensions: .jpg,.png"]
        );
    }
}
