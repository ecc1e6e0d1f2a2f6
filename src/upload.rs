use crate::error::ValidationError;

const MIB: u64 = 1024 * 1024;

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
];

/// A file handed over by the user, fully buffered.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Which files a given upload flow accepts.
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    allowed: &'static [&'static [&'static str]],
    pub max_bytes: u64,
}

impl UploadPolicy {
    /// Attachments sent to an agent.
    pub fn chat() -> Self {
        Self {
            allowed: &[IMAGE_TYPES, DOCUMENT_TYPES],
            max_bytes: 10 * MIB,
        }
    }

    /// Profile pictures.
    pub fn avatar() -> Self {
        Self {
            allowed: &[IMAGE_TYPES],
            max_bytes: 2 * MIB,
        }
    }

    pub fn accepts_type(&self, mime: &str) -> bool {
        // Browsers sometimes append parameters, e.g. "text/csv; charset=utf-8".
        let essence = mime.split(';').next().unwrap_or("").trim();
        self.allowed
            .iter()
            .any(|group| group.iter().any(|t| t.eq_ignore_ascii_case(essence)))
    }

    pub fn validate(&self, mime: &str, size: u64) -> Result<(), ValidationError> {
        if !self.accepts_type(mime) {
            return Err(ValidationError::UnsupportedFileType(mime.to_string()));
        }
        if size > self.max_bytes {
            return Err(ValidationError::FileTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    pub fn check(&self, file: &FileUpload) -> Result<(), ValidationError> {
        self.validate(&file.mime, file.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_limit_is_accepted_and_one_over_is_not() {
        let policy = UploadPolicy::chat();
        assert!(policy.validate("application/pdf", 10 * MIB).is_ok());
        assert_eq!(
            policy.validate("application/pdf", 10 * MIB + 1),
            Err(ValidationError::FileTooLarge {
                size: 10 * MIB + 1,
                limit: 10 * MIB
            })
        );
    }

    #[test]
    fn chat_policy_accepts_images_and_documents() {
        let policy = UploadPolicy::chat();
        for mime in ["image/webp", "text/csv; charset=utf-8", "application/msword"] {
            assert!(policy.accepts_type(mime), "{mime}");
        }
        assert!(!policy.accepts_type("application/zip"));
        assert!(!policy.accepts_type(""));
    }

    #[test]
    fn avatar_policy_is_images_up_to_two_mib() {
        let policy = UploadPolicy::avatar();
        assert!(policy.validate("image/png", 2 * MIB).is_ok());
        assert!(matches!(
            policy.validate("image/png", 2 * MIB + 1),
            Err(ValidationError::FileTooLarge { .. })
        ));
        assert!(matches!(
            policy.validate("application/pdf", 10),
            Err(ValidationError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn type_is_checked_before_size() {
        let file = FileUpload::new("big.zip", "application/zip", vec![0; 16]);
        let policy = UploadPolicy {
            allowed: &[IMAGE_TYPES],
            max_bytes: 1,
        };
        assert!(matches!(
            policy.check(&file),
            Err(ValidationError::UnsupportedFileType(_))
        ));
    }
}
