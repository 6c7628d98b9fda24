// Input validation for user-authored content.
// Runs at the call site before any remote call and never touches the cache.

use crate::error::ValidationError;

pub const MAX_CAPTION_LEN: usize = 500;
pub const MAX_COMMENT_LEN: usize = 500;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;
pub const MAX_BIO_LEN: usize = 200;

/// Trim a caption and check it is non-empty and within bounds.
pub fn caption(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyCaption);
    }
    if trimmed.chars().count() > MAX_CAPTION_LEN {
        return Err(ValidationError::CaptionTooLong {
            max: MAX_CAPTION_LEN,
        });
    }
    Ok(trimmed.to_string())
}

pub fn comment(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyComment);
    }
    if trimmed.chars().count() > MAX_COMMENT_LEN {
        return Err(ValidationError::CommentTooLong {
            max: MAX_COMMENT_LEN,
        });
    }
    Ok(trimmed.to_string())
}

pub fn display_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ValidationError::DisplayNameTooLong {
            max: MAX_DISPLAY_NAME_LEN,
        });
    }
    Ok(trimmed.to_string())
}

/// Bio may be empty.
pub fn bio(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() > MAX_BIO_LEN {
        return Err(ValidationError::BioTooLong { max: MAX_BIO_LEN });
    }
    Ok(trimmed.to_string())
}
