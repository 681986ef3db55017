//! Pure validation of send requests. No I/O; trimming is the only
//! transformation applied to inputs.

/// Why a send request was rejected before it touched the store or registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Recipient handle is empty after trimming.
    EmptyRecipient,
    /// Content is empty after trimming.
    EmptyContent,
    /// Trimmed recipient handle equals the sender's own handle
    /// (case-insensitive).
    SelfAddressed,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyRecipient => write!(f, "You must specify a recipient."),
            ValidationError::EmptyContent => write!(f, "The message cannot be empty."),
            ValidationError::SelfAddressed => {
                write!(f, "You cannot send messages to yourself.")
            }
        }
    }
}

/// A send request that passed validation: trimmed recipient and content,
/// borrowed from the original inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidSend<'a> {
    pub recipient_handle: &'a str,
    pub content: &'a str,
}

/// Check the shape of a send request.
pub fn validate_send<'a>(
    sender_handle: &str,
    recipient_handle: &'a str,
    content: &'a str,
) -> Result<ValidSend<'a>, ValidationError> {
    let recipient_handle = recipient_handle.trim();
    if recipient_handle.is_empty() {
        return Err(ValidationError::EmptyRecipient);
    }

    let content = content.trim();
    if content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }

    if recipient_handle.to_lowercase() == sender_handle.trim().to_lowercase() {
        return Err(ValidationError::SelfAddressed);
    }

    Ok(ValidSend {
        recipient_handle,
        content,
    })
}
