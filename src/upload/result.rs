/// The outcome of one upload attempt, reported by the platform uploader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadResult {
    /// The request went through. Treated like a 200.
    Success,
    /// The request failed for a reason that may not repeat, e.g. a lost
    /// connection. The ping is retried.
    RecoverableFailure,
    /// The server answered with the given HTTP status code.
    HttpStatus(u16),
}

impl UploadResult {
    /// The ping was accepted and can be deleted.
    pub fn is_success(&self) -> bool {
        match self {
            UploadResult::Success => true,
            UploadResult::HttpStatus(status) => (200..300).contains(status),
            UploadResult::RecoverableFailure => false,
        }
    }

    /// The server rejected the ping for good; retrying cannot help and
    /// the ping is deleted.
    pub fn is_unrecoverable_failure(&self) -> bool {
        matches!(self, UploadResult::HttpStatus(status) if (400..500).contains(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_classified() {
        assert!(UploadResult::Success.is_success());
        assert!(UploadResult::HttpStatus(204).is_success());
        assert!(UploadResult::HttpStatus(404).is_unrecoverable_failure());
        assert!(!UploadResult::HttpStatus(503).is_success());
        assert!(!UploadResult::HttpStatus(503).is_unrecoverable_failure());
        assert!(!UploadResult::RecoverableFailure.is_success());
        assert!(!UploadResult::RecoverableFailure.is_unrecoverable_failure());
    }
}
