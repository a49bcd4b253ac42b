use blade_spec::ErrorKind;
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// Longest uid the store accepts.
pub const MAX_UID_LEN: usize = 32;

const ATTEMPTS: usize = 3;

/// A fresh 32-character uid that `taken` reports as unused.
pub fn allocate_uid<F>(mut taken: F) -> Result<String>
where
    F: FnMut(&str) -> blade_store::Result<bool>,
{
    for _ in 0..ATTEMPTS {
        let uid = Uuid::new_v4().simple().to_string();
        match taken(&uid) {
            Ok(false) => return Ok(uid),
            Ok(true) => continue,
            Err(e) => return Err(ServiceError::database("query", e)),
        }
    }
    Err(ServiceError::new(ErrorKind::GenerateUidFailed, ""))
}

pub fn validate_uid(uid: &str) -> Result<()> {
    if uid.chars().count() > MAX_UID_LEN {
        return Err(ServiceError::parameter_illegal(
            "uid",
            format!("must be at most {MAX_UID_LEN} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_unused_uid() {
        let uid = allocate_uid(|_| Ok(false)).unwrap();
        assert_eq!(uid.len(), MAX_UID_LEN);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn gives_up_after_repeated_collisions() {
        let mut calls = 0;
        let err = allocate_uid(|_| {
            calls += 1;
            Ok(true)
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenerateUidFailed);
        assert_eq!(calls, ATTEMPTS);
    }

    #[test]
    fn long_uids_are_illegal() {
        assert!(validate_uid("test-uid-1").is_ok());
        let err = validate_uid(&"x".repeat(33)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterIllegal);
    }
}
