//! Classification of MongoDB driver errors into the cursor error taxonomy.

use mongodb::error::ErrorKind;

use super::kinds::{ConnectionError, CursorError, OperationFailure};

/// Server code for a getMore on a cursor the server no longer knows.
const CURSOR_NOT_FOUND: i32 = 43;

/// Server codes that mean the node is not (or no longer) a writable primary.
const NOT_PRIMARY_CODES: [i32; 4] = [10107, 13435, 11600, 189];

/// Map a driver error onto the cursor error taxonomy.
///
/// Connectivity problems become reconnect-eligible errors so the cursor
/// triggers a transport-level disconnect. Server command errors keep their
/// message and code. Everything else is carried through unchanged.
pub fn classify_mongodb_error(error: mongodb::error::Error) -> CursorError {
    match error.kind.as_ref() {
        ErrorKind::Io(io) => CursorError::Connection(ConnectionError::AutoReconnect(io.to_string())),
        ErrorKind::ConnectionPoolCleared { message, .. } => {
            CursorError::Connection(ConnectionError::AutoReconnect(message.clone()))
        }
        ErrorKind::ServerSelection { message, .. } => {
            CursorError::Connection(ConnectionError::AutoReconnect(message.clone()))
        }
        ErrorKind::Command(command_error) => {
            if NOT_PRIMARY_CODES.contains(&command_error.code) {
                return CursorError::Connection(ConnectionError::AutoReconnect(
                    command_error.message.clone(),
                ));
            }
            let message = if command_error.code == CURSOR_NOT_FOUND {
                format!("cursor not valid at server: {}", command_error.message)
            } else {
                command_error.message.clone()
            };
            CursorError::Operation(OperationFailure {
                message,
                code: Some(command_error.code),
            })
        }
        _ => CursorError::MongoDb(error),
    }
}

/// Get a human-readable error name from a MongoDB error code.
pub(crate) fn error_name(code: i32) -> Option<&'static str> {
    let name = match code {
        13 => "Unauthorized",
        18 => "AuthenticationFailed",
        26 => "NamespaceNotFound",
        CURSOR_NOT_FOUND => "CursorNotFound",
        50 => "MaxTimeMSExpired",
        10107 | 13435 => "NotWritablePrimary",
        _ => return None,
    };

    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(error_name(43), Some("CursorNotFound"));
        assert_eq!(error_name(26), Some("NamespaceNotFound"));
        assert_eq!(error_name(12345), None);
    }

    #[test]
    fn test_unclassified_errors_pass_through() {
        let err = mongodb::error::Error::custom("boom");
        assert!(matches!(classify_mongodb_error(err), CursorError::MongoDb(_)));
    }
}
