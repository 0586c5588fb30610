#[cfg(test)]
mod tests {
    use crate::{IpcError, Result};
    use std::error::Error;

    #[test]
    fn test_ipc_error_display() {
        let err = IpcError::ConnectionFailed("socket missing".to_string());
        assert_eq!(err.to_string(), "Connection failed: socket missing");

        let err = IpcError::ProtocolError("invalid message format".to_string());
        assert_eq!(err.to_string(), "Protocol error: invalid message format");

        let err = IpcError::Timeout("no reply within 10s".to_string());
        assert_eq!(err.to_string(), "Timeout error: no reply within 10s");

        let err = IpcError::ElevationFailed("endpoint bind failed".to_string());
        assert_eq!(
            err.to_string(),
            "Elevation channel failed: endpoint bind failed"
        );

        let err = IpcError::Rejected("control queue full".to_string());
        assert_eq!(err.to_string(), "Request rejected: control queue full");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_success() -> Result<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }

        fn returns_failure() -> Result<Vec<u8>> {
            Err(IpcError::PermissionDenied("/run/warden.sock".to_string()))
        }

        assert!(returns_success().is_ok());
        assert!(returns_failure().is_err());
    }

    #[test]
    fn test_error_trait_implementation() {
        let err = IpcError::ProtocolError("test".to_string());
        let _: &dyn Error = &err;
        assert!(err.source().is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            IpcError::ConnectionFailed("test".to_string()).code(),
            "IPC001"
        );
        assert_eq!(IpcError::SendFailed("test".to_string()).code(), "IPC002");
        assert_eq!(IpcError::ReceiveFailed("test".to_string()).code(), "IPC003");
        assert_eq!(
            IpcError::SerializationFailed("test".to_string()).code(),
            "IPC004"
        );
        assert_eq!(
            IpcError::DeserializationFailed("test".to_string()).code(),
            "IPC005"
        );
        assert_eq!(IpcError::EmptyResponse.code(), "IPC006");
        assert_eq!(IpcError::ProtocolError("test".to_string()).code(), "IPC007");
        assert_eq!(IpcError::Timeout("test".to_string()).code(), "IPC008");
        assert_eq!(
            IpcError::PermissionDenied("test".to_string()).code(),
            "IPC009"
        );
        assert_eq!(
            IpcError::ElevationFailed("test".to_string()).code(),
            "IPC010"
        );
        assert_eq!(IpcError::Rejected("test".to_string()).code(), "IPC011");
    }
}
