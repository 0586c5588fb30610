#[cfg(test)]
mod tests {
    use crate::{DaemonError, Result};
    use ipc::IpcError;
    use warden_core::CoreError;

    #[test]
    fn test_wrapped_errors_keep_their_codes() {
        let err: DaemonError = CoreError::AlreadyRunning { pid: 42 }.into();
        assert_eq!(err.code(), "CORE011");
        assert_eq!(
            err.to_string(),
            "Another supervisor is already running with pid 42"
        );

        let err: DaemonError = IpcError::ConnectionFailed("bind".to_string()).into();
        assert_eq!(err.code(), "IPC001");
    }

    #[test]
    fn test_own_codes() {
        assert_eq!(
            DaemonError::SignalError("SIGHUP".to_string()).code(),
            "DAEMON001"
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: DaemonError = io.into();
        assert_eq!(err.code(), "DAEMON002");
        assert_eq!(err.to_string(), "I/O error: boom");
    }

    #[test]
    fn test_result_alias() {
        fn fails() -> Result<()> {
            Err(DaemonError::SignalError("no handler".to_string()))
        }
        assert!(fails().is_err());
    }
}
