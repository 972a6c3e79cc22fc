use super::CollaboratorError;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Runs `call` on a worker thread and waits at most `timeout` for its answer.
///
/// A call that overruns is abandoned: its worker keeps running detached and its
/// eventual result is dropped. A worker that panics surfaces as `Disconnected`.
pub fn call_with_timeout<T, F>(
    collaborator: &str,
    timeout: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(format!("hostpilot-{collaborator}"))
        .spawn(move || {
            let _ = sender.send(call());
        })
        .map_err(|err| CollaboratorError::Failed {
            collaborator: collaborator.to_string(),
            reason: format!("failed to spawn worker thread: {err}"),
        })?;

    match receiver.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(CollaboratorError::Timeout {
            collaborator: collaborator.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(CollaboratorError::Disconnected {
            collaborator: collaborator.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_calls_return_their_value() {
        let value = call_with_timeout("model", Duration::from_secs(1), || 41 + 1).expect("value");
        assert_eq!(value, 42);
    }

    #[test]
    fn slow_calls_time_out() {
        let err = call_with_timeout("host", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            1
        })
        .expect_err("must time out");
        match err {
            CollaboratorError::Timeout {
                collaborator,
                timeout_ms,
            } => {
                assert_eq!(collaborator, "host");
                assert_eq!(timeout_ms, 20);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn panicking_calls_surface_as_disconnected() {
        let err = call_with_timeout("catalog", Duration::from_secs(1), || -> u8 {
            panic!("worker blew up")
        })
        .expect_err("must fail");
        assert!(matches!(err, CollaboratorError::Disconnected { .. }));
    }
}
