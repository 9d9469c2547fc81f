use crate::error::ServiceError;
use std::{process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::info;

/// Run `<program> restart <service>` and wait at most `timeout` for it.
pub async fn restart(program: &str, service: &str, timeout: Duration) -> Result<(), ServiceError> {
    info!("{} restart {}", program, service);
    let child = Command::new(program)
        .arg("restart")
        .arg(service)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ServiceError::Spawn { program: program.to_string(), source })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => Err(ServiceError::Timeout {
            program: program.to_string(),
            service: service.to_string(),
            secs: timeout.as_secs(),
        }),
        Ok(Err(source)) => Err(ServiceError::Spawn { program: program.to_string(), source }),
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => Err(ServiceError::Failed {
            program: program.to_string(),
            service: service.to_string(),
            status: out.status.to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_success_and_failure() {
        let t = Duration::from_secs(5);
        assert!(restart("true", "tblocker", t).await.is_ok());
        assert!(matches!(restart("false", "tblocker", t).await, Err(ServiceError::Failed { .. })));
        assert!(matches!(
            restart("/nonexistent/service-manager", "tblocker", t).await,
            Err(ServiceError::Spawn { .. })
        ));
    }
}
