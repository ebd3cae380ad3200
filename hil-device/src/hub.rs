//! USB hub port power cycling through [uhubctl](https://github.com/mvp/uhubctl).

use std::{io, time::Duration};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

const UHUBCTL: &str = "uhubctl";

/// Split a port path such as `3-3.4.2` into the hub location (`3-3.4`) and the port on it (`2`).
pub fn parse_hub_and_port(port_path: &str) -> Result<(&str, &str)> {
    match port_path.rsplit_once('.') {
        Some((hub, port)) if !hub.is_empty() && !port.is_empty() => Ok((hub, port)),
        _ => Err(Error::InvalidPortPath(port_path.to_string())),
    }
}

/// Power cycle the hub port at `port_path`, keeping it off for `delay`.
///
/// Returns `false` without doing anything if uhubctl is not installed.
pub async fn cycle_port(port_path: &str, delay: Duration) -> Result<bool> {
    let (hub, port) = parse_hub_and_port(port_path)?;

    debug!(hub, port, "Cycling hub port");
    let output = Command::new(UHUBCTL)
        .args(["-l", hub, "-p", port, "-a", "cycle", "-d"])
        .arg(delay.as_secs().to_string())
        .kill_on_drop(true)
        .output()
        .await;

    let output = match output {
        Ok(x) => x,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("uhubctl is not installed. Skipping USB hub cycle");
            return Ok(false);
        }
        Err(e) => return Err(Error::Connection { source: e.into() }),
    };

    if !output.status.success() {
        return Err(Error::HubCycle {
            code: output.status.code(),
            output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        });
    }

    Ok(true)
}
