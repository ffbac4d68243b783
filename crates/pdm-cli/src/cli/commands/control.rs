//! `pdm stop|restart|running` – talk to the running `pdm run`.

use anyhow::Result;
use pdm_core::control::default_control_socket_path;

use crate::cli::control_socket::{send_request, ControlRequest};

pub async fn run_control(request: ControlRequest) -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(&socket_path, request).await?;
    println!("{}", reply);
    Ok(())
}
