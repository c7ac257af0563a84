//! The `check` subcommand.

use clap::Args;

use crate::{
    backend::check_backend,
    prelude::*,
    relay::create_http_client,
    ui::Ui,
};

use super::BackendOpts;

/// Check command line arguments.
#[derive(Debug, Args)]
pub struct CheckOpts {
    #[clap(flatten)]
    pub backend: BackendOpts,
}

/// The `check` subcommand. Prints the backend's status as JSON, and fails if
/// it isn't reachable.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_check(ui: Ui, opts: &CheckOpts) -> Result<()> {
    let url = opts.backend.backend_url()?;
    let client = create_http_client()?;
    let status = check_backend(&client, &url).await?;
    let status_json =
        serde_json::to_string(&status).context("failed to serialize backend status")?;
    println!("{status_json}");
    if status.reachable {
        ui.display_message(
            "✅",
            &format!(
                "{} is up: {}",
                status.url,
                status.message.as_deref().unwrap_or("no status message")
            ),
        );
        Ok(())
    } else {
        Err(anyhow!(
            "OCR backend at {} is not reachable: {}",
            status.url,
            status.message.as_deref().unwrap_or("unknown error")
        ))
    }
}
