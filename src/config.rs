//! Configuration from the environment.
//!
//! Command-line flags always win. Anything not given on the command line
//! falls back to environment variables, which may be set in a `.env` file.

use crate::prelude::*;

/// The environment variable holding the default OCR endpoint.
pub const OCR_BACKEND_URL_VAR: &str = "OCR_BACKEND_URL";

/// Load environment variables from a `.env` file, if it exists.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => warn!("Could not load .env file: {err}"),
    }
}

/// Pick the OCR endpoint from, in order: an explicit flag, a value carried by
/// a task file, or [`OCR_BACKEND_URL_VAR`].
pub fn resolve_backend_url(
    flag: Option<&str>,
    from_task: Option<&str>,
) -> Result<String> {
    let env_value = std::env::var(OCR_BACKEND_URL_VAR).ok();
    choose_backend_url(flag, from_task, env_value.as_deref())
}

fn choose_backend_url(
    flag: Option<&str>,
    from_task: Option<&str>,
    from_env: Option<&str>,
) -> Result<String> {
    [flag, from_task, from_env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            anyhow!("No OCR backend URL: pass --url or set {}", OCR_BACKEND_URL_VAR)
        })
}
