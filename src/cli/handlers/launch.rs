// src/cli/handlers/launch.rs

use anyhow::Result;

use crate::cli::args::LaunchArgs;
use crate::cli::handlers::commons;
use crate::cli::Cli;
use crate::system::executor;

/// `hab launch <URI> <alias> [-- args...]`: resolve the URI, launch the
/// alias inside the resolved environment, and forward its exit code.
pub fn handle(cli: &Cli, args: &LaunchArgs) -> Result<i32> {
    let site = commons::load_site(cli)?;
    let forests = commons::load_forests(&site)?;
    let uri = commons::expand_uri(cli, &site, &args.uri)?;
    let flat = commons::resolve_flat(cli, &site, &forests, &uri)?;
    let frozen = commons::encode_freeze(&flat, &site)?;

    let code = executor::launch(&flat, &args.alias, &args.args, Some(&frozen))?;
    Ok(code)
}
