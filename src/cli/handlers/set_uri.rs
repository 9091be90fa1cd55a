// src/cli/handlers/set_uri.rs

use anyhow::Result;

use crate::cli::args::SetUriArgs;
use crate::cli::handlers::commons;
use crate::cli::Cli;
use crate::core::prefs;

/// `hab set-uri [URI]`: save the preferred URI for later `-` invocations,
/// or show the current one.
pub fn handle(cli: &Cli, args: &SetUriArgs) -> Result<i32> {
    match &args.uri {
        Some(raw) => {
            let site = commons::load_site(cli)?;
            let forests = commons::load_forests(&site)?;
            // Saving a URI that cannot resolve would only defer the error.
            let flat = commons::resolve_flat(cli, &site, &forests, raw)?;
            prefs::save_uri(&flat.uri_requested)?;
            println!("Saved URI: {}", flat.uri_requested);
        }
        None => match prefs::last_uri(None) {
            Ok(uri) => println!("{}", uri),
            Err(prefs::PrefsError::NoSavedUri) => println!("No URI is saved."),
            Err(err) => return Err(err.into()),
        },
    }
    Ok(0)
}
