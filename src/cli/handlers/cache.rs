// src/cli/handlers/cache.rs

use anyhow::{Context, Result};
use std::fs;

use crate::cli::args::CacheArgs;
use crate::cli::Cli;
use crate::core::{cache, site};

/// `hab cache <site.json>`: scan the site and write its habcache next to
/// the site file. With `--no-cache` the habcache is removed instead.
pub fn handle(_cli: &Cli, args: &CacheArgs) -> Result<i32> {
    let merged = site::load(&[args.site_file.clone()])?;

    if args.no_cache {
        let cache_path = merged.cache_path(&args.site_file);
        if cache_path.is_file() {
            fs::remove_file(&cache_path)
                .with_context(|| format!("Could not remove '{}'", cache_path.display()))?;
            println!("Removed {}", cache_path.display());
        } else {
            println!("No habcache to remove for {}", args.site_file.display());
        }
        return Ok(0);
    }

    let cache_path = cache::write_cache(&merged, &args.site_file)?;
    println!("Wrote {}", cache_path.display());
    Ok(0)
}
