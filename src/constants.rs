// src/constants.rs

/// The file name that marks a directory as a distro release.
pub const DISTRO_CONFIG_FILENAME: &str = ".hab.json";

/// Sidecar file consulted when a distro does not declare its own version.
pub const DISTRO_VERSION_FILENAME: &str = ".hab_version.txt";

/// The reserved root name of the fallback config tree.
pub const DEFAULT_URI: &str = "default";

/// Environment variable listing site files, highest priority first.
pub const HAB_PATHS_ENV: &str = "HAB_PATHS";

/// Environment variable recording the requested URI of the active environment.
pub const HAB_URI_ENV: &str = "HAB_URI";

/// Environment variable carrying the encoded freeze of the active environment.
pub const HAB_FREEZE_ENV: &str = "HAB_FREEZE";

/// Environment variable selecting the windows scratch-directory naming strategy.
pub const HAB_RANDOM_ENV: &str = "HAB_RANDOM";

/// Environment variable forcing every load to bypass habcache files (testing).
pub const HAB_TEST_UNCACHED_ONLY_ENV: &str = "HAB_TEST_UNCACHED_ONLY";

/// Environment variables owned by hab. User configs may not set or unset these.
pub const RESERVED_ENV_VARS: &[&str] = &[HAB_URI_ENV, HAB_FREEZE_ENV];

/// `PATH` may be extended but never replaced or removed.
pub const PATH_ENV: &str = "PATH";

/// Formatter variable names that user configs may not redefine.
pub const RESERVED_VARIABLE_NAMES: &[&str] = &["relative_root", ";"];

/// Freeze format version written when the site does not pin one.
pub const DEFAULT_FREEZE_VERSION: u32 = 1;

/// Version of the habcache file format.
pub const HABCACHE_VERSION: u32 = 1;

/// Template for the habcache sidecar name. `{stem}` is the site file stem.
pub const DEFAULT_SITE_CACHE_FILE_TEMPLATE: &str = "{stem}.habcache";

/// Base name of the environment-configuration script written for the wrapper.
pub const CONFIG_SCRIPT_NAME: &str = "hab_config";

/// Base name of the launch script. The wrapper prefers it when both exist.
pub const LAUNCH_SCRIPT_NAME: &str = "hab_launch";

/// File storing saved user preferences (last URI) under the config dir.
pub const PREFS_FILENAME: &str = "prefs.json";

/// The entry point consulted by the site loader for additional site files.
pub const ADD_PATHS_ENTRY_POINT: &str = "hab.site.add_paths";

/// All platforms hab understands, in the order reports list them.
pub const KNOWN_PLATFORMS: &[&str] = &["windows", "linux", "osx"];
