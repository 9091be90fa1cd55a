// src/core/platform.rs

use pep508_rs::{MarkerEnvironment, StringVersion};

use crate::constants::KNOWN_PLATFORMS;

/// Host facts the engine needs to compose an environment for a platform.
///
/// All composition code receives a `&dyn Platform` instead of consulting
/// `cfg!` directly so tests (and the freeze codec) can run the windows rules
/// on linux and vice versa.
pub trait Platform: std::fmt::Debug + Send + Sync {
    /// Platform key used in JSON documents: `windows`, `linux` or `osx`.
    fn name(&self) -> &'static str;

    /// Separator between entries of list-valued environment variables.
    fn list_sep(&self) -> &'static str;

    /// Separator between path components.
    fn path_sep(&self) -> &'static str;

    /// A shell reference to the named environment variable.
    fn env_ref(&self, name: &str) -> String;

    /// Quotes a value so the platform's default shell treats it as one word.
    fn escape(&self, value: &str) -> String;

    /// Static facts used to evaluate PEP 508 markers for this platform.
    fn marker_environment(&self) -> MarkerEnvironment;
}

#[derive(Debug)]
pub struct WindowsPlatform;

#[derive(Debug)]
pub struct LinuxPlatform;

#[derive(Debug)]
pub struct OsxPlatform;

impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn list_sep(&self) -> &'static str {
        ";"
    }

    fn path_sep(&self) -> &'static str {
        "\\"
    }

    fn env_ref(&self, name: &str) -> String {
        format!("%{}%", name)
    }

    fn escape(&self, value: &str) -> String {
        // cmd.exe has no escape character inside quotes; doubled quotes are
        // the closest portable form.
        format!("\"{}\"", value.replace('"', "\"\""))
    }

    fn marker_environment(&self) -> MarkerEnvironment {
        marker_environment("nt", "Windows", "win32", "AMD64")
    }
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn list_sep(&self) -> &'static str {
        ":"
    }

    fn path_sep(&self) -> &'static str {
        "/"
    }

    fn env_ref(&self, name: &str) -> String {
        format!("${}", name)
    }

    fn escape(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "'\\''"))
    }

    fn marker_environment(&self) -> MarkerEnvironment {
        marker_environment("posix", "Linux", "linux", "x86_64")
    }
}

impl Platform for OsxPlatform {
    fn name(&self) -> &'static str {
        "osx"
    }

    fn list_sep(&self) -> &'static str {
        ":"
    }

    fn path_sep(&self) -> &'static str {
        "/"
    }

    fn env_ref(&self, name: &str) -> String {
        format!("${}", name)
    }

    fn escape(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "'\\''"))
    }

    fn marker_environment(&self) -> MarkerEnvironment {
        marker_environment("posix", "Darwin", "darwin", "arm64")
    }
}

static WINDOWS: WindowsPlatform = WindowsPlatform;
static LINUX: LinuxPlatform = LinuxPlatform;
static OSX: OsxPlatform = OsxPlatform;

/// The platform hab is currently running on.
pub fn current() -> &'static dyn Platform {
    if cfg!(target_os = "windows") {
        &WINDOWS
    } else if cfg!(target_os = "macos") {
        &OSX
    } else {
        &LINUX
    }
}

/// Looks up a platform by its JSON key.
pub fn from_name(name: &str) -> Option<&'static dyn Platform> {
    match name {
        "windows" => Some(&WINDOWS),
        "linux" => Some(&LINUX),
        "osx" => Some(&OSX),
        _ => None,
    }
}

/// Every platform hab can compose for, in the order of [`KNOWN_PLATFORMS`].
pub fn all() -> Vec<&'static dyn Platform> {
    KNOWN_PLATFORMS
        .iter()
        .filter_map(|name| from_name(name))
        .collect()
}

fn marker_environment(
    os_name: &str,
    platform_system: &str,
    sys_platform: &str,
    platform_machine: &str,
) -> MarkerEnvironment {
    // Static interpreter facts. Requirement markers in hab configs are about
    // the host platform, not a live interpreter, so a fixed recent version
    // is exposed for the python_* keys.
    let version: StringVersion = "3.11".parse().unwrap();
    let full_version: StringVersion = "3.11.9".parse().unwrap();
    MarkerEnvironment {
        implementation_name: "cpython".to_string(),
        implementation_version: full_version.clone(),
        os_name: os_name.to_string(),
        platform_machine: platform_machine.to_string(),
        platform_python_implementation: "CPython".to_string(),
        platform_release: String::new(),
        platform_system: platform_system.to_string(),
        platform_version: String::new(),
        python_full_version: full_version,
        python_version: version,
        sys_platform: sys_platform.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators_differ_per_platform() {
        assert_eq!(from_name("windows").unwrap().list_sep(), ";");
        assert_eq!(from_name("linux").unwrap().list_sep(), ":");
        assert_eq!(from_name("osx").unwrap().path_sep(), "/");
    }

    #[test]
    fn test_env_ref_forms() {
        assert_eq!(from_name("windows").unwrap().env_ref("PATH"), "%PATH%");
        assert_eq!(from_name("linux").unwrap().env_ref("PATH"), "$PATH");
    }

    #[test]
    fn test_marker_environment_platform_system() {
        let env = from_name("windows").unwrap().marker_environment();
        assert_eq!(env.platform_system, "Windows");
        let env = from_name("linux").unwrap().marker_environment();
        assert_eq!(env.sys_platform, "linux");
    }

    #[test]
    fn test_all_covers_known_platforms() {
        let names: Vec<_> = all().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["windows", "linux", "osx"]);
    }
}
