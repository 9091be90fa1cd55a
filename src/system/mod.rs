//! # System Interaction Layer
//!
//! This module is the boundary between the resolution engine and the
//! operating system: script generation for the shell wrappers, and process
//! launching for `hab launch`.
//!
//! ## Modules
//!
//! - **`renderer`**: The script renderer contract (`iter_env_ops`,
//!   `iter_aliases`, escaping helpers) and the bash / powershell / batch
//!   renderers that write `hab_config` and `hab_launch` scripts.
//! - **`executor`**: Spawns an alias with the resolved environment applied,
//!   inheriting stdio and forwarding the child's exit code. Also picks
//!   per-invocation scratch directories.

pub mod executor;
pub mod renderer;
