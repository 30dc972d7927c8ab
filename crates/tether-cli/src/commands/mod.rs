pub mod keygen;
pub mod monitor;
pub mod run;

use std::path::PathBuf;

/// Expand `~` to the user's home directory.
pub fn expand_tilde(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}
