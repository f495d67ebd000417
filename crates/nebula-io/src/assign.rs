//! Assign registry: symbolic path prefixes
//!
//! An assign maps a name such as `home` to a location string, usually a
//! `file:` URI ending in `/`. A path like `home:textures/a.dds` resolves by
//! replacing the leading `home:` token with the assign's value. Values may
//! themselves start with another assign token; resolution repeats until no
//! registered token is left, up to [`MAX_ASSIGN_DEPTH`] substitutions.

use crate::uri::Uri;
use crate::{IoError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Maximum number of assign substitutions before resolution is declared cyclic.
pub const MAX_ASSIGN_DEPTH: usize = 8;

/// A single name → path mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assign {
    /// Assign name without the trailing colon.
    pub name: String,
    /// Location the name expands to.
    pub path: String,
}

impl Assign {
    /// Create an assign.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Registry of assigns shared by every server in the process.
#[derive(Debug, Default)]
pub struct AssignRegistry {
    assigns: RwLock<HashMap<String, String>>,
}

impl AssignRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or overwrite an assign.
    pub fn set_assign(&self, assign: Assign) {
        debug!("Assign {}: -> {}", assign.name, assign.path);
        self.assigns.write().insert(assign.name, assign.path);
    }

    /// Returns true if an assign with this name exists.
    pub fn has_assign(&self, name: &str) -> bool {
        self.assigns.read().contains_key(name)
    }

    /// Look up the path an assign expands to.
    pub fn get_assign(&self, name: &str) -> Result<String> {
        self.assigns
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| IoError::AssignNotFound(name.to_string()))
    }

    /// Remove an assign. Returns false if it did not exist.
    pub fn clear_assign(&self, name: &str) -> bool {
        self.assigns.write().remove(name).is_some()
    }

    /// All assigns, sorted by name.
    pub fn assigns(&self) -> Vec<Assign> {
        let mut list: Vec<Assign> = self
            .assigns
            .read()
            .iter()
            .map(|(name, path)| Assign::new(name.clone(), path.clone()))
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Expand leading assign tokens in `path`.
    ///
    /// A token is the text before the first `:` when it is at least two
    /// characters long and names a registered assign. Anything else (drive
    /// letters, URI schemes, plain paths) stops resolution. Fails with
    /// [`IoError::CyclicAssign`] if a registered token is still present after
    /// [`MAX_ASSIGN_DEPTH`] substitutions.
    pub fn resolve_assigns_in_string(&self, path: &str) -> Result<String> {
        let assigns = self.assigns.read();
        let mut current = path.to_string();

        for depth in 0..=MAX_ASSIGN_DEPTH {
            let Some((name, rest)) = split_assign_token(&current) else {
                return Ok(current);
            };
            let Some(value) = assigns.get(name) else {
                return Ok(current);
            };
            if depth == MAX_ASSIGN_DEPTH {
                return Err(IoError::CyclicAssign {
                    path: path.to_string(),
                    depth,
                });
            }
            current = join_assign(value, rest);
        }

        Ok(current)
    }

    /// Define the standard assigns relative to an application root directory.
    ///
    /// - `root`: the root directory itself
    /// - `home`: alias of `root`
    /// - `export`: `root:export`
    /// - `bin`: directory of the running executable, falling back to `root`
    /// - `temp`: the system temp directory
    /// - `user`: the user's document directory, falling back to the home directory
    pub fn setup_standard_assigns(&self, root: &Path) {
        self.set_assign(Assign::new("root", directory_uri(root)));
        self.set_assign(Assign::new("home", "root:"));
        self.set_assign(Assign::new("export", "root:export/"));

        let bin = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(directory_uri))
            .unwrap_or_else(|| "root:".to_string());
        self.set_assign(Assign::new("bin", bin));

        self.set_assign(Assign::new("temp", directory_uri(&std::env::temp_dir())));

        if let Some(user) = dirs::document_dir().or_else(dirs::home_dir) {
            self.set_assign(Assign::new("user", directory_uri(&user)));
        }
    }
}

/// `file:` URI string for a directory, always ending in `/`.
fn directory_uri(dir: &Path) -> String {
    let mut uri = Uri::from_native_path(dir).as_string();
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn split_assign_token(s: &str) -> Option<(&str, &str)> {
    let (name, rest) = s.split_once(':')?;
    let valid = name.len() >= 2
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some((name, rest))
}

fn join_assign(value: &str, rest: &str) -> String {
    if rest.is_empty() {
        return value.to_string();
    }
    if value.ends_with('/') || value.ends_with(':') {
        format!("{value}{}", rest.trim_start_matches('/'))
    } else {
        format!("{value}/{}", rest.trim_start_matches('/'))
    }
}
