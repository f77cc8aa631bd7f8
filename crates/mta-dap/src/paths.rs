//! Conversion between editor paths and the backend's resource-relative paths.
//!
//! The editor works with absolute paths on the machine running the game server. The backend
//! identifies breakpoint files relative to the debugged resource, and reports paused files
//! relative to the server's resources directory. Everything here is plain string work; the
//! filesystem is never touched.

/// Normalizes separators to `/`, collapses repeated separators and resolves `.`/`..`
/// segments. A trailing separator is preserved.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let trailing = unified.ends_with('/') && unified.len() > 1;

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." && !is_drive(last) => {
                    segments.pop();
                }
                Some(&last) if is_drive(last) => {}
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let mut out = String::with_capacity(unified.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&segments.join("/"));
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// `C:`-style drive prefix.
fn is_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn with_trailing_slash(mut path: String) -> String {
    if !path.is_empty() && !path.ends_with('/') {
        path.push('/');
    }
    path
}

/// Resolves paths for one attached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    resources_root: String,
    resource_path: String,
}

impl PathTranslator {
    /// `server_path` is the game server's install directory, `resources_subdir` the resources
    /// directory below it, and `resource_path` the resource directory reported by `get_info`.
    pub fn new(server_path: &str, resources_subdir: &str, resource_path: &str) -> Self {
        let resources_root =
            with_trailing_slash(normalize(&format!("{server_path}/{resources_subdir}/")));
        let resource_path =
            with_trailing_slash(normalize(&format!("{resources_root}{resource_path}")));
        Self {
            resources_root,
            resource_path,
        }
    }

    /// The server's resources directory, with a trailing `/`.
    #[cfg(test)]
    pub fn resources_root(&self) -> &str {
        &self.resources_root
    }

    /// The debugged resource's directory, with a trailing `/`.
    #[cfg(test)]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Maps an editor path to the lowercase, `/`-separated path the backend expects for
    /// breakpoints. Paths outside the resource are returned normalized and lowercased.
    pub fn to_relative(&self, absolute: &str) -> String {
        let path = normalize(absolute).to_lowercase();
        let prefix = self.resource_path.to_lowercase();
        match path.strip_prefix(&prefix) {
            Some(rest) => rest.to_string(),
            None => path,
        }
    }

    /// Inverse of [`PathTranslator::to_relative`] for paths under the resource.
    pub fn to_absolute(&self, relative: &str) -> String {
        format!(
            "{}{}",
            self.resource_path,
            relative.replace('\\', "/").trim_start_matches('/')
        )
    }

    /// Absolute path of a file the backend reported relative to the resources root
    /// (e.g. `debug/server.lua`).
    pub fn frame_path(&self, backend_file: &str) -> String {
        normalize(&format!(
            "{}{}",
            self.resources_root,
            backend_file.trim_start_matches(['/', '\\'])
        ))
    }
}

/// Last path component, for `Source.name`.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
