use std::path::{Component, Path, PathBuf};

/// Renders paths for log lines and error messages: canonical when the path
/// exists, otherwise made absolute and lexically cleaned up.
pub trait BestEffortPathExt {
    fn best_effort_path_display(&self) -> String;
}

impl BestEffortPathExt for Path {
    fn best_effort_path_display(&self) -> String {
        if let Ok(canonical) = self.canonicalize() {
            return canonical.display().to_string();
        }

        let absolute = match std::env::current_dir() {
            Ok(current_dir) if self.is_relative() => current_dir.join(self),
            _ => self.to_path_buf(),
        };
        lexically_normalize(&absolute).display().to_string()
    }
}

impl BestEffortPathExt for PathBuf {
    fn best_effort_path_display(&self) -> String {
        self.as_path().best_effort_path_display()
    }
}

/// Drops `.` components and folds `..` into its parent without touching the
/// filesystem. `..` never climbs above the root.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut kept: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match kept.last() {
                Some(Component::Normal(_)) => {
                    kept.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => kept.push(component),
            },
            _ => kept.push(component),
        }
    }
    kept.iter().collect()
}
