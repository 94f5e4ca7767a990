//! Program resolution against the backend tree.
//!
//! Demo executables live at `<backend_dir>/<category>/<program>`.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};

use ipcscope_core::Category;
use tracing::debug;

use super::error::SupervisorError;

/// File extensions and names in the backend tree that are never programs.
const SKIPPED_EXTENSIONS: &[&str] = &["cpp", "h", "hpp", "md", "o"];
const SKIPPED_NAMES: &[&str] = &["Makefile"];

/// Resolve `program` to an existing executable file.
pub fn resolve_program(
    backend_dir: &Path,
    category: Category,
    program: &str,
) -> Result<PathBuf, SupervisorError> {
    if !is_plain_name(program) {
        return Err(SupervisorError::InvalidProgramName {
            program: program.to_string(),
        });
    }

    let path = backend_dir.join(category.as_str()).join(program);
    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => {
            return Err(SupervisorError::ProgramNotFound {
                category,
                program: program.to_string(),
                searched: path,
            });
        }
    };
    if !is_executable(&metadata) {
        return Err(SupervisorError::NotExecutable { path });
    }
    Ok(path)
}

/// Runnable programs per category, sorted by name. Missing category
/// directories yield empty lists.
pub fn list_programs(backend_dir: &Path) -> BTreeMap<Category, Vec<String>> {
    Category::ALL
        .into_iter()
        .map(|category| (category, programs_in(&backend_dir.join(category.as_str()))))
        .collect()
}

fn programs_in(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Category directory unreadable");
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            if name.starts_with('.') || SKIPPED_NAMES.contains(&name.as_str()) {
                return None;
            }
            let skipped_ext = Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SKIPPED_EXTENSIONS.contains(&e));
            if skipped_ext {
                return None;
            }
            let metadata = std::fs::metadata(entry.path()).ok()?;
            (metadata.is_file() && is_executable(&metadata)).then_some(name)
        })
        .collect();
    names.sort();
    names
}

fn is_plain_name(program: &str) -> bool {
    let mut components = Path::new(program).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !program.contains(['/', '\\'])
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn is_executable(_metadata: &Metadata) -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn touch(path: &Path, mode: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
        }
        #[cfg(not(unix))]
        let _ = mode;
    }

    #[test]
    fn resolves_executable_program() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("pipes").join("pipe_monitor");
        touch(&exe, 0o755);
        let resolved = resolve_program(dir.path(), Category::Pipes, "pipe_monitor").unwrap();
        assert_eq!(resolved, exe);
    }

    #[test]
    fn missing_program_reports_searched_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_program(dir.path(), Category::Pipes, "nonexistent").unwrap_err();
        let SupervisorError::ProgramNotFound { searched, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(searched.ends_with("pipes/nonexistent"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn path_components_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for program in ["", ".", "..", "../pipes/pipe_monitor", "sub/prog", "/bin/sh"] {
            assert!(
                matches!(
                    resolve_program(dir.path(), Category::Pipes, program),
                    Err(SupervisorError::InvalidProgramName { .. })
                ),
                "{program:?}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sockets").join("server"), 0o644);
        assert!(matches!(
            resolve_program(dir.path(), Category::Sockets, "server"),
            Err(SupervisorError::NotExecutable { .. })
        ));
    }

    #[test]
    fn lists_only_runnable_programs() {
        let dir = tempfile::tempdir().unwrap();
        let sockets = dir.path().join("sockets");
        touch(&sockets.join("server"), 0o755);
        touch(&sockets.join("client"), 0o755);
        touch(&sockets.join("server.cpp"), 0o755);
        touch(&sockets.join("Makefile"), 0o755);
        touch(&sockets.join(".hidden"), 0o755);

        let programs = list_programs(dir.path());
        assert_eq!(programs[&Category::Sockets], vec!["client", "server"]);
        assert!(programs[&Category::Pipes].is_empty());
        assert!(programs[&Category::SharedMemory].is_empty());
    }
}
