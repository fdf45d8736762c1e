use std::path::{Path, PathBuf};

use rhai::AST;

/// One loaded `.rhai` source file: either a compiled plugin or a record of
/// why it failed to load (spec §3 `Interceptor`).
pub struct Plugin {
    pub name: String,
    pub source_path: PathBuf,
    pub has_match: bool,
    pub ast: Option<AST>,
    pub load_error: Option<String>,
}

pub fn load_dir(engine: &rhai::Engine, dir: &Path) -> std::io::Result<Vec<Plugin>> {
    let mut plugins = Vec::new();
    if !dir.is_dir() {
        return Ok(plugins);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|ext| ext == "rhai").unwrap_or(false))
        .collect();
    entries.sort();

    for path in entries {
        plugins.push(load_one(engine, &path));
    }
    Ok(plugins)
}

fn load_one(engine: &rhai::Engine, path: &Path) -> Plugin {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            return Plugin {
                name,
                source_path: path.to_path_buf(),
                has_match: false,
                ast: None,
                load_error: Some(format!("failed to read {}: {e}", path.display())),
            }
        }
    };

    match engine.compile(&source) {
        Ok(ast) => {
            let has_handle = ast
                .iter_functions()
                .any(|f| f.name == "handle_request" && f.params.len() == 2);
            let has_match = ast
                .iter_functions()
                .any(|f| f.name == "match_request" && f.params.len() == 1);

            if !has_handle {
                return Plugin {
                    name,
                    source_path: path.to_path_buf(),
                    has_match,
                    ast: None,
                    load_error: Some("plugin does not define handle_request(req, ctx)".to_string()),
                };
            }

            Plugin { name, source_path: path.to_path_buf(), has_match, ast: Some(ast), load_error: None }
        }
        Err(e) => Plugin {
            name,
            source_path: path.to_path_buf(),
            has_match: false,
            ast: None,
            load_error: Some(format!("compile error: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_valid_plugin() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("block.rhai"),
            "fn match_request(req) { true }\nfn handle_request(req, ctx) { () }\n",
        )
        .unwrap();
        let engine = rhai::Engine::new();
        let plugins = load_dir(&engine, dir.path()).unwrap();
        assert_eq!(plugins.len(), 1);
        assert!(plugins[0].load_error.is_none());
        assert!(plugins[0].has_match);
    }

    #[test]
    fn records_load_error_for_missing_handler() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.rhai"), "fn match_request(req) { true }\n").unwrap();
        let engine = rhai::Engine::new();
        let plugins = load_dir(&engine, dir.path()).unwrap();
        assert!(plugins[0].load_error.is_some());
    }

    #[test]
    fn ignores_non_rhai_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let engine = rhai::Engine::new();
        let plugins = load_dir(&engine, dir.path()).unwrap();
        assert!(plugins.is_empty());
    }
}
