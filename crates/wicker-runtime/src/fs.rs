//! Sandboxed filesystem roots and the `fs` handler group.
//!
//! `fs.<root>.<op>` operates on paths under a registered root directory.
//! Relative paths only; absolute paths and `..` components are rejected
//! before any filesystem access.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};

use wicker_core::kernel::handler;
use wicker_core::{HandlerGroup, Kernel, Process, ProcessError, ProcessResult};

/// Named sandbox roots.
pub struct FsRoots {
    map: RwLock<HashMap<String, PathBuf>>,
}

impl FsRoots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: RwLock::new(HashMap::new()),
        })
    }

    /// Registers (or replaces) a root directory under `name`.
    pub fn register(&self, name: &str, path: impl Into<PathBuf>) {
        self.map.write().insert(name.to_lowercase(), path.into());
    }

    /// Resolves a relative path inside the named root.
    pub fn resolve(&self, name: &str, relative: &str) -> ProcessResult<PathBuf> {
        let root = self
            .map
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::not_loaded(format!("fs root '{name}' is not registered")))?;
        let relative = Path::new(relative.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ProcessError::argument(format!(
                        "path '{}' escapes fs root '{name}'",
                        relative.display()
                    )));
                }
            }
        }
        Ok(root.join(relative))
    }
}

const FS_METHODS: [&str; 16] = [
    "readfile",
    "writefile",
    "appendfile",
    "readdir",
    "mkdir",
    "mkdirall",
    "remove",
    "removeall",
    "exists",
    "isdir",
    "isfile",
    "basename",
    "dirname",
    "extname",
    "copy",
    "move",
];

/// Installs the `fs` handler group over the given roots.
pub fn install(kernel: &Arc<Kernel>, roots: &Arc<FsRoots>) {
    let mut group = HandlerGroup::new();
    for method in FS_METHODS {
        let roots = Arc::clone(roots);
        group = group.with(
            method,
            handler(move |p: Process| {
                let roots = Arc::clone(&roots);
                async move { fs_exec(roots, p).await }
            }),
        );
    }
    kernel.register_group("fs", group);
}

async fn fs_exec(roots: Arc<FsRoots>, p: Process) -> ProcessResult<Value> {
    // Pure path helpers need no root access.
    match p.method() {
        "basename" => {
            let path = p.arg_string(0)?;
            return Ok(Value::from(
                Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ));
        }
        "dirname" => {
            let path = p.arg_string(0)?;
            return Ok(Value::from(
                Path::new(&path)
                    .parent()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ));
        }
        "extname" => {
            let path = p.arg_string(0)?;
            return Ok(Value::from(
                Path::new(&path)
                    .extension()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ));
        }
        _ => {}
    }

    let path = roots.resolve(p.class(), &p.arg_string(0)?)?;
    match p.method() {
        "readfile" => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_error("readfile", &path, e))?;
            Ok(Value::from(content))
        }
        "writefile" => {
            let content = p.arg_string(1)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error("writefile", &path, e))?;
            }
            tokio::fs::write(&path, content.as_bytes())
                .await
                .map_err(|e| io_error("writefile", &path, e))?;
            Ok(Value::from(content.len() as u64))
        }
        "appendfile" => {
            let content = p.arg_string(1)?;
            let mut existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            existing.push_str(&content);
            tokio::fs::write(&path, existing.as_bytes())
                .await
                .map_err(|e| io_error("appendfile", &path, e))?;
            Ok(Value::from(content.len() as u64))
        }
        "readdir" => {
            let mut entries = tokio::fs::read_dir(&path)
                .await
                .map_err(|e| io_error("readdir", &path, e))?;
            let mut names = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                names.push(Value::from(entry.file_name().to_string_lossy().into_owned()));
            }
            Ok(Value::Array(names))
        }
        "mkdir" => {
            tokio::fs::create_dir(&path)
                .await
                .map_err(|e| io_error("mkdir", &path, e))?;
            Ok(Value::Bool(true))
        }
        "mkdirall" => {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| io_error("mkdirall", &path, e))?;
            Ok(Value::Bool(true))
        }
        "remove" => {
            let result = if path.is_dir() {
                tokio::fs::remove_dir(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| io_error("remove", &path, e))?;
            Ok(Value::Bool(true))
        }
        "removeall" => {
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(err) = result
                && err.kind() != std::io::ErrorKind::NotFound
            {
                return Err(io_error("removeall", &path, err));
            }
            Ok(Value::Bool(true))
        }
        "exists" => Ok(Value::Bool(path.exists())),
        "isdir" => Ok(Value::Bool(path.is_dir())),
        "isfile" => Ok(Value::Bool(path.is_file())),
        "copy" => {
            let to = roots.resolve(p.class(), &p.arg_string(1)?)?;
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error("copy", &to, e))?;
            }
            tokio::fs::copy(&path, &to)
                .await
                .map_err(|e| io_error("copy", &path, e))?;
            Ok(Value::Bool(true))
        }
        "move" => {
            let to = roots.resolve(p.class(), &p.arg_string(1)?)?;
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error("move", &to, e))?;
            }
            tokio::fs::rename(&path, &to)
                .await
                .map_err(|e| io_error("move", &path, e))?;
            Ok(Value::Bool(true))
        }
        other => Err(ProcessError::not_found(format!(
            "fs has no method '{other}'"
        ))),
    }
}

fn io_error(op: &str, path: &Path, err: std::io::Error) -> ProcessError {
    ProcessError::internal(format!("fs {op} '{}' failed: {err}", path.display()))
        .with_context(json!({ "op": op, "path": path.display().to_string() }))
}
