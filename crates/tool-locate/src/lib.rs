//! # tool-locate
//!
//! Find the external binaries the `pixmorph` pipeline shells out to:
//!
//! | Tool | Binaries searched | Override |
//! |------|-------------------|----------|
//! | Converter (ImageMagick) | `magick`, then `convert` (not on Windows) | `PIXMORPH_CONVERTER_PATH` |
//! | Rasterizer (Ghostscript) | `gs`; `gswin64c`, `gswin32c` on Windows | `PIXMORPH_RASTERIZER_PATH` |
//!
//! ## How it works
//!
//! 1. If the override variable is set, that path is used verbatim. A set
//!    variable pointing at a missing file is an error, not a silent fallback.
//! 2. Otherwise each candidate name is looked up on `PATH`.
//! 3. Otherwise the platform's well-known install locations are scanned:
//!    - **macOS**: `/opt/homebrew/bin`, `/usr/local/bin`, `/opt/local/bin`
//!    - **Linux**: `/usr/local/bin`, `/usr/bin`, `/snap/bin`
//!    - **Windows**: `%ProgramFiles%\ImageMagick-*\` and
//!      `%ProgramFiles%\gs\gs*\bin\`
//!
//! Nothing is cached here. Callers resolve once and keep the [`PathBuf`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tool_locate::{locate, Tool};
//!
//! let gs = locate(Tool::Rasterizer).expect("Ghostscript not installed");
//! println!("using {}", gs.display());
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by tool lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// The override variable names a file that does not exist.
    #[error("{var} is set to '{path}' but no file exists there")]
    EnvPathMissing { var: &'static str, path: PathBuf },

    /// No candidate binary was found anywhere.
    #[error("{tool} not found (looked for {searched:?} on PATH and in standard install dirs); install it or set {env_var}")]
    NotFound {
        tool: &'static str,
        env_var: &'static str,
        searched: Vec<&'static str>,
    },
}

// ── Tools ────────────────────────────────────────────────────────────────────

/// External binaries the conversion pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// General raster/vector/icon converter (ImageMagick).
    Converter,
    /// PDF / PostScript / EPS page rasterizer (Ghostscript).
    Rasterizer,
}

impl Tool {
    /// Human-readable name used in error messages.
    pub fn display_name(self) -> &'static str {
        match self {
            Tool::Converter => "ImageMagick",
            Tool::Rasterizer => "Ghostscript",
        }
    }

    /// Environment variable that overrides the search.
    pub fn env_var(self) -> &'static str {
        match self {
            Tool::Converter => "PIXMORPH_CONVERTER_PATH",
            Tool::Rasterizer => "PIXMORPH_RASTERIZER_PATH",
        }
    }

    /// Binary names tried in order on the current platform.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            // `convert.exe` on Windows is the FAT→NTFS system utility.
            Tool::Converter if cfg!(windows) => &["magick"],
            Tool::Converter => &["magick", "convert"],
            Tool::Rasterizer if cfg!(windows) => &["gswin64c", "gswin32c", "gs"],
            Tool::Rasterizer => &["gs"],
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Locate `tool` using the process environment.
pub fn locate(tool: Tool) -> Result<PathBuf, LocateError> {
    locate_with(
        tool,
        std::env::var_os(tool.env_var()),
        std::env::var_os("PATH"),
        &install_dirs(tool),
    )
}

/// Locate `tool` from explicit inputs instead of the process environment.
///
/// `override_path` is the value of the override variable (if set),
/// `search_path` a `PATH`-style list, and `extra_dirs` the directories
/// scanned after `PATH`.
pub fn locate_with(
    tool: Tool,
    override_path: Option<OsString>,
    search_path: Option<OsString>,
    extra_dirs: &[PathBuf],
) -> Result<PathBuf, LocateError> {
    if let Some(raw) = override_path.filter(|v| !v.is_empty()) {
        let p = PathBuf::from(raw);
        if p.is_file() {
            return Ok(p);
        }
        return Err(LocateError::EnvPathMissing {
            var: tool.env_var(),
            path: p,
        });
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if let Some(paths) = search_path.filter(|v| !v.is_empty()) {
        for name in tool.candidates() {
            if let Ok(found) = which::which_in(name, Some(&paths), &cwd) {
                return Ok(found);
            }
        }
    }

    for dir in extra_dirs {
        for name in tool.candidates() {
            if let Some(found) = executable_in(dir, name) {
                return Ok(found);
            }
        }
    }

    Err(LocateError::NotFound {
        tool: tool.display_name(),
        env_var: tool.env_var(),
        searched: tool.candidates().to_vec(),
    })
}

/// Well-known install directories for `tool` on the current platform.
pub fn install_dirs(tool: Tool) -> Vec<PathBuf> {
    if cfg!(target_os = "macos") {
        ["/opt/homebrew/bin", "/usr/local/bin", "/opt/local/bin"]
            .iter()
            .map(PathBuf::from)
            .collect()
    } else if cfg!(windows) {
        let roots = ["ProgramFiles", "ProgramFiles(x86)"]
            .iter()
            .filter_map(|v| std::env::var_os(v))
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        windows_install_dirs(tool, &roots)
    } else {
        ["/usr/local/bin", "/usr/bin", "/snap/bin"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Versioned install dirs under each Program Files root, newest first.
fn windows_install_dirs(tool: Tool, roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for root in roots {
        match tool {
            Tool::Converter => {
                dirs.extend(versioned_subdirs(root, "ImageMagick-"));
            }
            Tool::Rasterizer => {
                let gs_root = root.join("gs");
                dirs.extend(
                    versioned_subdirs(&gs_root, "gs")
                        .into_iter()
                        .map(|d| d.join("bin")),
                );
            }
        }
    }
    dirs
}

fn versioned_subdirs(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .map(|e| e.path())
        .collect();
    // Lexicographic descending is close enough to "newest first" for
    // both `gs10.03.1` and `ImageMagick-7.1.1-Q16-HDRI`.
    found.sort();
    found.reverse();
    found
}

fn executable_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut path = dir.join(name);
    if cfg!(windows) && path.extension().is_none() {
        path.set_extension("exe");
    }
    path.is_file().then_some(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
