//! Runtime capability dispatch.
//!
//! A [`Capability`] probes the host once, caches the answer for the life of
//! the process, and hands out the selected implementation from then on.

use crate::error::{Result, StreamError};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const ZIP_BACKEND_ENV: &str = "STREAMSTACK_ZIP_BACKEND";

/// A lazily probed, cached implementation choice
pub struct Capability<T: 'static> {
    name: &'static str,
    hint: &'static str,
    probe: fn() -> Option<T>,
    resolved: OnceLock<Option<T>>,
}

impl<T: fmt::Debug + Send + Sync + 'static> Capability<T> {
    pub const fn new(name: &'static str, hint: &'static str, probe: fn() -> Option<T>) -> Self {
        Self {
            name,
            hint,
            probe,
            resolved: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The selected implementation; probes on first call only
    pub fn resolve(&self) -> Result<&T> {
        self.resolved
            .get_or_init(|| {
                let selected = (self.probe)();
                tracing::debug!(capability = self.name, ?selected, "probed runtime capability");
                selected
            })
            .as_ref()
            .ok_or_else(|| self.missing())
    }

    pub fn is_available(&self) -> bool {
        self.resolve().is_ok()
    }

    pub fn missing(&self) -> StreamError {
        StreamError::MissingDependency {
            capability: self.name,
            hint: self.hint,
        }
    }
}

/// Host programs backing the system zip backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemZip {
    pub unzip: PathBuf,
    /// Only needed for writing
    pub zip: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipBackend {
    /// In-process, compiled in with the `zip` feature
    Embedded,
    /// The host's `unzip`/`zip` programs
    System(SystemZip),
}

impl fmt::Display for ZipBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipBackend::Embedded => write!(f, "embedded"),
            ZipBackend::System(sys) => write!(f, "system ({})", sys.unzip.display()),
        }
    }
}

pub static ZIP_ARCHIVES: Capability<ZipBackend> = Capability::new(
    "zip archives",
    "build with the `zip` feature or install the `unzip` and `zip` programs",
    probe_zip,
);

fn probe_zip() -> Option<ZipBackend> {
    let preference = std::env::var(ZIP_BACKEND_ENV).ok();
    select_zip_backend(preference.as_deref(), cfg!(feature = "zip"), find_program)
}

/// Pick a zip backend. `preference` comes from the environment and may force
/// either backend; otherwise the embedded one wins when compiled in.
pub fn select_zip_backend(
    preference: Option<&str>,
    compiled_in: bool,
    find: impl Fn(&str) -> Option<PathBuf>,
) -> Option<ZipBackend> {
    let system = || {
        find("unzip").map(|unzip| {
            ZipBackend::System(SystemZip {
                unzip,
                zip: find("zip"),
            })
        })
    };
    let embedded = || compiled_in.then_some(ZipBackend::Embedded);

    match preference.map(|p| p.trim().to_lowercase()) {
        Some(p) if p == "system" => system(),
        Some(p) if p == "embedded" => embedded(),
        Some(p) if !p.is_empty() => {
            tracing::warn!(preference = %p, "ignoring unknown {}", ZIP_BACKEND_ENV);
            embedded().or_else(system)
        }
        _ => embedded().or_else(system),
    }
}

/// Look a program up on `PATH`
pub fn find_program(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
