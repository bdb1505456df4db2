//! Backend registry models.
//!
//! A backend is a logical database target named by the `cloud` query
//! parameter and bound to one connection URI taken from the environment.

use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

/// Built-in backends and the environment variables holding their URIs.
pub const DEFAULT_BACKENDS: [(&str, &str); 4] = [
    ("aiven_postgres", "AIVEN_POSTGRES"),
    ("aiven_mysql", "AIVEN_MYSQL"),
    ("neon_postgres", "NEON_POSTGRES"),
    ("supabase_postgres", "SUPABASE_POSTGRES"),
];

/// Optional `name=ENV_VAR,...` list of additional backends.
pub const EXTRA_BACKENDS_VAR: &str = "EXTRA_BACKENDS";

/// Wire-protocol family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// PostgreSQL and wire-compatible services.
    Postgres,
    /// MySQL / MariaDB.
    MySql,
}

impl EngineKind {
    /// Selects the engine from the URI scheme, case-insensitively.
    ///
    /// A scheme containing `postgres` (`postgres`, `postgresql`) selects
    /// PostgreSQL; one containing `mysql` selects MySQL. Anything else,
    /// including an unparseable URI, yields `None`.
    pub fn detect(uri: &str) -> Option<Self> {
        let parsed = url::Url::parse(uri).ok()?;
        let scheme = parsed.scheme().to_lowercase();
        if scheme.contains("postgres") {
            Some(EngineKind::Postgres)
        } else if scheme.contains("mysql") {
            Some(EngineKind::MySql)
        } else {
            None
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Postgres => write!(f, "postgresql"),
            EngineKind::MySql => write!(f, "mysql"),
        }
    }
}

/// One registered backend whose URI variable was present and non-empty.
#[derive(Clone)]
pub struct BackendConfig {
    /// Logical name used by callers.
    pub name: String,
    /// Environment variable the URI came from.
    pub env_var: String,
    /// Connection URI (contains credentials, never logged).
    pub uri: String,
}

impl BackendConfig {
    /// Engine selected by the URI scheme.
    pub fn engine(&self) -> Option<EngineKind> {
        EngineKind::detect(&self.uri)
    }

    /// URI scheme for log messages, without credentials.
    pub fn scheme(&self) -> String {
        self.uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_lowercase())
            .unwrap_or_default()
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("env_var", &self.env_var)
            .field("uri", &"***")
            .finish()
    }
}

/// Static name → URI mapping, resolved once at process start.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<BackendConfig>,
}

impl BackendRegistry {
    /// Resolves the registry from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the registry through an arbitrary key lookup.
    ///
    /// Backends whose variable is unset or empty are skipped with a warning.
    /// Names listed in `EXTRA_BACKENDS` that repeat a built-in name are
    /// ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut entries: Vec<(String, String)> = DEFAULT_BACKENDS
            .iter()
            .map(|(name, var)| (name.to_string(), var.to_string()))
            .collect();

        if let Some(extra) = lookup(EXTRA_BACKENDS_VAR) {
            for item in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match item.split_once('=') {
                    Some((name, var)) if !name.trim().is_empty() && !var.trim().is_empty() => {
                        let name = name.trim().to_string();
                        if entries.iter().any(|(n, _)| *n == name) {
                            tracing::warn!(backend = %name, "Duplicate backend name in {}; ignoring", EXTRA_BACKENDS_VAR);
                            continue;
                        }
                        entries.push((name, var.trim().to_string()));
                    }
                    _ => {
                        tracing::warn!(entry = %item, "Malformed entry in {}; expected name=ENV_VAR", EXTRA_BACKENDS_VAR);
                    }
                }
            }
        }

        let mut backends = Vec::with_capacity(entries.len());
        for (name, env_var) in entries {
            match lookup(&env_var).filter(|v| !v.trim().is_empty()) {
                Some(uri) => backends.push(BackendConfig {
                    name,
                    env_var,
                    uri: uri.trim().to_string(),
                }),
                None => {
                    tracing::warn!(backend = %name, "Env var {} not set; skipping pool", env_var);
                }
            }
        }

        Self { backends }
    }

    /// Builds a registry from explicit entries.
    pub fn from_backends(backends: Vec<BackendConfig>) -> Self {
        Self { backends }
    }

    pub fn backends(&self) -> &[BackendConfig] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
