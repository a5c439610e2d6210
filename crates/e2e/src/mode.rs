//! Execution mode resolution

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::config::{keys, ConfigSource};

/// How the browser renders for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Interactive,
    Headless,
}

impl ExecutionMode {
    pub fn is_headless(self) -> bool {
        matches!(self, ExecutionMode::Headless)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Interactive => "interactive",
            ExecutionMode::Headless => "headless",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpret a headless flag. `None` means "not a recognizable value".
fn parse_flag(raw: &str) -> Option<ExecutionMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(ExecutionMode::Headless),
        "false" | "0" | "no" | "off" => Some(ExecutionMode::Interactive),
        _ => None,
    }
}

/// Resolves the execution mode once and caches it.
///
/// Order: explicit override, then the `headless` config key, then
/// [`ExecutionMode::Interactive`].
pub struct ModeResolver {
    override_flag: Option<String>,
    source: Arc<dyn ConfigSource>,
    resolved: OnceCell<ExecutionMode>,
}

impl ModeResolver {
    pub fn new(override_flag: Option<String>, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            override_flag,
            source,
            resolved: OnceCell::new(),
        }
    }

    /// Already-resolved mode, bypassing lookup entirely.
    pub fn fixed(mode: ExecutionMode) -> Self {
        let resolver = Self::new(None, Arc::new(crate::config::MapSource::new()));
        let _ = resolver.resolved.set(mode);
        resolver
    }

    pub fn resolve(&self) -> ExecutionMode {
        *self.resolved.get_or_init(|| {
            let (mode, origin) = if let Some(mode) =
                self.override_flag.as_deref().and_then(parse_flag)
            {
                (mode, "override")
            } else if let Some(mode) = self
                .source
                .get(keys::HEADLESS)
                .as_deref()
                .and_then(parse_flag)
            {
                (mode, "config")
            } else {
                (ExecutionMode::default(), "default")
            };
            info!(%mode, origin, "Resolved execution mode");
            mode
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapSource;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(" TRUE "), Some(ExecutionMode::Headless));
        assert_eq!(parse_flag("off"), Some(ExecutionMode::Interactive));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_resolution_is_cached() {
        let resolver = ModeResolver::new(Some("1".into()), Arc::new(MapSource::new()));
        assert_eq!(resolver.resolve(), ExecutionMode::Headless);
        assert_eq!(resolver.resolve(), ExecutionMode::Headless);
    }

    #[test]
    fn test_fixed() {
        assert_eq!(
            ModeResolver::fixed(ExecutionMode::Headless).resolve(),
            ExecutionMode::Headless
        );
    }
}
