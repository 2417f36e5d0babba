//! Front-end contract.
//!
//! Front ends are external collaborators: a front end must either deliver a
//! module that passes the verifier or report diagnostics through the sink
//! and fail — the IL core never accepts a half-built module (the driver
//! re-verifies whatever it is handed). The registry holds front ends
//! registered at link time; this build ships none.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::il::module::Module;
use crate::support::diag::DiagnosticSink;

/// A source-language front end producing IL modules
pub trait Frontend {
    /// Registry name (e.g. `basic`)
    fn name(&self) -> &str;

    /// Compile `source` (read from `path`) into a verified module, or
    /// report diagnostics into `sink` and fail.
    fn compile(&self, source: &str, path: &str, sink: &mut DiagnosticSink) -> Result<Module>;
}

/// Link-time registry of front ends
#[derive(Default)]
pub struct FrontendRegistry {
    frontends: HashMap<String, Box<dyn Frontend>>,
}

impl FrontendRegistry {
    /// An empty registry
    pub fn new() -> FrontendRegistry {
        FrontendRegistry::default()
    }

    /// Register a front end under its own name
    pub fn register(&mut self, frontend: Box<dyn Frontend>) {
        self.frontends.insert(frontend.name().to_string(), frontend);
    }

    /// Look up a front end by name
    pub fn get(&self, name: &str) -> Result<&dyn Frontend> {
        self.frontends
            .get(name)
            .map(|f| f.as_ref())
            .ok_or_else(|| {
                Error::Host(format!(
                    "front end '{name}' is not linked into this build"
                ))
            })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.frontends.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::source::SourceLoc;

    struct FixtureFrontend;

    impl Frontend for FixtureFrontend {
        fn name(&self) -> &str {
            "fixture"
        }

        fn compile(
            &self,
            source: &str,
            _path: &str,
            sink: &mut DiagnosticSink,
        ) -> Result<Module> {
            if source.is_empty() {
                sink.error("empty program", SourceLoc::UNKNOWN);
                return Err(Error::Host("compilation failed".to_string()));
            }
            Ok(Module::new())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut reg = FrontendRegistry::new();
        assert!(reg.get("fixture").is_err());
        reg.register(Box::new(FixtureFrontend));
        assert!(reg.get("fixture").is_ok());
        assert_eq!(reg.names(), vec!["fixture"]);
    }

    #[test]
    fn test_failed_compile_reports_diagnostics() {
        let reg = {
            let mut reg = FrontendRegistry::new();
            reg.register(Box::new(FixtureFrontend));
            reg
        };
        let mut sink = DiagnosticSink::new();
        let fe = reg.get("fixture").unwrap();
        assert!(fe.compile("", "empty.bas", &mut sink).is_err());
        assert_eq!(sink.error_count(), 1);
    }
}
