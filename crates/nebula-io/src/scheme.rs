//! URI scheme registry
//!
//! Maps a scheme string (`file`, `zip`, ...) to the factory producing the
//! stream type that handles it. Every scheme an application uses must be
//! registered before the first stream is created.

use crate::stream::Stream;
use crate::uri::Uri;
use crate::{IoError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Creates unopened streams for URIs of one scheme.
pub trait StreamFactory: Send + Sync {
    /// Instantiate a stream for `uri`. The stream is not opened.
    fn create_stream(&self, uri: &Uri) -> Box<dyn Stream>;
}

impl<F> StreamFactory for F
where
    F: Fn(&Uri) -> Box<dyn Stream> + Send + Sync,
{
    fn create_stream(&self, uri: &Uri) -> Box<dyn Stream> {
        self(uri)
    }
}

/// Registry of scheme → stream factory, shared by every server.
#[derive(Default)]
pub struct SchemeRegistry {
    schemes: RwLock<HashMap<String, Arc<dyn StreamFactory>>>,
}

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRegistry")
            .field("schemes", &self.registered_schemes())
            .finish()
    }
}

impl SchemeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a scheme.
    ///
    /// Scheme names are case-insensitive. Registering a scheme twice is a
    /// configuration error.
    pub fn register_uri_scheme(
        &self,
        scheme: &str,
        factory: Arc<dyn StreamFactory>,
    ) -> Result<()> {
        let key = scheme.to_ascii_lowercase();
        let mut schemes = self.schemes.write();
        if schemes.contains_key(&key) {
            error!("URI scheme '{}' registered twice", key);
            return Err(IoError::SchemeAlreadyRegistered(key));
        }
        debug!("Registered URI scheme '{}'", key);
        schemes.insert(key, factory);
        Ok(())
    }

    /// Remove a scheme. Returns false if it was not registered.
    pub fn unregister_uri_scheme(&self, scheme: &str) -> bool {
        self.schemes
            .write()
            .remove(&scheme.to_ascii_lowercase())
            .is_some()
    }

    /// Returns true if the scheme has a factory.
    pub fn is_uri_scheme_registered(&self, scheme: &str) -> bool {
        self.schemes
            .read()
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Look up the factory for a scheme.
    pub fn stream_factory(&self, scheme: &str) -> Result<Arc<dyn StreamFactory>> {
        self.schemes
            .read()
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| IoError::UnknownScheme(scheme.to_string()))
    }

    /// Registered scheme names, sorted.
    pub fn registered_schemes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemes.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn memory_factory() -> Arc<dyn StreamFactory> {
        Arc::new(|uri: &Uri| Box::new(MemoryStream::with_uri(uri.clone())) as Box<dyn Stream>)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SchemeRegistry::new();
        registry.register_uri_scheme("mem", memory_factory()).unwrap();

        assert!(registry.is_uri_scheme_registered("mem"));
        assert!(registry.is_uri_scheme_registered("MEM"));

        let uri = Uri::parse("mem:scratch").unwrap();
        let stream = registry.stream_factory("mem").unwrap().create_stream(&uri);
        assert_eq!(stream.uri(), &uri);
        assert!(!stream.is_open());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = SchemeRegistry::new();
        registry.register_uri_scheme("mem", memory_factory()).unwrap();
        assert!(matches!(
            registry.register_uri_scheme("Mem", memory_factory()),
            Err(IoError::SchemeAlreadyRegistered(s)) if s == "mem"
        ));
    }

    #[test]
    fn test_unknown_scheme() {
        let registry = SchemeRegistry::new();
        assert!(matches!(
            registry.stream_factory("http"),
            Err(IoError::UnknownScheme(s)) if s == "http"
        ));
    }

    #[test]
    fn test_unregister() {
        let registry = SchemeRegistry::new();
        registry.register_uri_scheme("mem", memory_factory()).unwrap();
        registry.register_uri_scheme("file", memory_factory()).unwrap();
        assert_eq!(registry.registered_schemes(), vec!["file", "mem"]);
        assert!(registry.unregister_uri_scheme("mem"));
        assert!(!registry.unregister_uri_scheme("mem"));
        assert!(!registry.is_uri_scheme_registered("mem"));
    }
}
