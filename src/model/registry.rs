use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tracing::info;

use crate::{error::ServiceError, model::HuggingFaceServer};

/// Lazily constructed model servers, one per model key, kept for the lifetime
/// of the registry. Owned by the process and handed to every client that
/// needs it.
pub struct ServerRegistry<S = HuggingFaceServer> {
    servers: Mutex<HashMap<String, Arc<S>>>,
}

impl<S> Default for ServerRegistry<S> {
    fn default() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> ServerRegistry<S> {
    /// Returns the server for `model_key`, constructing it with `create` on first
    /// use. The lock is held across construction, so concurrent first callers
    /// build it once. A failed construction is not remembered.
    pub fn get_or_create<F>(&self, model_key: &str, create: F) -> Result<Arc<S>, ServiceError>
    where
        F: FnOnce() -> Result<S, ServiceError>,
    {
        let mut servers = self.servers.lock();
        if let Some(server) = servers.get(model_key) {
            return Ok(server.clone());
        }

        info!(model = model_key, "constructing model server");
        let server = Arc::new(create()?);
        servers.insert(model_key.to_string(), server.clone());
        Ok(server)
    }

    pub fn contains(&self, model_key: &str) -> bool {
        self.servers.lock().contains_key(model_key)
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::*;

    #[test]
    fn concurrent_first_access_constructs_once() {
        let registry = Arc::new(ServerRegistry::<String>::default());
        let constructions = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let constructions = constructions.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_create("gpt2", || {
                            constructions.fetch_add(1, Ordering::SeqCst);
                            Ok("server".to_string())
                        })
                        .unwrap()
                })
            })
            .collect();

        let servers: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(servers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn failed_construction_is_retried() {
        let registry = ServerRegistry::<u32>::default();

        let err = registry
            .get_or_create("m", || Err(ServiceError::Backend("out of memory".into())))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Backend(_)));
        assert!(!registry.contains("m"));

        let server = registry.get_or_create("m", || Ok(3)).unwrap();
        assert_eq!(*server, 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let registry = ServerRegistry::<&'static str>::default();
        registry.get_or_create("a", || Ok("a")).unwrap();
        registry.get_or_create("b", || Ok("b")).unwrap();
        assert_eq!(*registry.get_or_create("a", || Ok("other")).unwrap(), "a");
        assert_eq!(registry.len(), 2);
    }
}
