use std::sync::Arc;

use crate::collection::Collection;
use crate::config::CollectionOptions;
use crate::error::Result;
use crate::hooks::Hooks;
use crate::store::BlobStore;
use crate::vector::{VectorCollection, VectorOptions};

/// Handle over one blob store. Collections are cheap, stateless views:
/// constructing one performs no I/O, and any number of handles to the
/// same name may coexist (within or across processes).
#[derive(Clone)]
pub struct Coldbase {
    store: Arc<dyn BlobStore>,
    defaults: CollectionOptions,
    hooks: Hooks,
}

impl Coldbase {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            defaults: CollectionOptions::default(),
            hooks: Hooks::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: CollectionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Open a collection with the database defaults. Fails on an
    /// invalid name before any storage is touched.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        Collection::open(
            self.store.clone(),
            name,
            self.defaults.clone(),
            self.hooks.clone(),
        )
    }

    pub fn collection_with_options(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Collection> {
        Collection::open(self.store.clone(), name, options, self.hooks.clone())
    }

    pub fn vector_collection(&self, name: &str, options: VectorOptions) -> Result<VectorCollection> {
        let documents = Collection::open(
            self.store.clone(),
            name,
            options.collection.clone(),
            self.hooks.clone(),
        )?;
        Ok(VectorCollection::new(documents, &options))
    }
}
