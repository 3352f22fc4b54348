use std::collections::HashMap;
use std::sync::Arc;

use crate::collection::Collection;
use crate::schema::CollectionSchema;

/// A store bound to the schema it was registered with.
#[derive(Clone)]
pub struct RegisteredCollection {
    pub store: Arc<dyn Collection>,
    pub schema: Arc<CollectionSchema>,
}

/// Maps collection names to their store and schema.
#[derive(Default)]
pub struct CollectionRegistry {
    collections: HashMap<String, RegisteredCollection>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
        }
    }

    /// Register under the schema's name, replacing any earlier registration.
    pub fn register(&mut self, schema: CollectionSchema, store: Arc<dyn Collection>) {
        let name = schema.name().to_string();
        self.collections.insert(
            name,
            RegisteredCollection {
                store,
                schema: Arc::new(schema),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredCollection> {
        self.collections.get(name)
    }
}
