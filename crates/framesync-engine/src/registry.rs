//! Render-thread resource cache keyed by stable string ids.
//!
//! Frame code that needs a lazily built, size-dependent resource (a
//! texture, an offscreen figure, a layout cache) keeps it in a
//! [`Registry`] owned by the runtime rather than in a global. Lifecycles
//! are explicit:
//!
//! - create on miss,
//! - recreate when the requested size differs from the cached one,
//! - destroy the previous resource whenever one is replaced or removed.
//!
//! Each entry carries a dirty flag so state changes can request a
//! redraw without rebuilding the resource.

use indexmap::IndexMap;
use tracing::trace;

/// Width and height in pixels.
pub type Size = (u32, u32);

/// A cached render resource.
pub trait Resource {
    /// Release the resource. Called exactly once, when the registry
    /// replaces, removes or drops it.
    fn destroy(&mut self) {}
}

impl Resource for () {}

struct Entry<R> {
    resource: R,
    size: Size,
    dirty: bool,
}

/// Arena-style map of resources owned by the render loop.
pub struct Registry<R: Resource> {
    entries: IndexMap<String, Entry<R>>,
    created: u64,
    destroyed: u64,
}

impl<R: Resource> Default for Registry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> Registry<R> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            created: 0,
            destroyed: 0,
        }
    }

    /// The resource for `id` at `size`, creating it on miss and
    /// recreating it on size mismatch. New resources start dirty.
    pub fn get_or_create(
        &mut self,
        id: &str,
        size: Size,
        create: impl FnOnce(Size) -> R,
    ) -> &mut R {
        let stale = self.entries.get(id).is_some_and(|e| e.size != size);
        if stale {
            if let Some(mut old) = self.entries.shift_remove(id) {
                trace!(id, ?size, "resource size changed, recreating");
                self.destroy_entry(&mut old);
            }
        }
        let created = &mut self.created;
        let entry = self.entries.entry(id.to_string()).or_insert_with(|| {
            *created += 1;
            Entry {
                resource: create(size),
                size,
                dirty: true,
            }
        });
        &mut entry.resource
    }

    /// Install `resource` under `id`, destroying any previous one.
    /// The new entry starts dirty.
    pub fn replace(&mut self, id: &str, size: Size, resource: R) {
        self.created += 1;
        let previous = self.entries.insert(
            id.to_string(),
            Entry {
                resource,
                size,
                dirty: true,
            },
        );
        if let Some(mut old) = previous {
            self.destroy_entry(&mut old);
        }
    }

    /// Destroy and forget the resource under `id`. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entries.shift_remove(id) {
            Some(mut old) => {
                self.destroy_entry(&mut old);
                true
            }
            None => false,
        }
    }

    /// Mark `id` dirty. Returns whether it exists.
    pub fn invalidate(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Mark every entry dirty.
    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.dirty = true;
        }
    }

    /// Clear and return the dirty flag of `id` (`false` if absent).
    pub fn take_dirty(&mut self, id: &str) -> bool {
        self.entries
            .get_mut(id)
            .is_some_and(|e| std::mem::replace(&mut e.dirty, false))
    }

    /// Whether `id` is marked dirty.
    pub fn is_dirty(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|e| e.dirty)
    }

    /// The cached resource, if any.
    pub fn get(&self, id: &str) -> Option<&R> {
        self.entries.get(id).map(|e| &e.resource)
    }

    /// The cached resource, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut R> {
        self.entries.get_mut(id).map(|e| &mut e.resource)
    }

    /// Size the resource was created at.
    pub fn size(&self, id: &str) -> Option<Size> {
        self.entries.get(id).map(|e| e.size)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of cached resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resources created so far.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Resources destroyed so far.
    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    /// Destroy every resource.
    pub fn clear(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for (_, mut entry) in entries {
            self.destroy_entry(&mut entry);
        }
    }

    fn destroy_entry(&mut self, entry: &mut Entry<R>) {
        entry.resource.destroy();
        self.destroyed += 1;
    }
}

impl<R: Resource> Drop for Registry<R> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<R: Resource> std::fmt::Debug for Registry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("ids", &self.entries.keys().collect::<Vec<_>>())
            .field("created", &self.created)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
