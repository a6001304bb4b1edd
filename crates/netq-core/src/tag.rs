//! Caller-supplied payload attached to jobs and groups.

use std::any::Any;
use std::sync::{Arc, RwLock};

use crate::sync::{read_lock, write_lock};

/// Opaque user object. netq never inspects it.
pub type Tag = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub(crate) struct TagSlot {
    value: RwLock<Option<Tag>>,
}

impl TagSlot {
    pub(crate) fn get(&self) -> Option<Tag> {
        read_lock(&self.value).clone()
    }

    /// The tag, if one is set and it is a `T`.
    pub(crate) fn get_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get()?.downcast::<T>().ok()
    }

    pub(crate) fn set(&self, tag: Option<Tag>) -> Option<Tag> {
        std::mem::replace(&mut *write_lock(&self.value), tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access_checks_the_type() {
        let slot = TagSlot::default();
        assert!(slot.get().is_none());
        slot.set(Some(Arc::new(7u32)));
        assert_eq!(slot.get_as::<u32>().as_deref(), Some(&7));
        assert!(slot.get_as::<String>().is_none());
        let old = slot.set(None).unwrap();
        assert_eq!(old.downcast_ref::<u32>(), Some(&7));
        assert!(slot.get().is_none());
    }
}
