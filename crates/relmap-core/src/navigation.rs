//! Navigation property storage.
//!
//! A navigation field is never "just empty": it is either unloaded, being loaded,
//! or loaded (possibly with zero children). [`Navigation`] holds that tri-state
//! plus an optional lazy loader; [`BackRef`] holds a non-owning pointer from a
//! child to its parent.
//!
//! The first `load()` of an unloaded navigation with a loader runs the loader
//! exactly once, even when many threads call `load()` at the same time; the
//! others block until the result is published and then share it.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use crate::error::{Error, Result};
use crate::relationship::Cardinality;

/// A materialized entity behind a type-erased shared pointer.
pub type EntityArc = Arc<dyn Any + Send + Sync>;

/// Source location of the code that triggered a load.
pub type CallSite = &'static Location<'static>;

/// Deferred query for a navigation field. Receives the location of the
/// `load()` call that triggered it and returns the children in order.
pub type LazyLoader = Arc<dyn Fn(CallSite) -> Result<Vec<EntityArc>> + Send + Sync>;

/// Observable load state of a navigation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

enum NavState<T> {
    Unloaded,
    Loading,
    Loaded(Arc<T>),
}

/// Container shapes a navigation field can hold.
pub trait NavigationValue: Clone + Send + Sync + 'static {
    /// Cardinality this container represents.
    const CARDINALITY: Cardinality;

    /// The loaded-but-empty container.
    fn empty() -> Self;

    /// Add one child. Fails if `child` is not of the element type.
    fn attach(&mut self, child: EntityArc) -> Result<()>;

    /// Children as erased pointers, in order.
    fn entities(&self) -> Vec<EntityArc>;

    /// Build a container from erased children.
    fn from_entities(items: Vec<EntityArc>) -> Result<Self> {
        let mut value = Self::empty();
        for item in items {
            value.attach(item)?;
        }
        Ok(value)
    }
}

fn downcast_child<C: Any + Send + Sync>(child: EntityArc) -> Result<Arc<C>> {
    child.downcast::<C>().map_err(|_| {
        Error::mapping(
            std::any::type_name::<C>(),
            "navigation received a child of a different entity type",
        )
    })
}

impl<C: Any + Send + Sync> NavigationValue for Vec<Arc<C>> {
    const CARDINALITY: Cardinality = Cardinality::OneToMany;

    fn empty() -> Self {
        Vec::new()
    }

    fn attach(&mut self, child: EntityArc) -> Result<()> {
        self.push(downcast_child::<C>(child)?);
        Ok(())
    }

    fn entities(&self) -> Vec<EntityArc> {
        self.iter().map(|c| Arc::clone(c) as EntityArc).collect()
    }
}

impl<C: Any + Send + Sync> NavigationValue for VecDeque<Arc<C>> {
    const CARDINALITY: Cardinality = Cardinality::OneToMany;

    fn empty() -> Self {
        VecDeque::new()
    }

    fn attach(&mut self, child: EntityArc) -> Result<()> {
        self.push_back(downcast_child::<C>(child)?);
        Ok(())
    }

    fn entities(&self) -> Vec<EntityArc> {
        self.iter().map(|c| Arc::clone(c) as EntityArc).collect()
    }
}

impl<C: Any + Send + Sync> NavigationValue for Option<Arc<C>> {
    const CARDINALITY: Cardinality = Cardinality::OneToOne;

    fn empty() -> Self {
        None
    }

    fn attach(&mut self, child: EntityArc) -> Result<()> {
        let child = downcast_child::<C>(child)?;
        if self.is_some() {
            tracing::warn!(
                entity = std::any::type_name::<C>(),
                "one-to-one navigation received a second child; keeping the first"
            );
            return Ok(());
        }
        *self = Some(child);
        Ok(())
    }

    fn entities(&self) -> Vec<EntityArc> {
        self.iter().map(|c| Arc::clone(c) as EntityArc).collect()
    }
}

/// Tri-state storage for a navigation field.
pub struct Navigation<T> {
    state: Mutex<NavState<T>>,
    ready: Condvar,
    loader: OnceLock<LazyLoader>,
}

/// One-to-many navigation holding an ordered sequence of children.
pub type HasMany<C> = Navigation<Vec<Arc<C>>>;

/// One-to-one navigation holding at most one child.
pub type HasOne<C> = Navigation<Option<Arc<C>>>;

impl<T: NavigationValue> Navigation<T> {
    /// An unloaded navigation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NavState::Unloaded),
            ready: Condvar::new(),
            loader: OnceLock::new(),
        }
    }

    /// A navigation that is already loaded with `value`.
    #[must_use]
    pub fn loaded(value: T) -> Self {
        Self {
            state: Mutex::new(NavState::Loaded(Arc::new(value))),
            ready: Condvar::new(),
            loader: OnceLock::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NavState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> LoadState {
        match &*self.lock() {
            NavState::Unloaded => LoadState::Unloaded,
            NavState::Loading => LoadState::Loading,
            NavState::Loaded(_) => LoadState::Loaded,
        }
    }

    /// Whether the field holds a loaded value (possibly empty).
    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Whether a lazy loader is installed.
    pub fn has_loader(&self) -> bool {
        self.loader.get().is_some()
    }

    /// The loaded value, without triggering a load.
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.lock() {
            NavState::Loaded(value) => Some(Arc::clone(value)),
            NavState::Unloaded | NavState::Loading => None,
        }
    }

    /// The loaded value, running the lazy loader first if the field is unloaded.
    ///
    /// Returns `Ok(None)` when the field is unloaded and no loader is installed.
    /// Concurrent callers on the same instance share a single loader run; callers
    /// arriving while it runs block until the value is published.
    #[track_caller]
    pub fn load(&self) -> Result<Option<Arc<T>>> {
        let site = Location::caller();
        let mut guard = self.lock();
        loop {
            match &*guard {
                NavState::Loaded(value) => return Ok(Some(Arc::clone(value))),
                NavState::Loading => {
                    guard = self.ready.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
                NavState::Unloaded => {
                    let Some(loader) = self.loader.get().cloned() else {
                        return Ok(None);
                    };
                    *guard = NavState::Loading;
                    drop(guard);
                    return self.run_loader(&loader, site).map(Some);
                }
            }
        }
    }

    fn run_loader(&self, loader: &LazyLoader, site: CallSite) -> Result<Arc<T>> {
        let mut reset = ResetOnUnwind {
            nav: self,
            armed: true,
        };
        let outcome = loader(site).and_then(T::from_entities);
        reset.armed = false;

        let mut guard = self.lock();
        let result = match outcome {
            Ok(value) => {
                let value = Arc::new(value);
                *guard = NavState::Loaded(Arc::clone(&value));
                Ok(value)
            }
            Err(err) => {
                *guard = NavState::Unloaded;
                Err(err)
            }
        };
        drop(guard);
        self.ready.notify_all();
        result
    }

    /// Publish `value` as the loaded state.
    pub fn set_loaded(&self, value: T) {
        *self.lock() = NavState::Loaded(Arc::new(value));
        self.ready.notify_all();
    }

    /// Mark the field loaded with an empty container unless it is already loaded.
    pub fn mark_loaded_empty(&self) {
        let mut guard = self.lock();
        if matches!(*guard, NavState::Unloaded) {
            *guard = NavState::Loaded(Arc::new(T::empty()));
            drop(guard);
            self.ready.notify_all();
        }
    }

    /// Append a child to the loaded container, loading it empty first if needed.
    pub fn attach(&self, child: EntityArc) -> Result<()> {
        let mut guard = self.lock();
        if !matches!(*guard, NavState::Loaded(_)) {
            *guard = NavState::Loaded(Arc::new(T::empty()));
        }
        if let NavState::Loaded(value) = &mut *guard {
            Arc::make_mut(value).attach(child)?;
        }
        Ok(())
    }

    /// Install the lazy loader. Returns `false` if one was already installed.
    pub fn install_loader(&self, loader: LazyLoader) -> bool {
        self.loader.set(loader).is_ok()
    }
}

impl<T: NavigationValue> Default for Navigation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NavigationValue> Clone for Navigation<T> {
    fn clone(&self) -> Self {
        let state = match &*self.lock() {
            NavState::Loaded(value) => NavState::Loaded(Arc::clone(value)),
            NavState::Unloaded | NavState::Loading => NavState::Unloaded,
        };
        let loader = OnceLock::new();
        if let Some(l) = self.loader.get() {
            let _ = loader.set(Arc::clone(l));
        }
        Self {
            state: Mutex::new(state),
            ready: Condvar::new(),
            loader,
        }
    }
}

impl<T: NavigationValue> fmt::Debug for Navigation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Navigation");
        s.field("state", &self.state());
        if let Some(value) = self.get() {
            s.field("len", &value.entities().len());
        }
        s.field("lazy", &self.has_loader()).finish()
    }
}

/// Puts a navigation back to `Unloaded` if its loader panics, so waiters wake up.
struct ResetOnUnwind<'a, T: NavigationValue> {
    nav: &'a Navigation<T>,
    armed: bool,
}

impl<T: NavigationValue> Drop for ResetOnUnwind<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            *self.nav.lock() = NavState::Unloaded;
            self.nav.ready.notify_all();
        }
    }
}

/// Type-erased view of a navigation field, used by the materializer and loaders.
pub trait NavigationSlot: Send + Sync {
    fn load_state(&self) -> LoadState;
    fn cardinality(&self) -> Cardinality;
    fn mark_loaded_empty(&self);
    fn attach(&self, child: EntityArc) -> Result<()>;
    fn set_loaded_entities(&self, items: Vec<EntityArc>) -> Result<()>;
    fn install_loader(&self, loader: LazyLoader) -> bool;
    fn loaded_entities(&self) -> Option<Vec<EntityArc>>;
}

impl<T: NavigationValue> NavigationSlot for Navigation<T> {
    fn load_state(&self) -> LoadState {
        self.state()
    }

    fn cardinality(&self) -> Cardinality {
        T::CARDINALITY
    }

    fn mark_loaded_empty(&self) {
        Navigation::mark_loaded_empty(self);
    }

    fn attach(&self, child: EntityArc) -> Result<()> {
        Navigation::attach(self, child)
    }

    fn set_loaded_entities(&self, items: Vec<EntityArc>) -> Result<()> {
        self.set_loaded(T::from_entities(items)?);
        Ok(())
    }

    fn install_loader(&self, loader: LazyLoader) -> bool {
        Navigation::install_loader(self, loader)
    }

    fn loaded_entities(&self) -> Option<Vec<EntityArc>> {
        self.get().map(|v| v.entities())
    }
}

/// Non-owning pointer from a child entity to its parent.
pub struct BackRef<P> {
    parent: OnceLock<Weak<P>>,
}

impl<P: Any + Send + Sync> BackRef<P> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            parent: OnceLock::new(),
        }
    }

    /// The parent, if set and still alive.
    pub fn get(&self) -> Option<Arc<P>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Whether the back-reference was populated.
    pub fn is_set(&self) -> bool {
        self.parent.get().is_some()
    }

    /// Point at `parent`. The first assignment wins.
    pub fn set(&self, parent: &Arc<P>) -> bool {
        self.parent.set(Arc::downgrade(parent)).is_ok()
    }
}

impl<P: Any + Send + Sync> Default for BackRef<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Any + Send + Sync> Clone for BackRef<P> {
    fn clone(&self) -> Self {
        let parent = OnceLock::new();
        if let Some(weak) = self.parent.get() {
            let _ = parent.set(weak.clone());
        }
        Self { parent }
    }
}

impl<P> fmt::Debug for BackRef<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackRef")
            .field("set", &self.parent.get().is_some())
            .finish()
    }
}

/// Type-erased view of a back-reference field.
pub trait BackReferenceSlot: Send + Sync {
    /// Point at `parent`; fails if `parent` is not of the declared type.
    fn set_parent(&self, parent: &EntityArc) -> Result<()>;

    /// The parent, if set and alive.
    fn parent(&self) -> Option<EntityArc>;
}

impl<P: Any + Send + Sync> BackReferenceSlot for BackRef<P> {
    fn set_parent(&self, parent: &EntityArc) -> Result<()> {
        let typed = Arc::clone(parent).downcast::<P>().map_err(|_| {
            Error::mapping(
                std::any::type_name::<P>(),
                "back-reference received a parent of a different entity type",
            )
        })?;
        self.set(&typed);
        Ok(())
    }

    fn parent(&self) -> Option<EntityArc> {
        self.get().map(|p| p as EntityArc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Item(i32);

    #[test]
    fn test_unloaded_is_distinct_from_loaded_empty() {
        let nav: HasMany<Item> = Navigation::new();
        assert_eq!(nav.state(), LoadState::Unloaded);
        assert!(nav.get().is_none());

        nav.mark_loaded_empty();
        assert_eq!(nav.state(), LoadState::Loaded);
        assert_eq!(nav.get().unwrap().len(), 0);
    }

    #[test]
    fn test_load_without_loader_returns_none() {
        let nav: HasOne<Item> = Navigation::new();
        assert!(nav.load().unwrap().is_none());
        assert_eq!(nav.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_attach_rejects_wrong_child_type() {
        let nav: HasMany<Item> = Navigation::new();
        nav.attach(Arc::new(Item(1))).unwrap();
        let err = nav.attach(Arc::new("not an item")).unwrap_err();
        assert!(err.is_mapping());
        assert_eq!(nav.get().unwrap().len(), 1);
    }

    #[test]
    fn test_loader_runs_once_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let nav: HasMany<Item> = Navigation::new();
        let counter = Arc::clone(&calls);
        nav.install_loader(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Arc::new(Item(1)) as EntityArc, Arc::new(Item(2)) as EntityArc])
        }));

        let first = nav.load().unwrap().unwrap();
        let second = nav.load().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_returns_to_unloaded() {
        let nav: HasMany<Item> = Navigation::new();
        nav.install_loader(Arc::new(|_| Err(Error::Execution("offline".into()))));
        assert!(nav.load().is_err());
        assert_eq!(nav.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_one_to_one_keeps_first_child() {
        let nav: HasOne<Item> = Navigation::new();
        nav.attach(Arc::new(Item(1))).unwrap();
        nav.attach(Arc::new(Item(2))).unwrap();
        assert_eq!(nav.get().unwrap().as_deref(), Some(&Item(1)));
    }

    #[test]
    fn test_back_ref_is_weak() {
        let back: BackRef<Item> = BackRef::new();
        let parent = Arc::new(Item(7));
        assert!(back.set(&parent));
        assert_eq!(back.get().as_deref(), Some(&Item(7)));
        drop(parent);
        assert!(back.get().is_none());
        assert!(back.is_set());
    }
}
