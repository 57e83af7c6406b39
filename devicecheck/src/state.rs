use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

/// Written by a single owner, read by inspection views that accept stale data.
pub type SharedView<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub fn new_view<T>(value: T) -> SharedView<T> {
    Arc::new(RwLock::new(value))
}
