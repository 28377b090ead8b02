use std::{fmt, sync::Arc};

use parking_lot::Mutex;

type Callback<E> = Box<dyn FnMut(&E) + Send>;

/// A list of callbacks notified, in registration order, of every event a component emits.
pub struct Observers<E> {
    callbacks: Vec<Callback<E>>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self { callbacks: Vec::new() }
    }
}

impl<E> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("len", &self.callbacks.len()).finish()
    }
}

impl<E> Observers<E> {
    /// Registers a callback.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Notifies every registered callback of `event`.
    #[inline]
    pub fn notify(&mut self, event: &E) {
        for callback in &mut self.callbacks {
            callback(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

/// Collects every event it is subscribed to. Cloning a recorder shares the underlying buffer.
///
/// # Example
///
/// ```
/// use tcsim_common::{Observers, Recorder};
///
/// let recorder = Recorder::default();
/// let mut observers = Observers::default();
/// observers.subscribe(recorder.callback());
///
/// observers.notify(&42u32);
/// assert_eq!(recorder.events(), vec![42]);
/// ```
#[derive(Debug)]
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self { events: Arc::clone(&self.events) }
    }
}

impl<E> Default for Recorder<E> {
    fn default() -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<E: Clone + Send + 'static> Recorder<E> {
    /// Returns a callback that appends every event to this recorder.
    pub fn callback(&self) -> impl FnMut(&E) + Send + 'static {
        let events = Arc::clone(&self.events);
        move |event: &E| events.lock().push(event.clone())
    }

    /// A copy of every event recorded so far.
    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    /// Drains the recorded events.
    pub fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
