//! Observers notified around full net runs.

/// Listener attached to a net. `on_start` is called before the first operator runs and
/// `on_stop` after the last one succeeded; a failed run never reaches `on_stop`.
pub trait NetObserver {
    fn on_start(&mut self) {}
    fn on_stop(&mut self) {}
}

/// Observers of a net, notified in attachment order.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn NetObserver>>,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl ObserverList {
    pub fn attach(&mut self, observer: Box<dyn NetObserver>) {
        self.observers.push(observer);
    }

    /// Removes and returns every attached observer.
    pub fn detach_all(&mut self) -> Vec<Box<dyn NetObserver>> {
        std::mem::take(&mut self.observers)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn start_all(&mut self) {
        self.observers.iter_mut().for_each(|o| o.on_start());
    }

    pub fn stop_all(&mut self) {
        self.observers.iter_mut().for_each(|o| o.on_stop());
    }
}
