/// A fan-out handler list invoked synchronously by its owner.
///
/// Ported from the Python source's `Event`: `attach` appends a handler,
/// `fire` invokes every attached handler in insertion order with the same
/// arguments. There is no cancellation or priority; re-entrancy (a handler
/// attaching another handler while firing) is the caller's problem, exactly
/// as in the original.
pub struct Event<Args> {
    handlers: Vec<Box<dyn Fn(&Args) + Send + Sync>>,
}

impl<Args> Default for Event<Args> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<Args> Event<Args> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, handler: impl Fn(&Args) + Send + Sync + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn fire(&self, args: &Args) {
        for handler in &self.handlers {
            handler(args);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_every_handler_in_order() {
        let mut event: Event<u32> = Event::new();
        let count = Arc::new(AtomicU32::new(0));

        let c1 = Arc::clone(&count);
        event.attach(move |x| {
            c1.fetch_add(*x, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        event.attach(move |x| {
            c2.fetch_add(*x, Ordering::SeqCst);
        });

        event.fire(&1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_handlers_is_a_no_op() {
        let event: Event<u32> = Event::new();
        event.fire(&5);
        assert!(event.is_empty());
    }
}
