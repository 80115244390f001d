//! Single-shot consumption acknowledgments.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::value::ScriptValue;

/// Repeatable callback used as a continuous-mode sink.
pub type Sink = Rc<dyn Fn(ScriptValue)>;

type DeferredFn = Box<dyn FnOnce(ScriptValue)>;

/// A single-shot, shareable callback token.
///
/// Queue items carry one of these as their consumption acknowledgment: the
/// callback runs with the delivered value exactly once, after the item has
/// left the buffer. Invoking a spent token is a no-op, which keeps the
/// continuous-mode supersession path and `stop()` finalization harmless when
/// they race over the same item.
#[derive(Clone)]
pub struct Deferred {
    target: Rc<Cell<Option<DeferredFn>>>,
}

impl Deferred {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(ScriptValue) + 'static,
    {
        Self {
            target: Rc::new(Cell::new(Some(Box::new(f)))),
        }
    }

    /// Wrap one invocation of a repeatable sink.
    pub fn from_sink(sink: &Sink) -> Self {
        let sink = Rc::clone(sink);
        Self::new(move |value| sink(value))
    }

    /// Run the callback with `value`. Only the first call fires.
    pub fn invoke(&self, value: ScriptValue) {
        match self.target.take() {
            Some(f) => f(value),
            None => trace!("deferred already spent"),
        }
    }

    /// True once the callback has fired.
    pub fn is_spent(&self) -> bool {
        let current = self.target.take();
        let spent = current.is_none();
        self.target.set(current);
        spent
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("spent", &self.is_spent())
            .finish()
    }
}
