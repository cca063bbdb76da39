use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Outcome of a single-shot operation; failures carry a readable reason.
pub type Settled<T> = std::result::Result<T, String>;

type Subscriber<T> = Box<dyn FnOnce(&Settled<T>)>;

struct Slot<T> {
    value: Option<Settled<T>>,
    subscribers: Vec<Subscriber<T>>,
}

/// Creates a linked completer/completion pair.
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let slot = Rc::new(RefCell::new(Slot {
        value: None,
        subscribers: Vec::new(),
    }));
    (
        Completer { slot: slot.clone() },
        Completion { slot },
    )
}

/// Write side of a single-shot signal. Only the first settle counts.
pub struct Completer<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T: Clone> Completer<T> {
    /// Settles the signal. Returns `false` if it had already been settled.
    pub fn complete(&self, value: Settled<T>) -> bool {
        let subscribers = {
            let mut slot = self.slot.borrow_mut();
            if slot.value.is_some() {
                return false;
            }
            slot.value = Some(value.clone());
            std::mem::take(&mut slot.subscribers)
        };
        for subscriber in subscribers {
            subscriber(&value);
        }
        true
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.complete(Err(reason.into()))
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("settled", &self.slot.borrow().value.is_some())
            .finish()
    }
}

/// Read side of a single-shot signal. Clones observe the same slot.
pub struct Completion<T> {
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> Completion<T> {
    pub fn peek(&self) -> Option<Settled<T>> {
        self.slot.borrow().value.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().value.is_some()
    }

    /// Runs `subscriber` once the signal settles, or right away if it has.
    pub fn subscribe(&self, subscriber: impl FnOnce(&Settled<T>) + 'static) {
        let settled = {
            let mut slot = self.slot.borrow_mut();
            match &slot.value {
                Some(value) => value.clone(),
                None => {
                    slot.subscribers.push(Box::new(subscriber));
                    return;
                }
            }
        };
        subscriber(&settled);
    }

    /// Subscribers still waiting for the signal to settle.
    pub fn waiting(&self) -> usize {
        self.slot.borrow().subscribers.len()
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.slot.borrow().value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn first_settle_wins() {
        let (done, signal) = completion::<u32>();
        assert!(done.succeed(7));
        assert!(!done.fail("late"));
        assert_eq!(signal.peek(), Some(Ok(7)));
    }

    #[test]
    fn subscribers_run_before_and_after_settlement() {
        let (done, signal) = completion::<()>();
        let calls = Rc::new(Cell::new(0));

        let early = calls.clone();
        signal.subscribe(move |_| early.set(early.get() + 1));
        assert_eq!(signal.waiting(), 1);

        done.fail("offline");

        let late = calls.clone();
        signal.subscribe(move |value| {
            assert!(value.is_err());
            late.set(late.get() + 1);
        });
        assert_eq!(calls.get(), 2);
        assert_eq!(signal.waiting(), 0);
    }
}
