//! Bottom-up resize driver.

use anyhow::{Context, Result};

use crate::exec::Executor;

/// A storage layer that can grow in place.
///
/// Layers form a chain: a filesystem sits on a partition or an LVM
/// logical volume, a logical volume on a physical volume, a physical
/// volume on a partition. [`Resizer::dependency`] names the next layer
/// down, and the driver grows that layer first.
pub trait Resizer {
    /// Human-readable label, e.g. "ext4 filesystem at /".
    fn label(&self) -> String;

    /// Short opaque state string, e.g. "534 blocks". Compared for
    /// byte equality around a resize to decide whether anything changed.
    fn state(&self, exec: &Executor) -> Result<String>;

    /// Grow this layer to fill the layer beneath it.
    fn resize(&self, exec: &Executor) -> Result<()>;

    /// The layer that must grow before this one, if any.
    fn dependency(&self, exec: &Executor) -> Result<Option<Box<dyn Resizer>>>;
}

/// Result of a resize run: the summaries of every layer that changed,
/// and the error that stopped the run, if any. Changes accumulated
/// before a failure are kept so partial progress is always reported.
pub struct Outcome {
    pub changes: Vec<String>,
    pub error: Option<anyhow::Error>,
}

/// Grow `resizer` and everything beneath it, deepest layer first.
pub fn resize(resizer: &dyn Resizer, exec: &Executor) -> Outcome {
    let mut changes = Vec::new();
    let error = resize_chain(resizer, exec, &mut changes).err();
    Outcome { changes, error }
}

fn resize_chain(resizer: &dyn Resizer, exec: &Executor, changes: &mut Vec<String>) -> Result<()> {
    let before = resizer.state(exec)?;
    if let Some(dep) = resizer.dependency(exec)? {
        resize_chain(dep.as_ref(), exec, changes)?;
    }
    resizer.resize(exec)?;
    let after = resizer
        .state(exec)
        .with_context(|| format!("error after successful resize of {}", resizer.label()))?;
    if before != after {
        changes.push(format!(
            "{}: before: {}, after: {}",
            resizer.label(),
            before,
            after
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// A scripted layer: reports `states` in order, one per state() call,
    /// and records every operation into the shared log.
    struct FakeLayer {
        name: &'static str,
        states: RefCell<Vec<&'static str>>,
        dep: Option<Box<FakeLayer>>,
        fail_resize: bool,
        fail_state: RefCell<Vec<bool>>,
        log: Log,
    }

    impl FakeLayer {
        fn new(name: &'static str, states: Vec<&'static str>, log: &Log) -> Self {
            Self {
                name,
                states: RefCell::new(states),
                dep: None,
                fail_resize: false,
                fail_state: RefCell::new(vec![]),
                log: log.clone(),
            }
        }

        fn with_dep(mut self, dep: FakeLayer) -> Self {
            self.dep = Some(Box::new(dep));
            self
        }
    }

    impl Resizer for FakeLayer {
        fn label(&self) -> String {
            self.name.to_string()
        }

        fn state(&self, _exec: &Executor) -> Result<String> {
            let mut failures = self.fail_state.borrow_mut();
            if !failures.is_empty() && failures.remove(0) {
                bail!("state probe failed");
            }
            let mut states = self.states.borrow_mut();
            let next = if states.len() > 1 {
                states.remove(0)
            } else {
                states[0]
            };
            Ok(next.to_string())
        }

        fn resize(&self, _exec: &Executor) -> Result<()> {
            self.log.borrow_mut().push(format!("resize {}", self.name));
            if self.fail_resize {
                bail!("{} resize blew up", self.name);
            }
            Ok(())
        }

        fn dependency(&self, _exec: &Executor) -> Result<Option<Box<dyn Resizer>>> {
            // Hand out an owned copy carrying the child's scripted states.
            match &self.dep {
                None => Ok(None),
                Some(child) => Ok(Some(Box::new(FakeLayer {
                    name: child.name,
                    states: RefCell::new(child.states.borrow().clone()),
                    dep: None,
                    fail_resize: child.fail_resize,
                    fail_state: RefCell::new(child.fail_state.borrow().clone()),
                    log: child.log.clone(),
                }))),
            }
        }
    }

    fn executor() -> Executor {
        Executor::new(false, false)
    }

    #[test]
    fn test_resizes_dependency_first() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let chain = FakeLayer::new("fs", vec!["10 blocks", "20 blocks"], &log)
            .with_dep(FakeLayer::new("part", vec!["100 sectors", "200 sectors"], &log));

        let outcome = resize(&chain, &executor());
        assert!(outcome.error.is_none());
        assert_eq!(*log.borrow(), vec!["resize part", "resize fs"]);
        assert_eq!(
            outcome.changes,
            vec![
                "part: before: 100 sectors, after: 200 sectors",
                "fs: before: 10 blocks, after: 20 blocks",
            ]
        );
    }

    #[test]
    fn test_unchanged_state_reports_nothing() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let chain = FakeLayer::new("fs", vec!["10 blocks"], &log);

        let outcome = resize(&chain, &executor());
        assert!(outcome.error.is_none());
        assert!(outcome.changes.is_empty());
        assert_eq!(*log.borrow(), vec!["resize fs"]);
    }

    #[test]
    fn test_failed_resize_keeps_dependency_changes() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let mut top = FakeLayer::new("fs", vec!["10 blocks"], &log)
            .with_dep(FakeLayer::new("part", vec!["100 sectors", "200 sectors"], &log));
        top.fail_resize = true;

        let outcome = resize(&top, &executor());
        assert!(outcome.error.is_some());
        assert_eq!(
            outcome.changes,
            vec!["part: before: 100 sectors, after: 200 sectors"]
        );
    }

    #[test]
    fn test_state_error_short_circuits() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let top = FakeLayer {
            fail_state: RefCell::new(vec![true]),
            ..FakeLayer::new("fs", vec!["10 blocks"], &log)
        };

        let outcome = resize(&top, &executor());
        assert!(outcome.error.is_some());
        assert!(outcome.changes.is_empty());
        assert!(log.borrow().is_empty(), "resize must not run after a failed probe");
    }

    #[test]
    fn test_state_error_after_resize_is_wrapped() {
        let log: Log = Rc::new(RefCell::new(vec![]));
        let top = FakeLayer {
            fail_state: RefCell::new(vec![false, true]),
            ..FakeLayer::new("fs", vec!["10 blocks"], &log)
        };

        let outcome = resize(&top, &executor());
        let err = outcome.error.expect("second probe fails");
        assert!(format!("{:#}", err).contains("error after successful resize of fs"));
    }
}
