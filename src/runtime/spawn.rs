use crate::runtime::core::with_core;
use crate::task::TaskId;

/// Spawn a task running `f` with the runtime's default stack size.
///
/// The new task is appended to the run queue; it first runs when the caller
/// next blocks or yields.
pub fn spawn<F>(f: F) -> TaskId
where
    F: FnOnce() + 'static,
{
    spawn_builder().spawn(f)
}

/// Configure a task before spawning it.
pub fn spawn_builder() -> SpawnBuilder {
    SpawnBuilder::new()
}

#[derive(Debug, Default)]
pub struct SpawnBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl SpawnBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name shown in the task table.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes. Fixed for the lifetime of the task.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn spawn<F>(self, f: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let task = with_core(|core| {
            let stack_size = self.stack_size.unwrap_or(core.cfg.stack_size);
            let name = self.name.unwrap_or_default();
            core.spawn(name, stack_size, false, Box::new(f))
        });
        task.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{block_on, dump_tasks, mark_system, name, park, yield_now};
    use anyhow::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_spawn_builder_sets_name_and_stack() -> Result<()> {
        let seen = Rc::new(RefCell::new(None));

        let s = seen.clone();
        block_on(move || {
            spawn_builder()
                .name("sized")
                .stack_size(64 * 1024)
                .spawn(move || *s.borrow_mut() = Some(name()));
        })?;

        assert_eq!(seen.borrow().as_deref(), Some("sized"));
        Ok(())
    }

    #[test]
    fn test_spawned_ids_increase() -> Result<()> {
        let ids = Rc::new(RefCell::new(Vec::new()));

        let i = ids.clone();
        block_on(move || {
            for _ in 0..3 {
                i.borrow_mut().push(spawn(|| {}));
            }
        })?;

        let ids = ids.borrow();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn test_system_spawn_is_flagged_in_table() -> Result<()> {
        let table = Rc::new(RefCell::new(String::new()));

        let t = table.clone();
        block_on(move || {
            spawn_builder().name("daemon").spawn(|| {
                mark_system();
                park();
            });
            yield_now();

            let mut out = Vec::new();
            dump_tasks(&mut out).expect("write to vec");
            *t.borrow_mut() = String::from_utf8_lossy(&out).into_owned();
        })?;

        let table = table.borrow();
        assert!(table.lines().any(|l| l.starts_with("2s") && l.contains("daemon")));
        assert!(table.lines().any(|l| l.starts_with("1 ") && l.contains("(running)")));
        Ok(())
    }
}
