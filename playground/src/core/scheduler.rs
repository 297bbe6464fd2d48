//! Group scheduling for a single run.
//!
//! A run either executes one selected group, or walks every group in order and
//! auto-advances on each `done`. The scheduler only decides what to dispatch
//! next; the engine owns the worker and the clock.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::core::session::InputGroup;

/// Immutable description of a run requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub code: String,
    pub flags: Vec<String>,
    pub groups: Vec<InputGroup>,
    /// Run only this group. `None` runs every group in order.
    pub selected_group: Option<usize>,
    pub timeout: Option<Duration>,
}

impl RunPlan {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if let Some(index) = self.selected_group
            && index >= self.groups.len()
        {
            return Err(SchedulerError::InvalidGroup {
                index,
                len: self.groups.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("group {index} out of range ({len} groups)")]
    InvalidGroup { index: usize, len: usize },
}

/// One program invocation to send to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Group index, or `None` for the implicit run of a group-less session.
    pub group: Option<usize>,
    pub group_name: Option<String>,
    pub code: String,
    pub flags: Vec<String>,
    pub inputs: Vec<String>,
}

/// Position of the active run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCursor {
    pub active_group: Option<usize>,
    pub run_all_groups: bool,
    pub group_started_at: Instant,
    pub run_started_at: Instant,
}

/// What to do after a group finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next(Dispatch),
    Finished { run_elapsed: Duration },
}

#[derive(Debug)]
pub struct GroupScheduler {
    code: String,
    flags: Vec<String>,
    groups: Vec<InputGroup>,
    cursor: RunCursor,
    interrupted: bool,
}

impl GroupScheduler {
    /// Begin a run and return the first dispatch.
    ///
    /// Every group's `succeeded` flag is reset. `now` is the dispatch time of
    /// the first group, which is also when the run starts.
    pub fn begin(plan: RunPlan, now: Instant) -> Result<(Self, Dispatch), SchedulerError> {
        plan.validate()?;
        let RunPlan {
            code,
            flags,
            mut groups,
            selected_group,
            ..
        } = plan;
        for group in &mut groups {
            group.succeeded = false;
        }
        let active_group = match selected_group {
            Some(index) => Some(index),
            None if groups.is_empty() => None,
            None => Some(0),
        };
        let scheduler = Self {
            code,
            flags,
            groups,
            cursor: RunCursor {
                active_group,
                run_all_groups: selected_group.is_none(),
                group_started_at: now,
                run_started_at: now,
            },
            interrupted: false,
        };
        let dispatch = scheduler.dispatch_for(active_group);
        Ok((scheduler, dispatch))
    }

    /// Record `done` for the active group and decide what comes next.
    ///
    /// Returns the elapsed time of the finished group alongside the decision.
    pub fn on_done(&mut self, now: Instant) -> (Duration, Advance) {
        let group_elapsed = now.saturating_duration_since(self.cursor.group_started_at);
        if !self.interrupted
            && let Some(index) = self.cursor.active_group
            && let Some(group) = self.groups.get_mut(index)
        {
            group.succeeded = true;
        }

        let next = match self.cursor.active_group {
            Some(index)
                if self.cursor.run_all_groups
                    && !self.interrupted
                    && index + 1 < self.groups.len() =>
            {
                Some(index + 1)
            }
            _ => None,
        };

        match next {
            Some(index) => {
                self.cursor.active_group = Some(index);
                self.cursor.group_started_at = now;
                (group_elapsed, Advance::Next(self.dispatch_for(Some(index))))
            }
            None => {
                self.cursor.active_group = None;
                let run_elapsed = now.saturating_duration_since(self.cursor.run_started_at);
                (group_elapsed, Advance::Finished { run_elapsed })
            }
        }
    }

    /// Mark the run as interrupted; no further group will be scheduled.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn cursor(&self) -> &RunCursor {
        &self.cursor
    }

    pub fn succeeded(&self) -> Vec<bool> {
        self.groups.iter().map(|group| group.succeeded).collect()
    }

    fn dispatch_for(&self, index: Option<usize>) -> Dispatch {
        let group = index.and_then(|i| self.groups.get(i));
        Dispatch {
            group: index,
            group_name: group.map(|g| g.name.clone()),
            code: self.code.clone(),
            flags: self.flags.clone(),
            inputs: group.map(InputGroup::lines).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(groups: Vec<InputGroup>, selected_group: Option<usize>) -> RunPlan {
        RunPlan {
            code: "code".to_string(),
            flags: vec!["j".to_string()],
            groups,
            selected_group,
            timeout: None,
        }
    }

    fn abc() -> Vec<InputGroup> {
        vec![
            InputGroup::new("A", ["1", "2"]),
            InputGroup::new("B", Vec::<String>::new()),
            InputGroup::new("C", ["3"]),
        ]
    }

    #[test]
    fn run_all_walks_groups_in_order() {
        let t0 = Instant::now();
        let (mut scheduler, first) = GroupScheduler::begin(plan(abc(), None), t0).expect("begin");
        assert_eq!(first.group, Some(0));
        assert_eq!(first.inputs, vec!["1", "2"]);
        assert_eq!(scheduler.succeeded(), vec![false, false, false]);

        let (_, advance) = scheduler.on_done(t0 + Duration::from_millis(10));
        let Advance::Next(second) = advance else {
            panic!("expected group B");
        };
        assert_eq!(second.group_name.as_deref(), Some("B"));
        assert!(second.inputs.is_empty());
        assert_eq!(scheduler.succeeded(), vec![true, false, false]);

        let (_, advance) = scheduler.on_done(t0 + Duration::from_millis(20));
        let Advance::Next(third) = advance else {
            panic!("expected group C");
        };
        assert_eq!(third.inputs, vec!["3"]);

        let (group_elapsed, advance) = scheduler.on_done(t0 + Duration::from_millis(35));
        assert_eq!(group_elapsed, Duration::from_millis(15));
        assert_eq!(
            advance,
            Advance::Finished {
                run_elapsed: Duration::from_millis(35)
            }
        );
        assert_eq!(scheduler.succeeded(), vec![true, true, true]);
        assert_eq!(scheduler.cursor().active_group, None);
    }

    #[test]
    fn selected_group_runs_once() {
        let mut groups = abc();
        groups[0].succeeded = true;
        let t0 = Instant::now();
        let (mut scheduler, first) =
            GroupScheduler::begin(plan(groups, Some(1)), t0).expect("begin");
        assert_eq!(first.group, Some(1));
        assert!(!scheduler.cursor().run_all_groups);

        let (_, advance) = scheduler.on_done(t0);
        assert!(matches!(advance, Advance::Finished { .. }));
        assert_eq!(scheduler.succeeded(), vec![false, true, false]);
    }

    #[test]
    fn zero_groups_is_one_implicit_run() {
        let t0 = Instant::now();
        let (mut scheduler, first) =
            GroupScheduler::begin(plan(Vec::new(), None), t0).expect("begin");
        assert_eq!(first.group, None);
        assert_eq!(first.group_name, None);
        assert!(first.inputs.is_empty());
        let (_, advance) = scheduler.on_done(t0);
        assert!(matches!(advance, Advance::Finished { .. }));
        assert!(scheduler.succeeded().is_empty());
    }

    #[test]
    fn interrupted_run_does_not_advance() {
        let t0 = Instant::now();
        let (mut scheduler, _) = GroupScheduler::begin(plan(abc(), None), t0).expect("begin");
        scheduler.interrupt();
        let (_, advance) = scheduler.on_done(t0);
        assert!(matches!(advance, Advance::Finished { .. }));
        assert_eq!(scheduler.succeeded(), vec![false, false, false]);
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let err = GroupScheduler::begin(plan(abc(), Some(3)), Instant::now()).unwrap_err();
        assert_eq!(err, SchedulerError::InvalidGroup { index: 3, len: 3 });
    }
}
