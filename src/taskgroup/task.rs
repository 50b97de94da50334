//! Units of work submitted to a [`super::TaskPool`].

use std::{borrow::Cow, fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use tokio::sync::mpsc::UnboundedSender;

use super::groups::TaskGroups;

/// Group membership of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskGroupSpec {
    name: String,
    limit: Option<usize>,
}

impl TaskGroupSpec {
    /// Join `name`, using the pool's configured limit for it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
        }
    }

    /// Join `name` with an explicit limit. The limit only applies if this
    /// task creates the group record.
    #[must_use]
    pub fn with_limit(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit: Some(limit.max(1)),
        }
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Explicit limit, if one was given.
    #[must_use]
    pub fn limit(&self) -> Option<usize> { self.limit }
}

/// An asynchronous job with an optional group.
pub struct Task {
    pub(crate) label: Cow<'static, str>,
    pub(crate) group: Option<TaskGroupSpec>,
    pub(crate) future: BoxFuture<'static, ()>,
}

impl Task {
    /// Wrap `future` as an ungrouped task.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            label: Cow::Borrowed("task"),
            group: None,
            future: Box::pin(future),
        }
    }

    /// Name reported to the pool listener.
    #[must_use]
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Place the task in `group`.
    #[must_use]
    pub fn group(mut self, group: TaskGroupSpec) -> Self {
        self.group = Some(group);
        self
    }

    /// Group membership, if any.
    #[must_use]
    pub fn group_spec(&self) -> Option<&TaskGroupSpec> { self.group.as_ref() }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// A task travelling through the pool's job channel.
pub(crate) struct Job {
    pub(crate) task: Task,
    pub(crate) permit: Option<GroupPermit>,
}

pub(crate) type JobSender = UnboundedSender<Job>;

/// A slot held in a task group.
///
/// Dropping the permit releases the slot on every exit path, including a
/// panicking task, and dispatches the next waiter of the group if any.
pub struct GroupPermit {
    groups: Arc<TaskGroups<Task>>,
    name: String,
    started: bool,
    jobs: JobSender,
}

impl GroupPermit {
    pub(crate) fn new(groups: Arc<TaskGroups<Task>>, name: String, jobs: JobSender) -> Self {
        Self {
            groups,
            name,
            started: false,
            jobs,
        }
    }

    /// Group this permit belongs to.
    #[must_use]
    pub fn group(&self) -> &str { &self.name }

    pub(crate) fn start(&mut self) {
        if !self.started {
            self.groups.start(&self.name);
            self.started = true;
        }
    }
}

impl Drop for GroupPermit {
    fn drop(&mut self) {
        let next = if self.started {
            self.groups.complete(&self.name)
        } else {
            self.groups.abandon(&self.name)
        };
        if let Some(task) = next {
            let permit = GroupPermit::new(
                Arc::clone(&self.groups),
                self.name.clone(),
                self.jobs.clone(),
            );
            // A closed channel drops the job, whose permit releases the
            // slot in turn.
            let _ = self.jobs.send(Job {
                task,
                permit: Some(permit),
            });
        }
    }
}

impl fmt::Debug for GroupPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupPermit")
            .field("group", &self.name)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
