//! The immutable slug-to-definition lookup table.

use std::collections::HashMap;

use thiserror::Error;

use conveyor_core::Target;

use crate::definition::{TaskDefinition, WorkflowDefinition};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate task slug '{0}'")]
    DuplicateTask(String),

    #[error("duplicate workflow slug '{0}'")]
    DuplicateWorkflow(String),

    #[error("workflow '{workflow}' step '{step}' references unknown task '{task_slug}'")]
    UnknownStepTask {
        workflow: String,
        step: String,
        task_slug: String,
    },

    #[error("workflow '{workflow}' declares step id '{step}' more than once")]
    DuplicateStepId { workflow: String, step: String },
}

/// Builder that validates definitions before freezing them into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    tasks: Vec<TaskDefinition>,
    workflows: Vec<WorkflowDefinition>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, definition: TaskDefinition) -> Self {
        self.tasks.push(definition);
        self
    }

    pub fn workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.workflows.push(definition);
        self
    }

    /// Validate and freeze.
    ///
    /// Every workflow step must reference a registered task, and step ids
    /// must be unique within their workflow.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut tasks = HashMap::new();
        for definition in self.tasks {
            if tasks.contains_key(&definition.slug) {
                return Err(RegistryError::DuplicateTask(definition.slug));
            }
            tasks.insert(definition.slug.clone(), definition);
        }

        let mut workflows = HashMap::new();
        for definition in self.workflows {
            if workflows.contains_key(&definition.slug) {
                return Err(RegistryError::DuplicateWorkflow(definition.slug));
            }

            let mut seen_steps = std::collections::HashSet::new();
            for step in &definition.steps {
                if !seen_steps.insert(step.id.as_str()) {
                    return Err(RegistryError::DuplicateStepId {
                        workflow: definition.slug.clone(),
                        step: step.id.clone(),
                    });
                }
                if !tasks.contains_key(&step.task_slug) {
                    return Err(RegistryError::UnknownStepTask {
                        workflow: definition.slug.clone(),
                        step: step.id.clone(),
                        task_slug: step.task_slug.clone(),
                    });
                }
            }
            workflows.insert(definition.slug.clone(), definition);
        }

        Ok(Registry { tasks, workflows })
    }
}

/// Static mapping from slugs to definitions, loaded once at startup.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: HashMap<String, TaskDefinition>,
    workflows: HashMap<String, WorkflowDefinition>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn task(&self, slug: &str) -> Option<&TaskDefinition> {
        self.tasks.get(slug)
    }

    pub fn workflow(&self, slug: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(slug)
    }

    /// Whether the target's slug is registered under the matching kind.
    pub fn contains(&self, target: &Target) -> bool {
        match target {
            Target::Task(slug) => self.tasks.contains_key(slug),
            Target::Workflow(slug) => self.workflows.contains_key(slug),
        }
    }

    /// The default queue a submission inherits when it names none.
    ///
    /// Only workflows declare one; task submissions without an explicit queue
    /// stay unassigned.
    pub fn default_queue(&self, target: &Target) -> Option<&str> {
        match target {
            Target::Task(_) => None,
            Target::Workflow(slug) => self
                .workflows
                .get(slug)
                .and_then(|workflow| workflow.queue.as_deref()),
        }
    }

    pub fn task_slugs(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn workflow_slugs(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }
}
