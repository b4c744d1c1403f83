//! Fixed catalog of domain event types that destinations may subscribe to.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Platform event types, in wire form (`deployment.started`, ...).
///
/// Subscription lists are stored and transmitted as these dotted names;
/// anything not in this catalog is rejected at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum EventType {
    #[serde(rename = "deployment.started")]
    DeploymentStarted,
    #[serde(rename = "deployment.succeeded")]
    DeploymentSucceeded,
    #[serde(rename = "deployment.failed")]
    DeploymentFailed,
    #[serde(rename = "agent.task.started")]
    AgentTaskStarted,
    #[serde(rename = "agent.task.completed")]
    AgentTaskCompleted,
    #[serde(rename = "agent.task.failed")]
    AgentTaskFailed,
    #[serde(rename = "story.created")]
    StoryCreated,
    #[serde(rename = "story.updated")]
    StoryUpdated,
    #[serde(rename = "sprint.started")]
    SprintStarted,
    #[serde(rename = "sprint.closed")]
    SprintClosed,
    #[serde(rename = "cost.alert.triggered")]
    CostAlertTriggered,
}

impl EventType {
    /// All catalog entries, in display order.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::DeploymentStarted,
            EventType::DeploymentSucceeded,
            EventType::DeploymentFailed,
            EventType::AgentTaskStarted,
            EventType::AgentTaskCompleted,
            EventType::AgentTaskFailed,
            EventType::StoryCreated,
            EventType::StoryUpdated,
            EventType::SprintStarted,
            EventType::SprintClosed,
            EventType::CostAlertTriggered,
        ]
    }

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DeploymentStarted => "deployment.started",
            EventType::DeploymentSucceeded => "deployment.succeeded",
            EventType::DeploymentFailed => "deployment.failed",
            EventType::AgentTaskStarted => "agent.task.started",
            EventType::AgentTaskCompleted => "agent.task.completed",
            EventType::AgentTaskFailed => "agent.task.failed",
            EventType::StoryCreated => "story.created",
            EventType::StoryUpdated => "story.updated",
            EventType::SprintStarted => "sprint.started",
            EventType::SprintClosed => "sprint.closed",
            EventType::CostAlertTriggered => "cost.alert.triggered",
        }
    }

    /// Parse a wire name. Returns `None` for anything outside the catalog.
    pub fn parse(s: &str) -> Option<EventType> {
        Self::all().iter().copied().find(|e| e.as_str() == s)
    }

    /// Coarse grouping used by the event-type catalog endpoint.
    pub fn category(&self) -> &'static str {
        match self {
            EventType::DeploymentStarted
            | EventType::DeploymentSucceeded
            | EventType::DeploymentFailed => "deployment",
            EventType::AgentTaskStarted
            | EventType::AgentTaskCompleted
            | EventType::AgentTaskFailed => "agent",
            EventType::StoryCreated | EventType::StoryUpdated => "story",
            EventType::SprintStarted | EventType::SprintClosed => "sprint",
            EventType::CostAlertTriggered => "cost",
        }
    }

    /// Human description shown in the event-type catalog endpoint.
    pub fn description(&self) -> &'static str {
        match self {
            EventType::DeploymentStarted => "A deployment began rolling out",
            EventType::DeploymentSucceeded => "A deployment finished successfully",
            EventType::DeploymentFailed => "A deployment failed or was rolled back",
            EventType::AgentTaskStarted => "An agent picked up a task",
            EventType::AgentTaskCompleted => "An agent completed a task",
            EventType::AgentTaskFailed => "An agent task failed",
            EventType::StoryCreated => "A story was created",
            EventType::StoryUpdated => "A story changed state or content",
            EventType::SprintStarted => "A sprint was opened",
            EventType::SprintClosed => "A sprint was closed",
            EventType::CostAlertTriggered => "A cost threshold was crossed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
