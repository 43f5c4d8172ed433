use crate::error::{RiskError, Result};
use crate::rebalancing::{
    AssetClassDrift, ClassTrade, ExecutionStep, RebalancingStatistics, TradeProposal,
};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Proposed,
    Approved,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (Draft, Proposed)
                | (Draft, Cancelled)
                | (Proposed, Approved)
                | (Proposed, Cancelled)
                | (Approved, Executing)
                | (Approved, Cancelled)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled
        )
    }

    /// Next state on the way to `target`, if `target` is reachable at all
    fn step_toward(self, target: PlanStatus) -> Option<PlanStatus> {
        use PlanStatus::*;
        if self.can_transition_to(target) {
            return Some(target);
        }
        match (self, target) {
            (Draft, Approved | Executing | Completed | Failed) => Some(Proposed),
            (Proposed, Executing | Completed | Failed) => Some(Approved),
            (Approved, Completed | Failed) => Some(Executing),
            _ => None,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Proposed => "proposed",
            PlanStatus::Approved => "approved",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: PlanStatus,
    pub to: PlanStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Output of one rebalancing run plus its approval/execution lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingPlan {
    pub status: PlanStatus,
    pub proposals: Vec<TradeProposal>,
    pub statistics: RebalancingStatistics,
    pub drift: Vec<AssetClassDrift>,
    pub class_trades: Vec<ClassTrade>,
    pub execution_order: Vec<ExecutionStep>,
    pub history: Vec<StatusChange>,
}

/// Receives a proposed plan and reports the status it reached.
///
/// Order placement and approval happen on the collaborator's side; the plan
/// only records what it is told.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionCollaborator {
    fn submit(&self, plan: &RebalancingPlan) -> anyhow::Result<PlanStatus>;
}

impl RebalancingPlan {
    pub(crate) fn proposed(
        proposals: Vec<TradeProposal>,
        statistics: RebalancingStatistics,
        drift: Vec<AssetClassDrift>,
        class_trades: Vec<ClassTrade>,
        execution_order: Vec<ExecutionStep>,
    ) -> Self {
        Self {
            status: PlanStatus::Proposed,
            proposals,
            statistics,
            drift,
            class_trades,
            execution_order,
            history: Vec::new(),
        }
    }

    pub fn transition(
        &mut self,
        to: PlanStatus,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(RiskError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.history.push(StatusChange {
            from: self.status,
            to,
            at,
            note,
        });
        info!("Rebalancing plan {} -> {}", self.status, to);
        self.status = to;
        Ok(())
    }

    pub fn approve(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(PlanStatus::Approved, at, None)
    }

    pub fn start_execution(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(PlanStatus::Executing, at, None)
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(PlanStatus::Completed, at, None)
    }

    pub fn fail(&mut self, at: DateTime<Utc>, reason: impl Into<String>) -> Result<()> {
        self.transition(PlanStatus::Failed, at, Some(reason.into()))
    }

    pub fn cancel(&mut self, at: DateTime<Utc>, reason: impl Into<String>) -> Result<()> {
        self.transition(PlanStatus::Cancelled, at, Some(reason.into()))
    }

    /// Walk the lifecycle forward to `target`, recording each intermediate step
    pub fn advance_to(&mut self, target: PlanStatus, at: DateTime<Utc>) -> Result<()> {
        while self.status != target {
            let next = self
                .status
                .step_toward(target)
                .ok_or(RiskError::InvalidTransition {
                    from: self.status,
                    to: target,
                })?;
            self.transition(next, at, None)?;
        }
        Ok(())
    }

    /// Submit the plan and record the status the collaborator reports
    pub fn hand_off(
        &mut self,
        collaborator: &dyn ExecutionCollaborator,
        at: DateTime<Utc>,
    ) -> anyhow::Result<PlanStatus> {
        let reported = collaborator.submit(self)?;
        self.advance_to(reported, at)?;
        Ok(self.status)
    }
}
