//! Smart Start planner: persists assessments and accepted plans on a goal.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::assessment::{
    suggest_start_frequency, AssessmentResponses, SkillAssessment, SmartStartPlan, StartSuggestion,
};
use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::goal::Goal;

pub struct SmartStartPlanner {
    ctx: EngineContext,
}

impl SmartStartPlanner {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Score the answers and overwrite the goal's stored assessment.
    pub async fn save_skill_assessment(
        &self,
        goal_id: &str,
        responses: AssessmentResponses,
        now: DateTime<Utc>,
    ) -> EngineResult<SkillAssessment> {
        let mut goal = self.ctx.goal_for_update(goal_id).await?;
        let assessment = SkillAssessment::from_responses(responses, now);
        goal.metadata.skill_assessment = Some(assessment.clone());
        goal.updated_at = now;
        self.ctx.store.put_goal(&goal).await?;
        info!(goal_id, level = assessment.calculated_level, "skill assessment saved");
        Ok(assessment)
    }

    /// Suggest a start from the goal's stored assessment.
    ///
    /// Without an assessment the level is unknown and the 50% rule applies.
    pub async fn recommend(&self, goal_id: &str, target_frequency: u32) -> EngineResult<StartSuggestion> {
        let goal = self.ctx.goal(goal_id).await?;
        let level = goal
            .metadata
            .skill_assessment
            .as_ref()
            .map(|a| a.calculated_level)
            .unwrap_or(0);
        Ok(suggest_start_frequency(level, target_frequency))
    }

    /// Store the plan and make `selected_frequency` the goal's live frequency
    /// in the same write. The point ceiling is recomputed with it.
    pub async fn save_smart_start_plan(
        &self,
        goal_id: &str,
        suggestion: StartSuggestion,
        accepted: bool,
        selected_frequency: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Goal> {
        let mut goal = self.ctx.goal_for_update(goal_id).await?;
        let plan = SmartStartPlan::from_suggestion(
            suggestion,
            accepted,
            selected_frequency,
            goal.duration_weeks,
            now,
        );
        goal.metadata.smart_start = Some(plan);
        goal.frequency_per_week = selected_frequency;
        goal.refresh_total_possible_points()?;
        goal.updated_at = now;
        self.ctx.store.put_goal(&goal).await?;
        info!(
            goal_id,
            selected_frequency,
            accepted,
            total_possible_points = goal.total_possible_points,
            "smart start plan saved"
        );
        Ok(goal)
    }
}
