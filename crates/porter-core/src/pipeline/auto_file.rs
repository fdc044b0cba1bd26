use crate::capabilities::parse_path_payload;
use crate::models::{AutoFileOutcome, CoreError, PipelineStep};
use crate::orchestration::ExecutionContext;
use crate::pipeline::{PipelineRunner, base_name, resumed_step, wait_for_settle};

impl PipelineRunner {
    /// settle -> classify -> [move] -> [rename] -> notify
    pub async fn run_auto_file(
        &self,
        context: &ExecutionContext,
        payload: &[u8],
    ) -> Result<Vec<u8>, CoreError> {
        let original_path = parse_path_payload(payload)?;
        let resume = self.resume_state(context).await?;
        let mut current = resume
            .current_path
            .clone()
            .unwrap_or_else(|| original_path.clone());
        let mut steps = Vec::new();

        tracing::info!(
            task_id = context.task_id.map(|id| id.0),
            file = %base_name(&original_path),
            "pipeline.auto_file starting"
        );

        wait_for_settle(context, &current, self.auto_file.settle_delay_ms)
            .await
            .map_err(|error| error.context("settle"))?;
        steps.push(PipelineStep::ok("settle", None));

        let classification = self
            .capabilities
            .classify(context, &current)
            .await
            .map_err(|error| error.context("classify"))?;
        steps.push(PipelineStep::ok(
            "classify",
            Some(classification.category.clone()),
        ));

        if let Some(moved) = &resume.moved {
            steps.push(resumed_step("move", moved));
        } else if self.auto_file.auto_move
            && !classification.destination.as_os_str().is_empty()
            && classification.destination != current
        {
            self.tracked_move(
                context,
                &mut current,
                classification.destination.clone(),
                &mut steps,
            )
            .await?;
        }

        let mut new_name = None;
        if let Some(renamed) = &resume.renamed {
            steps.push(resumed_step("rename", renamed));
            new_name = Some(base_name(renamed));
        } else if self.auto_file.auto_rename {
            match self.capabilities.suggest_rename(context, &current).await {
                Ok(suggestion)
                    if !suggestion.new_name.is_empty()
                        && suggestion.new_name != base_name(&current) =>
                {
                    let name = suggestion.new_name.clone();
                    if self
                        .tracked_rename(context, &mut current, suggestion.new_name, &mut steps)
                        .await?
                    {
                        new_name = Some(name);
                    }
                }
                Ok(_) => {}
                Err(error) => steps.push(PipelineStep::error("rename", error.message)),
            }
        }

        self.notify(
            "Auto-filed",
            &format!(
                "{} -> {}",
                base_name(&original_path),
                classification.category
            ),
        );

        tracing::info!(
            task_id = context.task_id.map(|id| id.0),
            file = %base_name(&original_path),
            category = %classification.category,
            final_path = %current.display(),
            "pipeline.auto_file completed"
        );

        let outcome = AutoFileOutcome {
            original_path,
            final_path: current,
            category: classification.category,
            new_name,
            steps,
        };
        Ok(serde_json::to_vec(&outcome)?)
    }
}
