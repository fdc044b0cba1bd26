use crate::capabilities::parse_path_payload;
use crate::models::{CoreError, PipelineStep, ScreenshotOutcome, ScreenshotTags};
use crate::orchestration::ExecutionContext;
use crate::pipeline::{PipelineRunner, base_name, resumed_step, wait_for_settle};

impl PipelineRunner {
    /// settle -> [tag] -> [rename] -> [move] -> notify
    pub async fn run_screenshot(
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
            "pipeline.screenshot starting"
        );

        wait_for_settle(context, &current, self.screenshots.settle_delay_ms)
            .await
            .map_err(|error| error.context("settle"))?;
        steps.push(PipelineStep::ok("settle", None));

        let mut tags = ScreenshotTags::default();
        if self.screenshots.use_vision {
            tags = self
                .capabilities
                .tag_screenshot(context, &current)
                .await
                .map_err(|error| error.context("tag"))?;
            steps.push(PipelineStep::ok("tag", Some(tags.description.clone())));
        }

        if let Some(renamed) = &resume.renamed {
            steps.push(resumed_step("rename", renamed));
        } else if self.screenshots.rename
            && !tags.suggested_name.is_empty()
            && tags.suggested_name != base_name(&current)
        {
            self.tracked_rename(context, &mut current, tags.suggested_name.clone(), &mut steps)
                .await?;
        }

        if let Some(moved) = &resume.moved {
            steps.push(resumed_step("move", moved));
        } else if let Some(destination_dir) = &self.screenshots.destination {
            let destination = destination_dir.join(base_name(&current));
            if destination != current {
                self.tracked_move(context, &mut current, destination, &mut steps)
                    .await?;
            }
        }

        let message = if tags.description.is_empty() {
            base_name(&current)
        } else {
            tags.description.clone()
        };
        self.notify("Screenshot processed", &message);

        tracing::info!(
            task_id = context.task_id.map(|id| id.0),
            file = %base_name(&original_path),
            final_path = %current.display(),
            "pipeline.screenshot completed"
        );

        let outcome = ScreenshotOutcome {
            original_path,
            final_path: current,
            app: tags.app,
            description: tags.description,
            tags: tags.tags,
            steps,
        };
        Ok(serde_json::to_vec(&outcome)?)
    }
}
