//! `taskgate workflow`: Validate and run workflow definitions from files.

use std::sync::Arc;

use taskgate_core::config::EngineConfig;
use taskgate_core::tools::ToolInvoker;
use taskgate_core::workflow::{RunStatus, StepStatus, WorkflowDefinition, WorkflowEngine, WorkflowRun};

/// Load a YAML or JSON workflow and check its structure.
pub fn load(workflow_file: &str) -> Result<WorkflowDefinition, String> {
    let workflow = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    workflow.validate().map_err(|e| e.to_string())?;
    Ok(workflow)
}

/// `taskgate workflow validate <file>`
pub fn validate(workflow_file: &str) -> Result<(), String> {
    let workflow = load(workflow_file)?;
    println!(
        "✅ {} is valid: {} step(s), concurrency {}, haltOnFailure {}",
        workflow.id,
        workflow.steps.len(),
        workflow.concurrency_limit,
        workflow.halt_on_failure
    );
    for step in &workflow.steps {
        if step.dependencies.is_empty() {
            println!("   • {} → {}", step.id, step.tool_id);
        } else {
            println!(
                "   • {} → {} (after {})",
                step.id,
                step.tool_id,
                step.dependencies.join(", ")
            );
        }
    }
    Ok(())
}

/// Run a validated workflow to completion.
pub async fn execute(
    workflow: &WorkflowDefinition,
    tools: Arc<dyn ToolInvoker>,
    engine_config: EngineConfig,
) -> Result<WorkflowRun, String> {
    let engine = WorkflowEngine::new(engine_config, tools);
    engine.execute(workflow).await.map_err(|e| e.to_string())
}

/// `taskgate workflow run <file>`
pub async fn run(
    workflow_file: &str,
    tools_url: Option<&str>,
    config_path: Option<&str>,
    json: bool,
) -> Result<(), String> {
    let config = super::load_config(config_path)?;
    let workflow = load(workflow_file)?;

    println!("📄 Loaded workflow: {} ({})", workflow.id, workflow_file);
    println!("   {} step(s)", workflow.steps.len());
    println!();

    let run = execute(&workflow, super::tool_invoker(tools_url), config.engine).await?;

    if json {
        super::print_json(&serde_json::to_value(&run).map_err(|e| e.to_string())?);
    } else {
        for step in &workflow.steps {
            let step_id = &step.id;
            let Some(result) = run.step_results.get(step_id) else {
                continue;
            };
            let mark = match result.status {
                StepStatus::Completed => "✅",
                StepStatus::Failed => "❌",
            };
            print!(
                "{} {} ({}ms, {} attempt(s))",
                mark, step_id, result.duration_ms, result.attempts
            );
            match &result.error {
                Some(error) => println!(" {}: {}", error.code, error.message),
                None => println!(),
            }
            for warning in &result.warnings {
                println!("   ⚠️  {}", warning);
            }
        }
    }

    match run.status {
        RunStatus::Completed => {
            println!("\n🎉 Workflow completed in {}ms", run.duration_ms());
            Ok(())
        }
        _ => {
            let failed: Vec<&str> = run
                .step_results
                .values()
                .filter(|r| r.status == StepStatus::Failed)
                .map(|r| r.step_id.as_str())
                .collect();
            Err(format!("Workflow failed. Failed steps: {}", failed.join(", ")))
        }
    }
}
