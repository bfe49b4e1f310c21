use std::sync::Arc;

use havitush_agent::bootstrap::bootstrap_with_config;
use havitush_agent::inbound::InboundMessage;
use havitush_agent::outbound::OutboxSender;
use havitush_agent::pipeline::{Pipeline, PipelineContext, PipelineError};

use crate::commands::ruleset::ruleset_failure;
use crate::commands::{current_thread_runtime, load_config, CommandResult, Failure};

/// Runs one inbound text message through the full pipeline and prints the reply.
pub fn run(phone: &str, message: &str) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match current_thread_runtime("chat") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let inbound = InboundMessage::text(phone, message);

    let result = runtime.block_on(async {
        let app = bootstrap_with_config(config).await.map_err(ruleset_failure)?;
        let outbox = OutboxSender::default();
        let pipeline = Pipeline::new(app.runtime.clone(), Arc::new(outbox.clone()));

        let mut context = PipelineContext::new(inbound);
        let outcome = pipeline
            .run_context(&mut context)
            .await
            .map_err(|error| turn_failure(error, &context.correlation_id));
        app.db_pool.close().await;
        outcome?;

        let reply = outbox
            .last()
            .await
            .map(|sent| sent.text)
            .ok_or_else(|| ("turn_failure", "no reply was produced".to_string(), 6u8))?;
        Ok::<String, Failure>(reply)
    });

    match result {
        Ok(reply) => CommandResult::success("chat", reply),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

fn turn_failure(error: PipelineError, correlation_id: &str) -> Failure {
    match error {
        PipelineError::Turn(error) => {
            let interface = error.into_interface(correlation_id);
            (
                interface.error_class(),
                format!("{interface} (correlation id {})", interface.correlation_id()),
                6,
            )
        }
        PipelineError::MissingField(_)
        | PipelineError::InvalidPhoneNumber(_)
        | PipelineError::UnsupportedMessageType(_) => ("invalid_message", error.to_string(), 6),
        other => ("turn_failure", other.to_string(), 6),
    }
}
