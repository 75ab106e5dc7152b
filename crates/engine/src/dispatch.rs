// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Applies script commands to a task's pipeline and output state.

use mixkit_core::control::TaskCommand;

use crate::pipeline::StreamPipeline;
use crate::script::TaskContext;

/// Applies `commands` in order. Returns how many changed something.
pub fn apply_commands(ctx: &TaskContext, pipeline: &StreamPipeline, commands: Vec<TaskCommand>) -> usize {
    let mut applied = 0;
    for command in commands {
        match &command {
            TaskCommand::Subscribe { stream_name, subscriber, media } => {
                let target = ctx.target_or_create(subscriber);
                for selector in media {
                    target.enable(*selector);
                }
                pipeline.subscribe(stream_name, subscriber, target);
                applied += 1;
            },
            TaskCommand::Unsubscribe { stream_name, subscriber } => {
                if pipeline.unsubscribe(stream_name, subscriber) {
                    applied += 1;
                } else {
                    tracing::debug!(
                        task_id = %ctx.task_id(),
                        stream = %stream_name,
                        subscriber = %subscriber,
                        "Unsubscribe for unknown subscription"
                    );
                }
                // Target stays registered; the script may still drain it.
            },
            TaskCommand::ConfigureCodec { .. } | TaskCommand::SetBitrate { .. } | TaskCommand::Composite { .. } => {
                ctx.apply_output(&command);
                applied += 1;
            },
        }
        tracing::trace!(task_id = %ctx.task_id(), ?command, "Applied command");
    }
    applied
}
