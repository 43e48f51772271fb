/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [configuration](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ProcessMutation](crate::events::ProcessMutationEvent) is printed:
//!
//! ```text
//! ProcessMutation, 1701329264, Id5u7f6, fNGCJyk, 12, 3, false
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the object's id.
//! - The fourth value is the first seven characters of the Base64 encoding of the key of the feed the
//!   mutation came from.
//! - The fifth value is the sequence number of the mutation in its feed.
//! - The sixth value is the position the mutation was inserted at in the object's mutation queue.
//! - The seventh value is whether the mutation confirmed a local optimistic mutation.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const UPDATE_TIMEFRAME: &str = "UpdateTimeframe";
pub const STALL: &str = "Stall";
pub const CONSUME_MESSAGE: &str = "ConsumeMessage";

pub const CREATE_OBJECT: &str = "CreateObject";
pub const WRITE_MUTATION: &str = "WriteMutation";
pub const PROCESS_MUTATION: &str = "ProcessMutation";
pub const RESET_STATE_MACHINE: &str = "ResetStateMachine";
pub const UPDATE_OBJECT: &str = "UpdateObject";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync>;
}

impl Logger for UpdateTimeframeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |update_timeframe_event: &UpdateTimeframeEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                UPDATE_TIMEFRAME,
                secs_since_unix_epoch(update_timeframe_event.timestamp),
                update_timeframe_event.timeframe.len(),
                update_timeframe_event.timeframe.total_messages()
            )
        };
        Box::new(logger)
    }
}

impl Logger for StallEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |stall_event: &StallEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}",
                STALL,
                secs_since_unix_epoch(stall_event.timestamp),
                stall_event.feeds,
                stall_event.stall_timeout.as_millis(),
                stall_event.timeframe
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConsumeMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |consume_message_event: &ConsumeMessageEvent| {
            log::debug!(
                "{}, {}, {}, {}",
                CONSUME_MESSAGE,
                secs_since_unix_epoch(consume_message_event.timestamp),
                first_seven_base64_chars(&consume_message_event.feed_key.bytes()),
                consume_message_event.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for CreateObjectEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |create_object_event: &CreateObjectEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CREATE_OBJECT,
                secs_since_unix_epoch(create_object_event.timestamp),
                first_seven_base64_chars(&create_object_event.object.bytes()),
                create_object_event.type_url
            )
        };
        Box::new(logger)
    }
}

impl Logger for WriteMutationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |write_mutation_event: &WriteMutationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                WRITE_MUTATION,
                secs_since_unix_epoch(write_mutation_event.timestamp),
                first_seven_base64_chars(&write_mutation_event.object.bytes()),
                first_seven_base64_chars(&write_mutation_event.receipt.feed_key.bytes()),
                write_mutation_event.receipt.seq
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProcessMutationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |process_mutation_event: &ProcessMutationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                PROCESS_MUTATION,
                secs_since_unix_epoch(process_mutation_event.timestamp),
                first_seven_base64_chars(&process_mutation_event.object.bytes()),
                first_seven_base64_chars(&process_mutation_event.feed_key.bytes()),
                process_mutation_event.seq,
                process_mutation_event.index,
                process_mutation_event.confirmed_optimistic
            )
        };
        Box::new(logger)
    }
}

impl Logger for ResetStateMachineEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |reset_state_machine_event: &ResetStateMachineEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RESET_STATE_MACHINE,
                secs_since_unix_epoch(reset_state_machine_event.timestamp),
                first_seven_base64_chars(&reset_state_machine_event.object.bytes()),
                reset_state_machine_event.mutations,
                reset_state_machine_event.optimistic_mutations
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateObjectEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |update_object_event: &UpdateObjectEvent| {
            log::trace!(
                "{}, {}, {}",
                UPDATE_OBJECT,
                secs_since_unix_epoch(update_object_event.timestamp),
                first_seven_base64_chars(&update_object_event.object.bytes())
            )
        };
        Box::new(logger)
    }
}

/// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7
/// characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

/// Get the number of seconds between the Unix Epoch and `timestamp`, or 0 if `timestamp` comes before
/// the Unix Epoch.
pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
