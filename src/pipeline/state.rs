/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read access to the progress of a [`Pipeline`](super::Pipeline), and blocking waits on it.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use typed_builder::TypedBuilder;

use crate::{
    events::StallEvent,
    feeds::pluggables::Feed,
    types::{data_types::SubscriptionId, timeframe::Timeframe},
};

use super::{
    timeframe_clock::{map_feed_indexes_to_timeframe, WaitOutcome},
    PipelineInner,
};

/// Parameters of [`PipelineState::wait_until_reached_target_timeframe`].
#[derive(Clone, Debug, TypedBuilder)]
pub struct WaitUntilReachedParams {
    #[builder(default, setter(strip_option, doc = "Set the maximum time to wait. Optional, waits indefinitely by default."))]
    pub timeout: Option<Duration>,
    #[builder(default = true, setter(doc = "Stop waiting if the pipeline stalls? Optional, defaults to true."))]
    pub break_on_stall: bool,
}

impl Default for WaitUntilReachedParams {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// External accessor for the state of a pipeline.
pub struct PipelineState<F: Feed> {
    inner: Arc<PipelineInner<F>>,
}

impl<F: Feed> Clone for PipelineState<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: Feed> PipelineState<F> {
    pub(crate) fn new(inner: Arc<PipelineInner<F>>) -> Self {
        Self { inner }
    }

    /// Get the timeframe of blocks that have been handled completely.
    pub fn timeframe(&self) -> Timeframe {
        self.inner.clock.timeframe()
    }

    /// Get the timeframe of blocks that have been handed out, including one still being handled.
    pub fn pending_timeframe(&self) -> Timeframe {
        self.inner.clock.pending_timeframe()
    }

    /// Get the timeframe that the cursor was last set to.
    pub fn start_timeframe(&self) -> Timeframe {
        self.inner.lock_state().start_timeframe.clone()
    }

    /// Get the timeframe that accounts for the last block of every non-empty feed.
    ///
    /// This timeframe might never be reached, if some of those blocks depend on blocks in feeds that
    /// were not added.
    pub fn end_timeframe(&self) -> Timeframe {
        map_feed_indexes_to_timeframe(
            self.feeds()
                .iter()
                .map(|feed| (feed.key(), feed.length())),
        )
    }

    /// Get the timeframe to wait for in
    /// [`wait_until_reached_target_timeframe`](Self::wait_until_reached_target_timeframe). Empty if no
    /// target was set.
    pub fn target_timeframe(&self) -> Timeframe {
        self.inner
            .lock_state()
            .target_timeframe
            .clone()
            .unwrap_or_default()
    }

    pub fn set_target_timeframe(&self, target: Timeframe) {
        self.inner.lock_state().target_timeframe = Some(target);
    }

    /// Get the feeds added to the pipeline, in the order they were added.
    pub fn feeds(&self) -> Vec<F> {
        self.inner.lock_state().feeds.clone()
    }

    /// Block until `target` has been processed.
    pub fn wait_until_timeframe(&self, target: &Timeframe) {
        self.inner.clock.wait_until_reached(target, None, false);
    }

    /// Block until the [target timeframe](Self::target_timeframe) has been processed.
    ///
    /// Returns [`WaitOutcome::Stalled`] if `break_on_stall` is set and the pipeline stalls during the
    /// wait, and [`WaitOutcome::TimedOut`] if `timeout` elapses first. Neither is an error: the blocks
    /// that the target depends on might simply not be available yet.
    pub fn wait_until_reached_target_timeframe(&self, params: WaitUntilReachedParams) -> WaitOutcome {
        let target = self.target_timeframe();
        log::debug!(
            "Waiting until reached target timeframe: current {}, target {}.",
            self.timeframe(),
            target
        );

        let deadline = params.timeout.map(|timeout| Instant::now() + timeout);
        let outcome = self
            .inner
            .clock
            .wait_until_reached(&target, deadline, params.break_on_stall);

        match outcome {
            WaitOutcome::TimedOut => {
                let current = self.timeframe();
                log::warn!(
                    "Waiting until reached target timeframe timed out after {}ms: current {}, target {}, dependencies {}.",
                    params.timeout.unwrap_or_default().as_millis(),
                    current,
                    target,
                    Timeframe::dependencies(&target, &current)
                );
            }
            WaitOutcome::Stalled => {
                log::warn!("Stopped waiting for target timeframe {} because the pipeline stalled.", target);
            }
            WaitOutcome::Reached => {}
        }
        outcome
    }

    /// Register `callback` to be called with the processed timeframe every time it changes.
    pub fn subscribe_timeframe_update(
        &self,
        callback: impl Fn(&Timeframe) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.clock.subscribe(callback)
    }

    pub fn unsubscribe_timeframe_update(&self, subscription: SubscriptionId) -> bool {
        self.inner.clock.unsubscribe(subscription)
    }

    /// Register `callback` to be called every time the pipeline stalls.
    pub fn subscribe_stalled(
        &self,
        callback: impl Fn(&StallEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.stalled.subscribe(callback)
    }

    pub fn unsubscribe_stalled(&self, subscription: SubscriptionId) -> bool {
        self.inner.stalled.unsubscribe(subscription)
    }
}
