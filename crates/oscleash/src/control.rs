// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic leash control loop.
//!
//! Every tick samples the shared [`LeashHandle`], turns the grab phase into a
//! movement command and writes it to the peer's input endpoints:
//!
//! | Phase    | Output                                            |
//! |----------|---------------------------------------------------|
//! | Grabbing | [`classify`] on the current stretch               |
//! | Released | stop, wait the inactive delay, stop again         |
//! | Idle     | nothing, wait the inactive delay                  |
//!
//! The loop then sleeps the active delay and repeats until cancelled.

use crate::config::LeashConfig;
use crate::leash::{classify, GrabPhase, LeashHandle, Movement};
use crate::osc::{OscArg, OscSender};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const VERTICAL_ADDRESS: &str = "/input/Vertical";
pub const HORIZONTAL_ADDRESS: &str = "/input/Horizontal";
pub const RUN_ADDRESS: &str = "/input/Run";

/// Loop thresholds and cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSettings {
    pub run_deadzone: f32,
    pub walk_deadzone: f32,
    pub active_delay: Duration,
    pub inactive_delay: Duration,
    /// Log emissions at info instead of trace.
    pub logging: bool,
}

impl ControlSettings {
    pub fn from_config(config: &LeashConfig) -> Self {
        Self {
            run_deadzone: config.run_deadzone,
            walk_deadzone: config.walk_deadzone,
            active_delay: config.active_delay(),
            inactive_delay: config.inactive_delay(),
            logging: config.logging,
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self::from_config(&LeashConfig::default())
    }
}

/// Control loop of one session.
pub struct ControlLoop<S: OscSender + ?Sized> {
    leash: LeashHandle,
    sender: Arc<S>,
    settings: ControlSettings,
}

impl<S: OscSender + ?Sized> ControlLoop<S> {
    pub fn new(leash: LeashHandle, sender: Arc<S>, settings: ControlSettings) -> Self {
        Self {
            leash,
            sender,
            settings,
        }
    }

    /// Run until `cancel` fires. Emits one stop command before the first tick.
    pub async fn run(self, cancel: CancellationToken) {
        debug!("Control loop started");
        self.emit(Movement::STOP);

        while !cancel.is_cancelled() {
            if !self.tick(&cancel).await {
                break;
            }
            if !sleep_or_cancel(self.settings.active_delay, &cancel).await {
                break;
            }
        }

        debug!("Control loop stopped");
    }

    /// One tick. Returns `false` if cancelled while waiting.
    pub(crate) async fn tick(&self, cancel: &CancellationToken) -> bool {
        let sample = self.leash.sample();
        match sample.phase {
            GrabPhase::Grabbing => {
                let stretch = self.leash.stretch();
                self.emit(classify(
                    stretch,
                    sample.vertical,
                    sample.horizontal,
                    self.settings.run_deadzone,
                    self.settings.walk_deadzone,
                ));
                true
            }
            GrabPhase::Released => {
                self.emit(Movement::STOP);
                if !sleep_or_cancel(self.settings.inactive_delay, cancel).await {
                    return false;
                }
                self.emit(Movement::STOP);
                true
            }
            GrabPhase::Idle => sleep_or_cancel(self.settings.inactive_delay, cancel).await,
        }
    }

    fn emit(&self, movement: Movement) {
        let writes = [
            (VERTICAL_ADDRESS, OscArg::Float(movement.vertical)),
            (HORIZONTAL_ADDRESS, OscArg::Float(movement.horizontal)),
            (RUN_ADDRESS, OscArg::Int(i32::from(movement.run))),
        ];

        for (address, value) in writes {
            if self.settings.logging {
                info!("Sending {} {}", address, value);
            } else {
                trace!("Sending {} {}", address, value);
            }
            if let Err(e) = self.sender.send_value(address, value) {
                warn!("Send to {} failed: {}", address, e);
            }
        }
    }
}

/// Sleep for `delay`; `false` if `cancel` fired first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leash::LeashField;
    use crate::osc::OscError;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Instant, String, OscArg)>>,
    }

    impl Recorder {
        fn triples(&self) -> Vec<(f32, f32, i32)> {
            let sent = self.sent.lock();
            sent.chunks(3)
                .map(|c| match (&c[0].2, &c[1].2, &c[2].2) {
                    (OscArg::Float(v), OscArg::Float(h), OscArg::Int(r)) => (*v, *h, *r),
                    other => panic!("unexpected triple {:?}", other),
                })
                .collect()
        }

        fn len(&self) -> usize {
            self.sent.lock().len()
        }
    }

    impl OscSender for Recorder {
        fn send_value(&self, address: &str, value: OscArg) -> Result<(), OscError> {
            self.sent
                .lock()
                .push((Instant::now(), address.to_string(), value));
            Ok(())
        }
    }

    fn control(leash: &LeashHandle) -> (ControlLoop<Recorder>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let control = ControlLoop::new(
            leash.clone(),
            Arc::clone(&recorder),
            ControlSettings::default(),
        );
        (control, recorder)
    }

    fn pull(leash: &LeashHandle, stretch: f32) {
        leash.set_float(LeashField::ZPositive, 1.0);
        leash.set_float(LeashField::XNegative, 0.5);
        leash.set_float(LeashField::Stretch, stretch);
        leash.set_grabbed(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emission_order_and_addresses() {
        let leash = LeashHandle::new();
        let (control, recorder) = control(&leash);
        pull(&leash, 0.8);

        assert!(control.tick(&CancellationToken::new()).await);
        let sent = recorder.sent.lock();
        let addresses: Vec<&str> = sent.iter().map(|s| s.1.as_str()).collect();
        assert_eq!(addresses, vec![VERTICAL_ADDRESS, HORIZONTAL_ADDRESS, RUN_ADDRESS]);
        assert_eq!(sent[0].2, OscArg::Float(0.8));
        assert_eq!(sent[1].2, OscArg::Float(-0.4));
        assert_eq!(sent[2].2, OscArg::Int(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_and_deadzone() {
        let leash = LeashHandle::new();
        let (control, recorder) = control(&leash);
        let cancel = CancellationToken::new();

        pull(&leash, 0.5);
        control.tick(&cancel).await;
        pull(&leash, 0.1);
        control.tick(&cancel).await;

        assert_eq!(recorder.triples(), vec![(0.5, -0.25, 0), (0.0, 0.0, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_emits_two_stops_apart() {
        let leash = LeashHandle::new();
        let (control, recorder) = control(&leash);
        let cancel = CancellationToken::new();

        pull(&leash, 0.5);
        control.tick(&cancel).await;
        leash.set_grabbed(false);
        control.tick(&cancel).await;

        assert_eq!(
            recorder.triples(),
            vec![(0.5, -0.25, 0), (0.0, 0.0, 0), (0.0, 0.0, 0)]
        );
        let sent = recorder.sent.lock();
        let gap = sent[6].0 - sent[3].0;
        let delay = ControlSettings::default().inactive_delay;
        assert!(gap >= delay && gap < delay + Duration::from_millis(1));
        drop(sent);

        // Next tick is idle: nothing sent.
        control.tick(&cancel).await;
        assert_eq!(recorder.len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_without_output() {
        let leash = LeashHandle::new();
        let (control, recorder) = control(&leash);

        let start = Instant::now();
        assert!(control.tick(&CancellationToken::new()).await);
        assert_eq!(recorder.len(), 0);
        let delay = ControlSettings::default().inactive_delay;
        assert!(start.elapsed() >= delay && start.elapsed() < delay + Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_starts_with_stop_and_honours_cancel() {
        let leash = LeashHandle::new();
        let (control, recorder) = control(&leash);
        let cancel = CancellationToken::new();
        pull(&leash, 0.9);

        let task = tokio::spawn(control.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        task.await.unwrap();

        let triples = recorder.triples();
        assert_eq!(triples[0], (0.0, 0.0, 0));
        assert!(triples.len() >= 3);
        assert!(triples[1..].iter().all(|t| *t == (0.9, -0.45, 1)));

        let count = recorder.len();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recorder.len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_release_gap_skips_second_stop() {
        let leash = LeashHandle::new();
        let (control, recorder) = control(&leash);
        let cancel = CancellationToken::new();

        pull(&leash, 0.5);
        control.tick(&cancel).await;
        leash.set_grabbed(false);
        cancel.cancel();
        assert!(!control.tick(&cancel).await);
        assert_eq!(recorder.triples(), vec![(0.5, -0.25, 0), (0.0, 0.0, 0)]);
    }
}
